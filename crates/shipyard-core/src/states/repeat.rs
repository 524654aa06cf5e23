//! Repeat a state once per context element.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use shipyard_types::element::{ContextElement, ElementKind, ElementType};
use shipyard_types::execution_data::{ElementExecutionData, ExecutionPayload};
use shipyard_types::instance::StateType;
use shipyard_types::notify::NotifyResponse;
use shipyard_types::status::ExecutionStrategy;

use super::{element_execution_data, finish_composite, listed_instances};
use crate::aggregate::ordered_child_responses;
use crate::context::ExecutionContext;
use crate::state::{ChildInstance, ExecutionResponse, State, StateError};

/// What a repeat iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatOver {
    /// Hosts of the nearest instance list, or the visible instance elements.
    Instances,
    /// Every visible element of one type, bottom of the stack first.
    Elements(ElementType),
}

#[derive(Debug, Clone)]
pub struct RepeatState {
    pub name: String,
    pub over: RepeatOver,
    /// State run for each element.
    pub repeat_state: String,
    pub strategy: ExecutionStrategy,
    pub continue_on_failure: bool,
    pub timeout: Option<Duration>,
}

impl RepeatState {
    fn repeat_elements(&self, ctx: &ExecutionContext<'_>) -> Vec<ContextElement> {
        let of_type = |ty| -> Vec<ContextElement> {
            let mut found: Vec<_> = ctx.context_elements(ty).into_iter().cloned().collect();
            found.reverse();
            found
        };
        match self.over {
            RepeatOver::Instances => {
                let listed = listed_instances(ctx);
                if listed.is_empty() {
                    of_type(ElementType::Instance)
                } else {
                    listed
                        .into_iter()
                        .map(|host| ContextElement::new(host.display_name.clone(), ElementKind::Instance(host)))
                        .collect()
                }
            }
            RepeatOver::Elements(ty) => of_type(ty),
        }
    }
}

impl State for RepeatState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> StateType {
        StateType::Repeat
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<ExecutionResponse, StateError> {
        let elements = self.repeat_elements(ctx);
        tracing::debug!(
            instance_id = %ctx.instance_id(),
            repeat = %self.repeat_state,
            count = elements.len(),
            "repeating state"
        );
        let children = elements
            .into_iter()
            .map(|element| ChildInstance::new(self.repeat_state.clone()).entered_with(element))
            .collect();
        Ok(ExecutionResponse::spawning(children, self.strategy)
            .with_payload(ExecutionPayload::Element(ElementExecutionData::default())))
    }

    fn handle_async_response(
        &self,
        ctx: &ExecutionContext<'_>,
        responses: &HashMap<String, NotifyResponse>,
    ) -> Result<ExecutionResponse, StateError> {
        let children = ordered_child_responses(ctx, responses)?;
        Ok(finish_composite(&children, self.continue_on_failure)
            .with_payload(ExecutionPayload::Element(element_execution_data(&children))))
    }
}
