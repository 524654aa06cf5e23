//! Run independent branches in parallel.

use std::collections::HashMap;
use std::time::Duration;

use shipyard_types::execution_data::{ElementExecutionData, ExecutionPayload};
use shipyard_types::instance::StateType;
use shipyard_types::notify::NotifyResponse;
use shipyard_types::status::ExecutionStrategy;

use super::{element_execution_data, finish_composite};
use crate::aggregate::ordered_child_responses;
use crate::context::ExecutionContext;
use crate::state::{ChildInstance, ExecutionResponse, State, StateError};

#[derive(Debug, Clone)]
pub struct ForkState {
    pub name: String,
    pub branches: Vec<String>,
    pub continue_on_failure: bool,
    pub timeout: Option<Duration>,
}

impl State for ForkState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> StateType {
        StateType::Fork
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn execute(&self, _ctx: &ExecutionContext<'_>) -> Result<ExecutionResponse, StateError> {
        let children = self.branches.iter().map(ChildInstance::new).collect();
        Ok(ExecutionResponse::spawning(children, ExecutionStrategy::Parallel)
            .with_payload(ExecutionPayload::Element(ElementExecutionData::default())))
    }

    fn handle_async_response(
        &self,
        ctx: &ExecutionContext<'_>,
        responses: &HashMap<String, NotifyResponse>,
    ) -> Result<ExecutionResponse, StateError> {
        let children = ordered_child_responses(ctx, responses)?;
        let mut response = finish_composite(&children, self.continue_on_failure)
            .with_payload(ExecutionPayload::Element(element_execution_data(&children)));
        for element in children.iter().flat_map(|c| c.context_elements.iter()) {
            response = response.with_notify_element(element.clone());
        }
        Ok(response)
    }
}
