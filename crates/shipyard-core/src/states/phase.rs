//! Deployment phase: one service on one infrastructure mapping.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use shipyard_types::element::{ContextElement, DeploymentType, ElementKind, PhaseElement, ServiceElement};
use shipyard_types::execution_data::{ExecutionPayload, PhaseExecutionData, StepSummaryDetail};
use shipyard_types::instance::StateType;
use shipyard_types::notify::NotifyResponse;
use shipyard_types::status::ExecutionStrategy;

use super::finish_composite;
use crate::aggregate::ordered_child_responses;
use crate::context::ExecutionContext;
use crate::state::{ChildInstance, ExecutionResponse, State, StateError};

/// Pushes a phase element and runs its phase steps serially.
///
/// On completion the phase records every child's phase step summary, keyed
/// by step name, so a later rollback phase can find what ran.
#[derive(Debug, Clone)]
pub struct PhaseState {
    pub name: String,
    pub service: ServiceElement,
    pub infra_mapping_id: String,
    pub deployment_type: DeploymentType,
    pub steps: Vec<String>,
    pub rollback: bool,
    /// Forward phase this phase undoes; only set on rollback phases.
    pub phase_name_for_rollback: Option<String>,
    pub timeout: Option<Duration>,
}

impl PhaseState {
    fn phase_element(&self) -> ContextElement {
        ContextElement::new(
            self.name.clone(),
            ElementKind::Phase(PhaseElement {
                phase_name: self.name.clone(),
                service: self.service.clone(),
                infra_mapping_id: self.infra_mapping_id.clone(),
                deployment_type: self.deployment_type,
                rollback: self.rollback,
                phase_name_for_rollback: self.phase_name_for_rollback.clone(),
            }),
        )
    }
}

impl State for PhaseState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> StateType {
        StateType::Phase
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn is_rollback(&self) -> bool {
        self.rollback
    }

    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<ExecutionResponse, StateError> {
        if self.rollback && self.phase_name_for_rollback.is_none() {
            return Err(StateError::Configuration(format!(
                "rollback phase '{}' does not name the phase it rolls back",
                self.name
            )));
        }
        tracing::debug!(
            instance_id = %ctx.instance_id(),
            phase = %self.name,
            service = %self.service.name,
            rollback = self.rollback,
            "starting phase"
        );
        let children = self
            .steps
            .iter()
            .map(|step| ChildInstance::new(step.clone()).rollback(self.rollback))
            .collect();
        Ok(ExecutionResponse::spawning(children, ExecutionStrategy::Serial)
            .with_context_element(self.phase_element())
            .with_payload(ExecutionPayload::Phase(PhaseExecutionData {
                phase_name: self.name.clone(),
                service_name: Some(self.service.name.clone()),
                rollback: self.rollback,
                phase_step_summaries: BTreeMap::new(),
            })))
    }

    fn handle_async_response(
        &self,
        ctx: &ExecutionContext<'_>,
        responses: &HashMap<String, NotifyResponse>,
    ) -> Result<ExecutionResponse, StateError> {
        let children = ordered_child_responses(ctx, responses)?;

        let mut phase_step_summaries = BTreeMap::new();
        for child in &children {
            if let Some(StepSummaryDetail::PhaseStep(summary)) = child.summary.as_ref().map(|s| &s.detail) {
                phase_step_summaries.insert(child.state_name.clone(), summary.clone());
            }
        }

        let mut response = finish_composite(&children, false).with_payload(ExecutionPayload::Phase(
            PhaseExecutionData {
                phase_name: self.name.clone(),
                service_name: Some(self.service.name.clone()),
                rollback: self.rollback,
                phase_step_summaries,
            },
        ));
        // Whatever the steps exported stays visible to the phase's parent.
        for element in children.iter().flat_map(|c| c.context_elements.iter()) {
            response = response.with_notify_element(element.clone());
        }
        Ok(response)
    }
}
