//! Phase step: a named group of steps inside a phase.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use shipyard_types::element::{ContextElement, ElementType};
use shipyard_types::execution_data::{ExecutionPayload, PhaseStepExecutionSummary};
use shipyard_types::instance::StateType;
use shipyard_types::notify::{ElementNotifyResponse, NotifyResponse};
use shipyard_types::status::{ExecutionStatus, ExecutionStrategy};

use super::finish_composite;
use crate::aggregate::ordered_child_responses;
use crate::context::{ContextError, ExecutionContext};
use crate::rollback::{forward_phase_step_summary, rollback_element};
use crate::state::{ChildInstance, ExecutionResponse, State, StateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStepType {
    PreDeployment,
    ContainerSetup,
    ContainerDeploy,
    VerifyService,
    WrapUp,
    PostDeployment,
}

#[derive(Debug, Clone)]
pub struct PhaseStepState {
    pub name: String,
    pub step_type: PhaseStepType,
    pub steps: Vec<String>,
    pub parallel: bool,
    pub continue_on_failure: bool,
    pub rollback: bool,
    /// Forward step whose summary a rollback step replays; defaults to `name`.
    pub phase_step_name_for_rollback: Option<String>,
    pub timeout: Option<Duration>,
}

impl PhaseStepState {
    fn strategy(&self) -> ExecutionStrategy {
        if self.parallel {
            ExecutionStrategy::Parallel
        } else {
            ExecutionStrategy::Serial
        }
    }

    fn children(&self, rollback: bool) -> Vec<ChildInstance> {
        self.steps
            .iter()
            .map(|step| ChildInstance::new(step.clone()).rollback(rollback))
            .collect()
    }

    fn spawn(&self, rollback: bool) -> ExecutionResponse {
        ExecutionResponse::spawning(self.children(rollback), self.strategy())
            .with_payload(ExecutionPayload::PhaseStep(PhaseStepExecutionSummary::default()))
    }

    fn execute_forward(&self, ctx: &ExecutionContext<'_>) -> Result<ExecutionResponse, StateError> {
        if self.step_type == PhaseStepType::ContainerDeploy {
            ctx.container_service_element().map_err(|_| {
                StateError::Configuration(format!(
                    "container service setup not done before '{}'",
                    self.name
                ))
            })?;
        }
        Ok(self.spawn(false))
    }

    /// Replay what the forward step did, or finish at once when it never ran.
    fn execute_rollback(&self, ctx: &ExecutionContext<'_>) -> Result<ExecutionResponse, StateError> {
        let phase = ctx.phase_element()?;
        let Some(forward_phase) = phase.phase_name_for_rollback.as_deref() else {
            return Err(StateError::Configuration(format!(
                "phase '{}' has no forward phase to roll back",
                phase.phase_name
            )));
        };
        let forward_step = self
            .phase_step_name_for_rollback
            .as_deref()
            .unwrap_or(&self.name);

        let Some(summary) = forward_phase_step_summary(ctx, forward_phase, forward_step) else {
            tracing::info!(
                instance_id = %ctx.instance_id(),
                forward_phase,
                forward_step,
                "forward step never ran, nothing to roll back"
            );
            return Ok(ExecutionResponse::success());
        };

        if self.step_type != PhaseStepType::ContainerDeploy {
            return Ok(self.spawn(true));
        }
        match rollback_element(summary) {
            Some(element) => Ok(self.spawn(true).with_context_element(element)),
            None => {
                tracing::info!(
                    instance_id = %ctx.instance_id(),
                    forward_step,
                    "forward step recorded no resize, nothing to roll back"
                );
                Ok(ExecutionResponse::success())
            }
        }
    }

    /// Element a container step must hand on to the rest of the phase.
    fn exported_element(
        &self,
        children: &[&ElementNotifyResponse],
        rollback: bool,
    ) -> Result<Option<ContextElement>, StateError> {
        let wanted = match self.step_type {
            PhaseStepType::ContainerSetup => ElementType::ContainerService,
            PhaseStepType::ContainerDeploy => ElementType::InstanceList,
            _ => return Ok(None),
        };
        let found = children
            .iter()
            .rev()
            .flat_map(|c| c.context_elements.iter().rev())
            .find(|e| e.element_type() == wanted)
            .cloned();
        match found {
            Some(element) => Ok(Some(element)),
            // A rolled-back deploy may legitimately bring up nothing new.
            None if rollback => Ok(None),
            None => Err(ContextError::MissingContextElement(wanted).into()),
        }
    }
}

impl State for PhaseStepState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> StateType {
        StateType::PhaseStep
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn is_rollback(&self) -> bool {
        self.rollback
    }

    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<ExecutionResponse, StateError> {
        if self.rollback || ctx.is_rollback() {
            self.execute_rollback(ctx)
        } else {
            self.execute_forward(ctx)
        }
    }

    fn handle_async_response(
        &self,
        ctx: &ExecutionContext<'_>,
        responses: &HashMap<String, NotifyResponse>,
    ) -> Result<ExecutionResponse, StateError> {
        let children = ordered_child_responses(ctx, responses)?;
        let summary = PhaseStepExecutionSummary {
            step_summaries: children.iter().filter_map(|c| c.summary.clone()).collect(),
        };
        let response =
            finish_composite(&children, self.continue_on_failure).with_payload(ExecutionPayload::PhaseStep(summary));

        if response.terminal_status() != Some(ExecutionStatus::Success) {
            return Ok(response);
        }
        let rollback = self.rollback || ctx.is_rollback();
        Ok(match self.exported_element(&children, rollback)? {
            Some(element) => response
                .with_context_element(element.clone())
                .with_notify_element(element),
            None => response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_types::element::{ContainerServiceElement, ElementKind};
    use shipyard_types::resize::ResizeStrategy;

    fn step(step_type: PhaseStepType) -> PhaseStepState {
        PhaseStepState {
            name: "setup".into(),
            step_type,
            steps: vec!["create-service".into()],
            parallel: false,
            continue_on_failure: false,
            rollback: false,
            phase_step_name_for_rollback: None,
            timeout: None,
        }
    }

    fn child_with(elements: Vec<ContextElement>) -> ElementNotifyResponse {
        let mut child = ElementNotifyResponse::skipped("create-service");
        child.status = ExecutionStatus::Success;
        child.context_elements = elements;
        child
    }

    #[test]
    fn setup_step_exports_container_service() {
        let element = ContextElement::new(
            "web__3",
            ElementKind::ContainerService(ContainerServiceElement {
                service_name: "web__3".into(),
                cluster_name: "prod".into(),
                setting_id: "aws".into(),
                max_instances: 10,
                resize_strategy: ResizeStrategy::ResizeNewFirst,
            }),
        );
        let child = child_with(vec![element.clone()]);
        let exported = step(PhaseStepType::ContainerSetup)
            .exported_element(&[&child], false)
            .unwrap();
        assert_eq!(exported, Some(element));
    }

    #[test]
    fn setup_step_without_element_fails() {
        let child = child_with(Vec::new());
        let err = step(PhaseStepType::ContainerSetup)
            .exported_element(&[&child], false)
            .unwrap_err();
        assert_eq!(err.status(), ExecutionStatus::Failed);
    }

    #[test]
    fn other_steps_export_nothing() {
        let child = child_with(Vec::new());
        assert!(step(PhaseStepType::WrapUp)
            .exported_element(&[&child], false)
            .unwrap()
            .is_none());
    }
}
