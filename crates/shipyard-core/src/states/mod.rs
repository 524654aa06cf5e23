//! Built-in states.
//!
//! Composites ([`PhaseState`], [`PhaseStepState`], [`RepeatState`],
//! [`ForkState`]) spawn children and aggregate their completions. Leaves
//! ([`ContainerDeployState`], [`ApprovalState`], [`AnalysisState`],
//! [`CommandState`]) queue remote work and wait for its result.

pub mod analysis;
pub mod approval;
pub mod command;
pub mod container_deploy;
pub mod fork;
pub mod phase;
pub mod phase_step;
pub mod repeat;

use uuid::Uuid;

use shipyard_types::element::{ElementKind, InstanceElement};
use shipyard_types::execution_data::{
    ElementExecutionData, ElementExecutionSummary, InstanceStatusSummary, StepSummaryDetail,
};
use shipyard_types::notify::ElementNotifyResponse;
use shipyard_types::task::{Activity, ActivityKind};

use crate::aggregate::aggregate;
use crate::collaborator::ActivitySink;
use crate::context::ExecutionContext;
use crate::state::ExecutionResponse;

pub use analysis::AnalysisState;
pub use approval::ApprovalState;
pub use command::CommandState;
pub use container_deploy::ContainerDeployState;
pub use fork::ForkState;
pub use phase::PhaseState;
pub use phase_step::{PhaseStepState, PhaseStepType};
pub use repeat::{RepeatOver, RepeatState};

/// Terminal response of a composite whose children all reported.
pub(crate) fn finish_composite(
    children: &[&ElementNotifyResponse],
    continue_on_failure: bool,
) -> ExecutionResponse {
    let result = aggregate(children.iter().copied(), continue_on_failure);
    let response = ExecutionResponse::completed(result.status);
    match result.error_message {
        Some(message) => response.with_error(message),
        None => response,
    }
}

/// Per-element summary of the children that entered with a context element,
/// plus every instance status they reported.
pub(crate) fn element_execution_data(children: &[&ElementNotifyResponse]) -> ElementExecutionData {
    let mut data = ElementExecutionData::default();
    for child in children {
        if let Some(element) = &child.context_element {
            if let ElementKind::Instance(instance) = &element.kind {
                data.instance_status_summaries.push(InstanceStatusSummary {
                    instance: instance.clone(),
                    status: child.status,
                });
            }
            data.element_summaries.push(ElementExecutionSummary {
                element: Some(element.clone()),
                state_name: child.state_name.clone(),
                status: child.status,
                started_at: child.started_at,
                ended_at: child.ended_at,
            });
        }
        if let Some(StepSummaryDetail::Instances { instances }) =
            child.summary.as_ref().map(|s| &s.detail)
        {
            data.instance_status_summaries.extend(instances.iter().cloned());
        }
    }
    data
}

/// Instances listed in the nearest instance-list element.
pub(crate) fn listed_instances(ctx: &ExecutionContext<'_>) -> Vec<InstanceElement> {
    ctx.context_elements(shipyard_types::element::ElementType::InstanceList)
        .into_iter()
        .find_map(|e| match &e.kind {
            ElementKind::InstanceList(list) => Some(list.instances.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Record a RUNNING activity for the current instance.
pub(crate) fn start_activity(
    sink: &dyn ActivitySink,
    ctx: &ExecutionContext<'_>,
    command_name: &str,
    kind: ActivityKind,
) -> Uuid {
    sink.save(Activity::new(
        ctx.app_id(),
        ctx.execution_id(),
        ctx.instance_id(),
        ctx.state_name(),
        command_name,
        kind,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_types::element::ContextElement;
    use shipyard_types::execution_data::StepExecutionSummary;
    use shipyard_types::status::ExecutionStatus;

    fn host(id: &str) -> InstanceElement {
        InstanceElement {
            id: id.into(),
            host_name: format!("{id}.internal"),
            display_name: id.into(),
            service_name: None,
        }
    }

    #[test]
    fn summaries_cover_transition_children_and_reported_instances() {
        let mut entered = ElementNotifyResponse::skipped("deploy");
        entered.status = ExecutionStatus::Success;
        entered.context_element = Some(ContextElement::new("h1", ElementKind::Instance(host("h1"))));

        let mut reporting = ElementNotifyResponse::skipped("resize");
        reporting.status = ExecutionStatus::Success;
        reporting.summary = Some(StepExecutionSummary {
            state_name: "resize".into(),
            status: ExecutionStatus::Success,
            message: None,
            detail: StepSummaryDetail::Instances {
                instances: vec![InstanceStatusSummary {
                    instance: host("h2"),
                    status: ExecutionStatus::Success,
                }],
            },
        });

        let data = element_execution_data(&[&entered, &reporting]);
        assert_eq!(data.element_summaries.len(), 1);
        assert_eq!(data.element_summaries[0].state_name, "deploy");
        let ids: Vec<_> = data
            .instance_status_summaries
            .iter()
            .map(|s| s.instance.id.as_str())
            .collect();
        assert_eq!(ids, vec!["h1", "h2"]);
    }

    #[test]
    fn composite_carries_first_failure() {
        let mut ok = ElementNotifyResponse::skipped("a");
        ok.status = ExecutionStatus::Success;
        let mut bad = ElementNotifyResponse::skipped("b");
        bad.status = ExecutionStatus::Failed;
        bad.error_message = Some("b broke".into());

        let response = finish_composite(&[&ok, &bad], false);
        assert_eq!(response.terminal_status(), Some(ExecutionStatus::Failed));
        assert_eq!(response.error_message.as_deref(), Some("b broke"));
        assert_eq!(
            finish_composite(&[&ok, &bad], true).terminal_status(),
            Some(ExecutionStatus::Success)
        );
    }
}
