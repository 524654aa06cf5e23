//! Rollback of container resizes.
//!
//! A rollback never re-plans: it finds the resize its forward phase step
//! recorded and replays it with previous and desired swapped.

use shipyard_types::element::{ContainerRollbackElement, ContextElement, ElementKind};
use shipyard_types::execution_data::PhaseStepExecutionSummary;
use shipyard_types::resize::ContainerServiceData;

use crate::context::ExecutionContext;

/// Swap previous/desired counts and traffic of every group.
pub fn reverse(data: &[ContainerServiceData]) -> Vec<ContainerServiceData> {
    data.iter().map(ContainerServiceData::reversed).collect()
}

/// Summary of `phase_step_name` recorded by the forward phase `phase_name`.
pub fn forward_phase_step_summary<'a>(
    ctx: &'a ExecutionContext<'_>,
    phase_name: &str,
    phase_step_name: &str,
) -> Option<&'a PhaseStepExecutionSummary> {
    ctx.execution_data_for(phase_name)?
        .phase()?
        .phase_step_summaries
        .get(phase_step_name)
}

/// Element carrying the reversed resize of a forward phase step.
///
/// The forward run's old groups become the groups to grow, its new group
/// the one to shrink.
pub fn rollback_element(summary: &PhaseStepExecutionSummary) -> Option<ContextElement> {
    let (new_instance_data, old_instance_data) = summary.first_resize()?;
    Some(ContextElement::new(
        "container-rollback",
        ElementKind::ContainerRollback(ContainerRollbackElement {
            new_instance_data: reverse(old_instance_data),
            old_instance_data: reverse(new_instance_data),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_types::execution_data::{StepExecutionSummary, StepSummaryDetail};
    use shipyard_types::status::ExecutionStatus;

    fn groups() -> Vec<ContainerServiceData> {
        vec![
            ContainerServiceData {
                name: "web__1".into(),
                previous_count: 3,
                desired_count: 0,
                previous_traffic_percent: Some(60),
                desired_traffic_percent: Some(0),
            },
            ContainerServiceData::new("web__2", 1, 0),
        ]
    }

    #[test]
    fn reverse_is_an_involution() {
        let data = groups();
        assert_eq!(reverse(&reverse(&data)), data);
        assert_eq!(reverse(&data)[0].desired_count, 3);
        assert_eq!(reverse(&data)[0].desired_traffic_percent, Some(60));
        assert!(reverse(&[]).is_empty());
    }

    #[test]
    fn rollback_element_swaps_groups() {
        let summary = PhaseStepExecutionSummary {
            step_summaries: vec![StepExecutionSummary {
                state_name: "deploy-containers".into(),
                status: ExecutionStatus::Success,
                message: None,
                detail: StepSummaryDetail::Resize {
                    new_instance_data: vec![ContainerServiceData::new("web__3", 2, 4)],
                    old_instance_data: vec![ContainerServiceData::new("web__2", 4, 2)],
                },
            }],
        };
        let element = rollback_element(&summary).unwrap();
        match element.kind {
            ElementKind::ContainerRollback(rollback) => {
                assert_eq!(
                    rollback.new_instance_data,
                    vec![ContainerServiceData::new("web__2", 2, 4)]
                );
                assert_eq!(
                    rollback.old_instance_data,
                    vec![ContainerServiceData::new("web__3", 4, 2)]
                );
            }
            other => panic!("unexpected element: {other:?}"),
        }
    }

    #[test]
    fn no_resize_means_no_element() {
        assert!(rollback_element(&PhaseStepExecutionSummary::default()).is_none());
    }
}
