//! Shared container resize algorithm.
//!
//! Derives target counts from COUNT or PERCENTAGE specs, plans how capacity
//! moves from old service groups to the new one, and decides which
//! superseded revisions are pruned afterwards. Everything here is pure; the
//! container deploy state drives the remote calls.

use shipyard_types::resize::{
    ContainerServiceData, InstanceUnitType, ResizeStrategy, ServiceRevision,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResizeError {
    #[error("desired instance count {desired} must be greater than the current count {previous}")]
    InvalidScaleTarget { desired: u32, previous: u32 },

    #[error("desired instance count {desired} exceeds the max instance count {max}")]
    ScaleTargetExceedsMax { desired: u32, max: u32 },
}

/// Half of a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizePhase {
    /// Grow the new group.
    Upsize,
    /// Shrink the old groups.
    Downsize,
}

impl ResizePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ResizePhase::Upsize => "upsize",
            ResizePhase::Downsize => "downsize",
        }
    }
}

/// Order in which the two halves run.
pub fn phase_order(strategy: ResizeStrategy) -> [ResizePhase; 2] {
    match strategy {
        ResizeStrategy::ResizeNewFirst => [ResizePhase::Upsize, ResizePhase::Downsize],
        ResizeStrategy::DownsizeOldFirst => [ResizePhase::Downsize, ResizePhase::Upsize],
    }
}

/// Target instance count for the new group.
///
/// COUNT ignores `max_instances`. PERCENTAGE clamps the percent to 100,
/// rounds half away from zero and never yields less than one instance.
pub fn target_count(instance_count: u32, unit: InstanceUnitType, max_instances: u32) -> u32 {
    match unit {
        InstanceUnitType::Count => instance_count,
        InstanceUnitType::Percentage => {
            let percent = instance_count.min(100);
            let raw = (f64::from(percent) * f64::from(max_instances) / 100.0).round() as u32;
            raw.max(1)
        }
    }
}

/// Ceiling used for PERCENTAGE targets.
///
/// When the configured ceiling is below what is already running, the running
/// total wins, so a percentage never shrinks the service family.
pub fn effective_max_instances(
    unit: InstanceUnitType,
    configured_max: u32,
    active_counts: &[(String, u32)],
) -> u32 {
    match unit {
        InstanceUnitType::Count => configured_max,
        InstanceUnitType::Percentage => {
            let running: u32 = active_counts.iter().map(|(_, count)| *count).sum();
            configured_max.max(running)
        }
    }
}

/// How one resize should move capacity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResizePlan {
    /// Empty when the new group does not change.
    pub new_instance_data: Vec<ContainerServiceData>,
    /// Only groups whose count changes, in iteration order.
    pub old_instance_data: Vec<ContainerServiceData>,
}

impl ResizePlan {
    pub fn instances_added(&self) -> u32 {
        self.new_instance_data
            .iter()
            .map(|d| d.desired_count.saturating_sub(d.previous_count))
            .sum()
    }
}

/// Plan the resize of `new_group` from `previous_count` to `desired_count`.
///
/// `active_counts` lists every running group of the service family; the new
/// group itself is ignored when distributing the downsize.
pub fn plan_resize(
    new_group: &str,
    previous_count: u32,
    desired_count: u32,
    max_instances: u32,
    active_counts: &[(String, u32)],
) -> Result<ResizePlan, ResizeError> {
    if desired_count == 0 {
        return Ok(ResizePlan::default());
    }
    if desired_count <= previous_count {
        return Err(ResizeError::InvalidScaleTarget {
            desired: desired_count,
            previous: previous_count,
        });
    }
    if desired_count > max_instances {
        return Err(ResizeError::ScaleTargetExceedsMax {
            desired: desired_count,
            max: max_instances,
        });
    }

    let new_data = ContainerServiceData::new(new_group, previous_count, desired_count);
    let old_instance_data = plan_old_groups(&new_data, active_counts);
    Ok(ResizePlan {
        new_instance_data: vec![new_data],
        old_instance_data,
    })
}

/// Spread the instances added to `new_data` across the old groups.
///
/// Groups are consumed in iteration order and never go below zero; groups
/// that do not change are omitted.
pub fn plan_old_groups(
    new_data: &ContainerServiceData,
    active_counts: &[(String, u32)],
) -> Vec<ContainerServiceData> {
    let mut remaining = new_data.desired_count.saturating_sub(new_data.previous_count);
    let mut planned = Vec::new();

    for (name, previous) in active_counts {
        if name == &new_data.name {
            continue;
        }
        if remaining == 0 {
            break;
        }
        let desired = previous.saturating_sub(remaining);
        if desired != *previous {
            planned.push(ContainerServiceData::new(name.clone(), *previous, desired));
        }
        remaining -= previous - desired;
    }
    planned
}

/// Superseded revisions to delete, keeping the `retain` most recent.
///
/// A revision is superseded when nothing runs under it any more.
pub fn revisions_to_prune(revisions: &[ServiceRevision], retain: usize) -> Vec<ServiceRevision> {
    let mut superseded: Vec<&ServiceRevision> =
        revisions.iter().filter(|r| r.running_count == 0).collect();
    superseded.sort_by(|a, b| b.revision.cmp(&a.revision));
    superseded.into_iter().skip(retain).cloned().collect()
}
