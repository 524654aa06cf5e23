//! Container resize domain types.
//!
//! A resize moves capacity between container service groups: the group being
//! rolled out grows, older groups shrink. `ContainerServiceData` records one
//! group's before/after counts so a rollback can replay the move in reverse.

use serde::{Deserialize, Serialize};

/// Before/after capacity of one container service group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerServiceData {
    /// Service group name (e.g. `web__7`).
    pub name: String,
    pub previous_count: u32,
    pub desired_count: u32,
    /// Traffic weight in percent before the resize, where the platform supports it.
    #[serde(default)]
    pub previous_traffic_percent: Option<u32>,
    #[serde(default)]
    pub desired_traffic_percent: Option<u32>,
}

impl ContainerServiceData {
    pub fn new(name: impl Into<String>, previous_count: u32, desired_count: u32) -> Self {
        Self {
            name: name.into(),
            previous_count,
            desired_count,
            previous_traffic_percent: None,
            desired_traffic_percent: None,
        }
    }

    /// The same group with its before and after swapped.
    pub fn reversed(&self) -> Self {
        Self {
            name: self.name.clone(),
            previous_count: self.desired_count,
            desired_count: self.previous_count,
            previous_traffic_percent: self.desired_traffic_percent,
            desired_traffic_percent: self.previous_traffic_percent,
        }
    }
}

/// Which half of a resize runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResizeStrategy {
    /// Grow the new group, then shrink the old ones.
    #[default]
    ResizeNewFirst,
    /// Shrink the old groups, then grow the new one.
    DownsizeOldFirst,
}

/// How a configured instance count is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceUnitType {
    /// Absolute number of instances.
    #[default]
    Count,
    /// Percent of the max instance ceiling.
    Percentage,
}

/// One revision of a container service as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRevision {
    pub name: String,
    pub revision: u32,
    /// Instances currently running under this revision.
    pub running_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_swaps_counts_and_traffic() {
        let data = ContainerServiceData {
            name: "web__2".into(),
            previous_count: 2,
            desired_count: 4,
            previous_traffic_percent: Some(0),
            desired_traffic_percent: Some(100),
        };
        let back = data.reversed();
        assert_eq!(back.previous_count, 4);
        assert_eq!(back.desired_count, 2);
        assert_eq!(back.previous_traffic_percent, Some(100));
        assert_eq!(back.desired_traffic_percent, Some(0));
        assert_eq!(back.reversed(), data);
    }

    #[test]
    fn strategy_serde_names() {
        let json = serde_json::to_string(&ResizeStrategy::DownsizeOldFirst).unwrap();
        assert_eq!(json, "\"DOWNSIZE_OLD_FIRST\"");
        let unit: InstanceUnitType = serde_json::from_str("\"PERCENTAGE\"").unwrap();
        assert_eq!(unit, InstanceUnitType::Percentage);
    }
}
