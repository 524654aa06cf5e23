//! The persistent record of one state's execution inside a workflow run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::element::ContextElement;
use crate::execution_data::StateExecutionData;
use crate::status::{ExecutionStatus, ExecutionStrategy};

/// Kind of state an instance executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Phase,
    PhaseStep,
    Repeat,
    Fork,
    ContainerDeploy,
    Approval,
    Analysis,
    Command,
}

impl StateType {
    /// Composites spawn children and aggregate their outcomes.
    pub fn is_composite(self) -> bool {
        matches!(
            self,
            StateType::Phase | StateType::PhaseStep | StateType::Repeat | StateType::Fork
        )
    }
}

/// One execution of one state within one workflow execution.
///
/// Instances form a tree through `parent_instance_id`; SERIAL siblings are
/// additionally chained through `prev_instance_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateExecutionInstance {
    pub id: Uuid,
    pub app_id: String,
    pub execution_id: Uuid,
    pub state_name: String,
    pub state_type: StateType,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub parent_instance_id: Option<Uuid>,
    #[serde(default)]
    pub prev_instance_id: Option<Uuid>,
    /// Correlation id the parent waits on for this instance's completion.
    #[serde(default)]
    pub notify_id: Option<String>,
    /// Context stack snapshot, bottom first.
    #[serde(default)]
    pub context_elements: Vec<ContextElement>,
    /// Element introduced when this instance was entered (repeat children).
    #[serde(default)]
    pub context_element: Option<ContextElement>,
    #[serde(default)]
    pub context_transition: bool,
    /// Elements handed to the parent and to the next SERIAL sibling.
    #[serde(default)]
    pub notify_elements: Vec<ContextElement>,
    /// Outstanding correlation ids, in registration order.
    #[serde(default)]
    pub correlation_ids: Vec<String>,
    /// Coordinator registration for `correlation_ids`.
    #[serde(default)]
    pub wait_id: Option<Uuid>,
    /// Strategy the children of this composite run under.
    #[serde(default)]
    pub child_strategy: Option<ExecutionStrategy>,
    #[serde(default)]
    pub rollback: bool,
    /// Bumped each time the state is invoked; stale timers compare against it.
    #[serde(default)]
    pub dispatch_seq: u32,
    pub state_execution_data: StateExecutionData,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl StateExecutionInstance {
    /// A fresh `NEW` instance with no parent.
    pub fn new(
        app_id: impl Into<String>,
        execution_id: Uuid,
        state_name: impl Into<String>,
        state_type: StateType,
    ) -> Self {
        let state_name = state_name.into();
        Self {
            id: Uuid::now_v7(),
            app_id: app_id.into(),
            execution_id,
            state_execution_data: StateExecutionData::new(state_name.clone()),
            state_name,
            state_type,
            status: ExecutionStatus::New,
            parent_instance_id: None,
            prev_instance_id: None,
            notify_id: None,
            context_elements: Vec::new(),
            context_element: None,
            context_transition: false,
            notify_elements: Vec::new(),
            correlation_ids: Vec::new(),
            wait_id: None,
            child_strategy: None,
            rollback: false,
            dispatch_seq: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_instance_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instance_defaults() {
        let exec = Uuid::now_v7();
        let instance = StateExecutionInstance::new("app-1", exec, "deploy", StateType::Phase);
        assert_eq!(instance.status, ExecutionStatus::New);
        assert_eq!(instance.state_execution_data.state_name, "deploy");
        assert!(instance.is_root());
        assert!(instance.state_type.is_composite());
        assert!(!StateType::Approval.is_composite());
    }

    #[test]
    fn instance_json_round_trip() {
        let instance =
            StateExecutionInstance::new("app-1", Uuid::now_v7(), "gate", StateType::Approval);
        let json = serde_json::to_string(&instance).unwrap();
        let back: StateExecutionInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(back, instance);
    }
}
