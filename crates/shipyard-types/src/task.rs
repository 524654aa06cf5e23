//! Remote tasks and the activity records written for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::ExecutionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Resize container service groups.
    Resize,
    /// Run a named command on a remote agent.
    Command,
    /// Gather verification metrics.
    DataCollection,
}

/// Unit of work handed to a remote agent.
///
/// The agent's result is delivered back to the engine under `wait_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateTask {
    pub id: Uuid,
    pub app_id: String,
    pub task_type: TaskType,
    /// Correlation id the result is notified under.
    pub wait_id: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl DelegateTask {
    pub fn new(
        app_id: impl Into<String>,
        task_type: TaskType,
        wait_id: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            app_id: app_id.into(),
            task_type,
            wait_id: wait_id.into(),
            parameters,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Command,
    Approval,
    Verification,
}

/// User-visible record of something a state did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub app_id: String,
    pub execution_id: Uuid,
    pub instance_id: Uuid,
    pub state_name: String,
    pub command_name: String,
    pub kind: ActivityKind,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    /// A RUNNING activity for `instance_id`.
    pub fn new(
        app_id: impl Into<String>,
        execution_id: Uuid,
        instance_id: Uuid,
        state_name: impl Into<String>,
        command_name: impl Into<String>,
        kind: ActivityKind,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            app_id: app_id.into(),
            execution_id,
            instance_id,
            state_name: state_name.into(),
            command_name: command_name.into(),
            kind,
            status: ExecutionStatus::Running,
            created_at: Utc::now(),
        }
    }
}
