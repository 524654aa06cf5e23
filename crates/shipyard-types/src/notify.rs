//! Payloads delivered through the wait/notify coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::element::{ContextElement, InstanceElement};
use crate::execution_data::StepExecutionSummary;
use crate::status::ExecutionStatus;

/// A response delivered under one correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyResponse {
    /// A child instance finished.
    Element(ElementNotifyResponse),
    /// A remote task finished.
    Command(CommandResult),
    /// A human decided an approval gate.
    Approval(ApprovalDecision),
}

impl NotifyResponse {
    /// Elements the waiting instance pushes onto its stack before resuming.
    pub fn context_elements(&self) -> &[ContextElement] {
        match self {
            NotifyResponse::Element(r) => &r.context_elements,
            NotifyResponse::Command(r) => &r.context_elements,
            NotifyResponse::Approval(_) => &[],
        }
    }

    pub fn as_element(&self) -> Option<&ElementNotifyResponse> {
        match self {
            NotifyResponse::Element(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_command(&self) -> Option<&CommandResult> {
        match self {
            NotifyResponse::Command(r) => Some(r),
            _ => None,
        }
    }
}

/// Completion report of a child instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNotifyResponse {
    pub state_name: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    /// The child's notify elements.
    #[serde(default)]
    pub context_elements: Vec<ContextElement>,
    /// Element the child was entered with, if any.
    #[serde(default)]
    pub context_element: Option<ContextElement>,
    #[serde(default)]
    pub summary: Option<StepExecutionSummary>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ElementNotifyResponse {
    /// Report for a child that was never dispatched.
    pub fn skipped(state_name: impl Into<String>) -> Self {
        Self {
            state_name: state_name.into(),
            status: ExecutionStatus::Skipped,
            error_message: None,
            context_elements: Vec::new(),
            context_element: None,
            summary: None,
            started_at: None,
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Success,
    Failure,
}

/// Result a remote agent reports for a queued task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: CommandStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub instances: Vec<InstanceElement>,
    #[serde(default)]
    pub context_elements: Vec<ContextElement>,
    #[serde(default)]
    pub output: serde_json::Value,
}

impl CommandResult {
    pub fn success() -> Self {
        Self {
            status: CommandStatus::Success,
            error_message: None,
            instances: Vec::new(),
            context_elements: Vec::new(),
            output: serde_json::Value::Null,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failure,
            error_message: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn with_instances(mut self, instances: Vec<InstanceElement>) -> Self {
        self.instances = instances;
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = output;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub decided_by: String,
    #[serde(default)]
    pub comments: Option<String>,
}
