//! Execution status lifecycle shared by every state execution instance.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a state execution instance.
///
/// `New -> Running -> {Paused, Aborting} -> terminal`. Once an instance
/// reaches a terminal status it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Created but not yet dispatched.
    New,
    /// Dispatched; the state is executing or waiting on correlation ids.
    Running,
    /// Suspended awaiting a human decision (approval gates).
    Paused,
    /// Abort requested; the abort handler is running.
    Aborting,
    Success,
    /// The state ran and reported a business failure.
    Failed,
    /// The engine or the state hit an internal fault.
    Error,
    Aborted,
    /// Never dispatched because an earlier SERIAL sibling broke the chain.
    Skipped,
}

impl ExecutionStatus {
    /// Statuses from which an instance can still change.
    pub const ACTIVE: [ExecutionStatus; 4] = [
        ExecutionStatus::New,
        ExecutionStatus::Running,
        ExecutionStatus::Paused,
        ExecutionStatus::Aborting,
    ];

    /// Statuses an instance may be in while it waits for correlation ids.
    pub const WAITING: [ExecutionStatus; 2] = [ExecutionStatus::Running, ExecutionStatus::Paused];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failed
                | ExecutionStatus::Error
                | ExecutionStatus::Aborted
                | ExecutionStatus::Skipped
        )
    }

    /// A broken status stops a SERIAL chain and fails its composite.
    pub fn is_broke(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Failed | ExecutionStatus::Error | ExecutionStatus::Aborted
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Stable uppercase name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::New => "NEW",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Paused => "PAUSED",
            ExecutionStatus::Aborting => "ABORTING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Error => "ERROR",
            ExecutionStatus::Aborted => "ABORTED",
            ExecutionStatus::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(ExecutionStatus::New),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "PAUSED" => Ok(ExecutionStatus::Paused),
            "ABORTING" => Ok(ExecutionStatus::Aborting),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "ERROR" => Ok(ExecutionStatus::Error),
            "ABORTED" => Ok(ExecutionStatus::Aborted),
            "SKIPPED" => Ok(ExecutionStatus::Skipped),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

/// Order in which a composite runs its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStrategy {
    /// One child at a time; a broken child skips the rest.
    #[default]
    Serial,
    /// All children dispatched at once.
    Parallel,
}
