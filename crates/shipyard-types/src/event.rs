//! Lifecycle events broadcast by the executor.
//!
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::ExecutionStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// An instance moved from NEW to RUNNING.
    InstanceStarted {
        execution_id: Uuid,
        instance_id: Uuid,
        state_name: String,
    },

    /// An instance is waiting on correlation ids.
    InstanceSuspended {
        execution_id: Uuid,
        instance_id: Uuid,
        state_name: String,
        correlation_ids: Vec<String>,
    },

    /// An instance reached a terminal status.
    InstanceCompleted {
        execution_id: Uuid,
        instance_id: Uuid,
        state_name: String,
        status: ExecutionStatus,
        error_message: Option<String>,
    },

    /// An instance exceeded its timeout and is being aborted.
    InstanceTimedOut {
        execution_id: Uuid,
        instance_id: Uuid,
        state_name: String,
        timeout_secs: u64,
    },

    /// A notification arrived for a wait that had been cancelled.
    NotificationDiscarded { correlation_id: String },

    /// The root instance of an execution reached a terminal status.
    ExecutionCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let event = ExecutionEvent::ExecutionCompleted {
            execution_id: Uuid::now_v7(),
            status: ExecutionStatus::Success,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "execution_completed");
        assert_eq!(json["status"], "SUCCESS");
    }
}
