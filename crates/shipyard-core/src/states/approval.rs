//! Manual approval gate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use shipyard_types::execution_data::{ApprovalExecutionData, ExecutionPayload};
use shipyard_types::instance::StateType;
use shipyard_types::notify::NotifyResponse;
use shipyard_types::status::ExecutionStatus;
use shipyard_types::task::ActivityKind;

use super::start_activity;
use crate::collaborator::ActivitySink;
use crate::context::ExecutionContext;
use crate::state::{ExecutionResponse, State, StateError};

/// Pauses until someone approves or rejects.
///
/// The decision arrives as a [`NotifyResponse::Approval`] under the approval
/// id recorded in the state's execution data. A rejection fails the state
/// with the reviewer's comment.
pub struct ApprovalState {
    pub name: String,
    /// Shown to reviewers; `${...}` references are rendered.
    pub prompt: Option<String>,
    pub timeout: Option<Duration>,
    pub activities: Arc<dyn ActivitySink>,
}

impl std::fmt::Debug for ApprovalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalState")
            .field("name", &self.name)
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

impl State for ApprovalState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> StateType {
        StateType::Approval
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<ExecutionResponse, StateError> {
        let activity_id = start_activity(self.activities.as_ref(), ctx, &self.name, ActivityKind::Approval);
        let approval_id = format!("approval-{}", Uuid::now_v7());
        let prompt = self.prompt.as_deref().map(|p| ctx.render_expression(p));
        tracing::info!(
            instance_id = %ctx.instance_id(),
            approval_id = %approval_id,
            "waiting for approval"
        );
        Ok(ExecutionResponse::paused(vec![approval_id.clone()]).with_payload(
            ExecutionPayload::Approval(ApprovalExecutionData {
                approval_id,
                activity_id,
                prompt,
                decided_by: None,
                comments: None,
            }),
        ))
    }

    fn handle_async_response(
        &self,
        ctx: &ExecutionContext<'_>,
        responses: &HashMap<String, NotifyResponse>,
    ) -> Result<ExecutionResponse, StateError> {
        let Some(mut data) = ctx.state_execution_data().approval().cloned() else {
            return Err(StateError::Protocol("approval resumed without approval data".into()));
        };
        let Some(NotifyResponse::Approval(decision)) = responses.get(&data.approval_id) else {
            return Err(StateError::Protocol(format!(
                "no decision for approval '{}'",
                data.approval_id
            )));
        };
        data.decided_by = Some(decision.decided_by.clone());
        data.comments = decision.comments.clone();

        tracing::info!(
            instance_id = %ctx.instance_id(),
            approval_id = %data.approval_id,
            approved = decision.approved,
            decided_by = %decision.decided_by,
            "approval decided"
        );
        if decision.approved {
            self.activities.update_status(data.activity_id, ExecutionStatus::Success);
            return Ok(ExecutionResponse::success().with_payload(ExecutionPayload::Approval(data)));
        }

        self.activities.update_status(data.activity_id, ExecutionStatus::Failed);
        let message = match &decision.comments {
            Some(comments) => format!("rejected by {}: {comments}", decision.decided_by),
            None => format!("rejected by {}", decision.decided_by),
        };
        Ok(ExecutionResponse::failed(message).with_payload(ExecutionPayload::Approval(data)))
    }

    fn handle_abort_event(&self, ctx: &ExecutionContext<'_>) {
        if let Some(data) = ctx.state_execution_data().approval() {
            self.activities.update_status(data.activity_id, ExecutionStatus::Aborted);
        }
    }
}
