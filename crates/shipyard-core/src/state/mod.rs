//! The `State` contract and the responses a state returns to the executor.
//!
//! A state is synchronous: it inspects its context, possibly queues remote
//! work through a collaborator, and returns immediately. Suspension happens
//! only by returning an async or spawning response.

pub mod registry;

use std::collections::HashMap;
use std::time::Duration;

use shipyard_types::element::ContextElement;
use shipyard_types::execution_data::ExecutionPayload;
use shipyard_types::instance::StateType;
use shipyard_types::notify::NotifyResponse;
use shipyard_types::status::{ExecutionStatus, ExecutionStrategy};

use crate::collaborator::{CollaboratorError, DispatchError};
use crate::context::{ContextError, ExecutionContext};
use crate::resize::ResizeError;

pub use registry::{RegistryError, StateRegistry, StateRegistryBuilder};

// ---------------------------------------------------------------------------
// State trait
// ---------------------------------------------------------------------------

/// A single orchestration step.
///
/// Object-safe so the registry can hold heterogeneous states behind `Arc<dyn State>`.
pub trait State: Send + Sync {
    fn name(&self) -> &str;

    fn state_type(&self) -> StateType;

    /// Per-state timeout; `None` falls back to the engine default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn is_rollback(&self) -> bool {
        false
    }

    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<ExecutionResponse, StateError>;

    /// Called exactly once after every correlation id of the previous
    /// response has been notified.
    fn handle_async_response(
        &self,
        ctx: &ExecutionContext<'_>,
        responses: &HashMap<String, NotifyResponse>,
    ) -> Result<ExecutionResponse, StateError>;

    /// Compensating bookkeeping on abort or timeout. The executor forces the
    /// instance to ABORTED afterwards.
    fn handle_abort_event(&self, _ctx: &ExecutionContext<'_>) {}
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A child the executor should create under the responding composite.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildInstance {
    pub state_name: String,
    /// Elements pushed onto the child's copy of the parent stack.
    pub pushed_elements: Vec<ContextElement>,
    /// Element that distinguishes this child from its siblings.
    pub context_element: Option<ContextElement>,
    pub rollback: bool,
}

impl ChildInstance {
    pub fn new(state_name: impl Into<String>) -> Self {
        Self {
            state_name: state_name.into(),
            pushed_elements: Vec::new(),
            context_element: None,
            rollback: false,
        }
    }

    pub fn with_element(mut self, element: ContextElement) -> Self {
        self.pushed_elements.push(element);
        self
    }

    /// Push `element` and record it as the child's transition element.
    pub fn entered_with(mut self, element: ContextElement) -> Self {
        self.pushed_elements.push(element.clone());
        self.context_element = Some(element);
        self
    }

    pub fn rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    /// Terminal status; no suspension.
    Immediate { status: ExecutionStatus },
    /// Suspend until every correlation id is notified.
    Async {
        status: ExecutionStatus,
        correlation_ids: Vec<String>,
    },
    /// Create children and suspend until all of them complete.
    Spawning {
        children: Vec<ChildInstance>,
        strategy: ExecutionStrategy,
    },
}

/// What a state returns from `execute` or `handle_async_response`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResponse {
    pub kind: ResponseKind,
    /// Replaces the instance's execution payload when set.
    pub payload: Option<ExecutionPayload>,
    pub error_message: Option<String>,
    /// Pushed onto this instance's own stack.
    pub context_elements: Vec<ContextElement>,
    /// Handed to the parent and the next SERIAL sibling on completion.
    pub notify_elements: Vec<ContextElement>,
}

impl ExecutionResponse {
    fn with_kind(kind: ResponseKind) -> Self {
        Self {
            kind,
            payload: None,
            error_message: None,
            context_elements: Vec::new(),
            notify_elements: Vec::new(),
        }
    }

    pub fn completed(status: ExecutionStatus) -> Self {
        Self::with_kind(ResponseKind::Immediate { status })
    }

    pub fn success() -> Self {
        Self::completed(ExecutionStatus::Success)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::completed(ExecutionStatus::Failed).with_error(message)
    }

    /// Wait for remote completions while RUNNING.
    pub fn asynchronous(correlation_ids: Vec<String>) -> Self {
        Self::with_kind(ResponseKind::Async {
            status: ExecutionStatus::Running,
            correlation_ids,
        })
    }

    /// Wait for a human decision while PAUSED.
    pub fn paused(correlation_ids: Vec<String>) -> Self {
        Self::with_kind(ResponseKind::Async {
            status: ExecutionStatus::Paused,
            correlation_ids,
        })
    }

    pub fn spawning(children: Vec<ChildInstance>, strategy: ExecutionStrategy) -> Self {
        Self::with_kind(ResponseKind::Spawning { children, strategy })
    }

    pub fn with_payload(mut self, payload: ExecutionPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_context_element(mut self, element: ContextElement) -> Self {
        self.context_elements.push(element);
        self
    }

    pub fn with_notify_element(mut self, element: ContextElement) -> Self {
        self.notify_elements.push(element);
        self
    }

    /// Terminal status when the response is immediate.
    pub fn terminal_status(&self) -> Option<ExecutionStatus> {
        match self.kind {
            ResponseKind::Immediate { status } => Some(status),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors a state can raise. Each maps to a terminal status via [`StateError::status`].
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Missing or invalid setting, service or infrastructure mapping.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    /// Scale target rejected before any remote call.
    #[error(transparent)]
    Resize(#[from] ResizeError),

    /// The remote agent reported failure.
    #[error("{0}")]
    RemoteTaskFailure(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// Responses arrived in a shape the state cannot interpret.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StateError {
    /// Terminal status the executor records for this error.
    pub fn status(&self) -> ExecutionStatus {
        match self {
            StateError::Configuration(_)
            | StateError::Context(_)
            | StateError::Resize(_)
            | StateError::RemoteTaskFailure(_)
            | StateError::Dispatch(_) => ExecutionStatus::Failed,
            StateError::Collaborator(CollaboratorError::ConfigurationNotFound(_)) => {
                ExecutionStatus::Failed
            }
            StateError::Collaborator(_) | StateError::Protocol(_) | StateError::Internal(_) => {
                ExecutionStatus::Error
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_types::element::ElementType;

    #[test]
    fn builders_compose() {
        let response = ExecutionResponse::failed("boom");
        assert_eq!(response.terminal_status(), Some(ExecutionStatus::Failed));
        assert_eq!(response.error_message.as_deref(), Some("boom"));

        let response = ExecutionResponse::paused(vec!["approval-1".into()]);
        assert!(response.terminal_status().is_none());
        assert!(matches!(
            response.kind,
            ResponseKind::Async {
                status: ExecutionStatus::Paused,
                ..
            }
        ));
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(
            StateError::Configuration("no setting".into()).status(),
            ExecutionStatus::Failed
        );
        assert_eq!(
            StateError::Context(ContextError::MissingContextElement(ElementType::Phase)).status(),
            ExecutionStatus::Failed
        );
        assert_eq!(
            StateError::RemoteTaskFailure("agent said no".into()).status(),
            ExecutionStatus::Failed
        );
        assert_eq!(
            StateError::Protocol("no response".into()).status(),
            ExecutionStatus::Error
        );
        assert_eq!(
            StateError::Internal("bug".into()).status(),
            ExecutionStatus::Error
        );
    }

    #[test]
    fn remote_failure_message_passes_through() {
        let err = StateError::RemoteTaskFailure("cluster unreachable".into());
        assert_eq!(err.to_string(), "cluster unreachable");
    }
}
