//! Collaborator traits the core consumes.
//!
//! Implementations live in shipyard-infra or in the embedding application.
//! They are synchronous and object-safe: states call them from `execute`
//! and must never block on a remote result (remote work is queued and its
//! result comes back through the wait/notify coordinator).

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use shipyard_types::notify::{CommandResult, NotifyResponse};
use shipyard_types::resize::ServiceRevision;
use shipyard_types::status::ExecutionStatus;
use shipyard_types::task::{Activity, DelegateTask};

use crate::context::ExecutionContext;
use crate::notify::{NotifyError, NotifyOutcome};
use crate::state::StateError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher refused the task (no eligible agent, invalid payload).
    #[error("task rejected: {0}")]
    Rejected(String),

    #[error("task dispatcher unavailable")]
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("configuration not found: {0}")]
    ConfigurationNotFound(String),

    /// The cluster could not be inspected or modified.
    #[error("cluster error: {0}")]
    Cluster(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Hands work to remote agents.
pub trait TaskDispatcher: Send + Sync {
    /// Fire-and-forget; the result is later notified under `task.wait_id`.
    fn queue_task(&self, task: DelegateTask) -> Result<String, DispatchError>;

    /// Synchronous variant for short metadata fetches.
    fn execute_task(&self, task: DelegateTask) -> Result<CommandResult, DispatchError>;
}

/// Write-only audit trail. The core never reads activities back.
pub trait ActivitySink: Send + Sync {
    fn save(&self, activity: Activity) -> Uuid;

    fn update_status(&self, activity_id: Uuid, status: ExecutionStatus);
}

/// Looks up cloud provider and other settings by id.
pub trait SettingsResolver: Send + Sync {
    fn get(&self, setting_id: &str) -> Result<serde_json::Value, CollaboratorError>;
}

/// Reads and prunes container service state on a cluster.
pub trait ClusterInspector: Send + Sync {
    /// Current desired count of `service_name`, if the service exists.
    fn desired_count(
        &self,
        setting: &serde_json::Value,
        cluster: &str,
        service_name: &str,
    ) -> Result<Option<u32>, CollaboratorError>;

    /// Running count of every revision of the service family, oldest first.
    fn active_service_counts(
        &self,
        setting: &serde_json::Value,
        cluster: &str,
        service_name: &str,
    ) -> Result<Vec<(String, u32)>, CollaboratorError>;

    fn list_revisions(
        &self,
        setting: &serde_json::Value,
        cluster: &str,
        service_name: &str,
    ) -> Result<Vec<ServiceRevision>, CollaboratorError>;

    fn delete_revisions(
        &self,
        setting: &serde_json::Value,
        cluster: &str,
        revisions: &[ServiceRevision],
    ) -> Result<(), CollaboratorError>;
}

/// Provider-specific half of a verification gate.
///
/// Providers differ only in how they ask a remote agent for metrics and how
/// they turn the agent's answer into a score.
pub trait DataCollector: Send + Sync {
    fn provider(&self) -> &str;

    fn build_request(&self, ctx: &ExecutionContext<'_>) -> Result<serde_json::Value, StateError>;

    fn score(&self, result: &CommandResult) -> Result<f64, StateError>;
}

/// Entry point for results that arrive from outside the engine.
///
/// Pollers and API handlers deliver through this rather than the
/// coordinator, so discarded results are reported like any other.
pub trait ResultNotifier: Send + Sync {
    fn notify(
        &self,
        correlation_id: &str,
        response: NotifyResponse,
    ) -> Result<NotifyOutcome, NotifyError>;
}

/// Everything pipeline-defined states need from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub activities: Arc<dyn ActivitySink>,
    pub settings: Arc<dyn SettingsResolver>,
    pub cluster: Arc<dyn ClusterInspector>,
    /// Keyed by provider name.
    pub collectors: HashMap<String, Arc<dyn DataCollector>>,
}

impl Collaborators {
    pub fn collector(&self, provider: &str) -> Option<Arc<dyn DataCollector>> {
        self.collectors.get(provider).cloned()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<_> = self.collectors.keys().collect();
        providers.sort();
        f.debug_struct("Collaborators")
            .field("collectors", &providers)
            .finish_non_exhaustive()
    }
}
