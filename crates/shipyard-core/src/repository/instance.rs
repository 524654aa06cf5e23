//! State execution instance repository trait definition.

use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use shipyard_types::error::RepositoryError;
use shipyard_types::instance::StateExecutionInstance;
use shipyard_types::status::ExecutionStatus;

/// Repository trait for state execution instances.
///
/// Instances are keyed by `(app_id, execution_id, instance_id)`; instance
/// ids are globally unique so lookups only need `(app_id, instance_id)`.
/// Implementations live in shipyard-infra (e.g., SqliteInstanceRepository).
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait InstanceRepository: Send + Sync {
    /// Insert a new instance. Fails with `Conflict` if the id exists.
    fn insert(
        &self,
        instance: &StateExecutionInstance,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Insert several instances atomically.
    fn insert_all(
        &self,
        instances: &[StateExecutionInstance],
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        app_id: &str,
        instance_id: Uuid,
    ) -> impl Future<Output = Result<Option<StateExecutionInstance>, RepositoryError>> + Send;

    /// Replace the stored instance if its current status is one of `expected`.
    ///
    /// Returns `false` (and writes nothing) when the stored status differs.
    fn update_if_status(
        &self,
        instance: &StateExecutionInstance,
        expected: &[ExecutionStatus],
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Children of `parent_id` in creation order.
    fn list_by_parent(
        &self,
        app_id: &str,
        parent_id: Uuid,
    ) -> impl Future<Output = Result<Vec<StateExecutionInstance>, RepositoryError>> + Send;

    /// Every instance of one execution in creation order.
    fn list_by_execution(
        &self,
        app_id: &str,
        execution_id: Uuid,
    ) -> impl Future<Output = Result<Vec<StateExecutionInstance>, RepositoryError>> + Send;

    /// Every non-terminal instance across all executions (used by recovery).
    fn list_active(
        &self,
    ) -> impl Future<Output = Result<Vec<StateExecutionInstance>, RepositoryError>> + Send;
}

/// Shared stores: an executor and its recovery path can hold the same one.
impl<T: InstanceRepository> InstanceRepository for Arc<T> {
    fn insert(
        &self,
        instance: &StateExecutionInstance,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send {
        (**self).insert(instance)
    }

    fn insert_all(
        &self,
        instances: &[StateExecutionInstance],
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send {
        (**self).insert_all(instances)
    }

    fn get(
        &self,
        app_id: &str,
        instance_id: Uuid,
    ) -> impl Future<Output = Result<Option<StateExecutionInstance>, RepositoryError>> + Send {
        (**self).get(app_id, instance_id)
    }

    fn update_if_status(
        &self,
        instance: &StateExecutionInstance,
        expected: &[ExecutionStatus],
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send {
        (**self).update_if_status(instance, expected)
    }

    fn list_by_parent(
        &self,
        app_id: &str,
        parent_id: Uuid,
    ) -> impl Future<Output = Result<Vec<StateExecutionInstance>, RepositoryError>> + Send {
        (**self).list_by_parent(app_id, parent_id)
    }

    fn list_by_execution(
        &self,
        app_id: &str,
        execution_id: Uuid,
    ) -> impl Future<Output = Result<Vec<StateExecutionInstance>, RepositoryError>> + Send {
        (**self).list_by_execution(app_id, execution_id)
    }

    fn list_active(
        &self,
    ) -> impl Future<Output = Result<Vec<StateExecutionInstance>, RepositoryError>> + Send {
        (**self).list_active()
    }
}
