//! Invoking states and interpreting their responses.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use shipyard_types::event::ExecutionEvent;
use shipyard_types::instance::StateExecutionInstance;
use shipyard_types::notify::NotifyResponse;
use shipyard_types::status::{ExecutionStatus, ExecutionStrategy};

use super::{EngineCommand, ExecutorError, StateMachineExecutor};
use crate::context::{ExecutionContext, ExecutionHistory, build_history};
use crate::repository::InstanceRepository;
use crate::state::{ChildInstance, ExecutionResponse, ResponseKind, StateError};

/// Run a state callback, converting a panic into an internal error.
pub(super) fn invoke<F>(f: F) -> Result<ExecutionResponse, StateError>
where
    F: FnOnce() -> Result<ExecutionResponse, StateError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(StateError::Internal(panic_message(panic.as_ref()))),
    }
}

pub(super) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "state panicked".to_string()
    }
}

impl<R: InstanceRepository> StateMachineExecutor<R> {
    pub(super) async fn dispatch(&self, app_id: &str, instance_id: Uuid) -> Result<(), ExecutorError> {
        let Some(mut instance) = self.inner.repo.get(app_id, instance_id).await? else {
            tracing::warn!(%instance_id, "dispatch of unknown instance ignored");
            return Ok(());
        };
        if instance.status != ExecutionStatus::New {
            tracing::debug!(%instance_id, status = %instance.status, "instance already dispatched");
            return Ok(());
        }
        let Some(state) = self.inner.registry.get(&instance.state_name) else {
            let message = ExecutorError::UnknownState(instance.state_name.clone()).to_string();
            return self
                .complete(instance, ExecutionStatus::Error, Some(message))
                .await;
        };

        let now = Utc::now();
        instance.status = ExecutionStatus::Running;
        instance.started_at = Some(now);
        instance.dispatch_seq += 1;
        instance.state_execution_data.status = ExecutionStatus::Running;
        instance.state_execution_data.started_at = Some(now);
        if !self
            .inner
            .repo
            .update_if_status(&instance, &[ExecutionStatus::New])
            .await?
        {
            tracing::debug!(%instance_id, "instance changed before dispatch, skipping");
            return Ok(());
        }

        self.inner.events.publish(ExecutionEvent::InstanceStarted {
            execution_id: instance.execution_id,
            instance_id: instance.id,
            state_name: instance.state_name.clone(),
        });
        tracing::debug!(
            execution_id = %instance.execution_id,
            %instance_id,
            state = %instance.state_name,
            "executing state"
        );

        let history = self.history(&instance).await?;
        let outcome = invoke(|| {
            let ctx = ExecutionContext::new(&instance, &history, &self.inner.resolvers);
            state.execute(&ctx)
        });
        let timeout = self.timeout_for(state.as_ref());
        self.apply(instance, timeout, outcome).await
    }

    pub(super) async fn resume(
        &self,
        app_id: &str,
        instance_id: Uuid,
        responses: HashMap<String, NotifyResponse>,
    ) -> Result<(), ExecutorError> {
        let Some(mut instance) = self.inner.repo.get(app_id, instance_id).await? else {
            tracing::warn!(%instance_id, "resume of unknown instance ignored");
            return Ok(());
        };
        if !ExecutionStatus::WAITING.contains(&instance.status) {
            tracing::debug!(%instance_id, status = %instance.status, "resume ignored, instance not waiting");
            return Ok(());
        }
        self.cancel_timer(instance.id);

        if let Some(missing) = instance
            .correlation_ids
            .iter()
            .find(|id| !responses.contains_key(*id))
        {
            tracing::error!(%instance_id, correlation_id = %missing, "resume without every correlation id");
            let message = format!("missing correlation id '{missing}' on resume");
            return self
                .complete(instance, ExecutionStatus::Error, Some(message))
                .await;
        }
        let Some(state) = self.inner.registry.get(&instance.state_name) else {
            let message = ExecutorError::UnknownState(instance.state_name.clone()).to_string();
            return self
                .complete(instance, ExecutionStatus::Error, Some(message))
                .await;
        };

        // Element-bearing responses bubble onto the resuming instance's stack.
        for id in &instance.correlation_ids {
            if let Some(response) = responses.get(id) {
                instance
                    .context_elements
                    .extend(response.context_elements().iter().cloned());
            }
        }
        instance.status = ExecutionStatus::Running;
        instance.state_execution_data.status = ExecutionStatus::Running;
        instance.wait_id = None;
        instance.dispatch_seq += 1;
        if !self
            .inner
            .repo
            .update_if_status(&instance, &ExecutionStatus::WAITING)
            .await?
        {
            return Ok(());
        }

        tracing::debug!(
            execution_id = %instance.execution_id,
            %instance_id,
            state = %instance.state_name,
            responses = responses.len(),
            "resuming state"
        );
        let history = self.history(&instance).await?;
        let outcome = invoke(|| {
            let ctx = ExecutionContext::new(&instance, &history, &self.inner.resolvers);
            state.handle_async_response(&ctx, &responses)
        });
        let timeout = self.timeout_for(state.as_ref());
        self.apply(instance, timeout, outcome).await
    }

    /// Persist the outcome of a state call and take the matching transition.
    async fn apply(
        &self,
        mut instance: StateExecutionInstance,
        timeout: Option<Duration>,
        outcome: Result<ExecutionResponse, StateError>,
    ) -> Result<(), ExecutorError> {
        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                let status = err.status();
                tracing::warn!(
                    instance_id = %instance.id,
                    state = %instance.state_name,
                    %status,
                    error = %err,
                    "state raised an error"
                );
                return self.complete(instance, status, Some(err.to_string())).await;
            }
        };

        let ExecutionResponse {
            kind,
            payload,
            error_message,
            context_elements,
            notify_elements,
        } = response;
        if let Some(payload) = payload {
            instance.state_execution_data.payload = payload;
        }
        if error_message.is_some() {
            instance.state_execution_data.error_message = error_message.clone();
        }
        instance.context_elements.extend(context_elements);
        instance.notify_elements.extend(notify_elements);

        match kind {
            ResponseKind::Immediate { status } if status.is_terminal() => {
                self.complete(instance, status, error_message).await
            }
            ResponseKind::Immediate { status } => {
                let message = format!("state returned non-terminal status {status} without correlation ids");
                self.complete(instance, ExecutionStatus::Error, Some(message))
                    .await
            }
            ResponseKind::Async {
                correlation_ids, ..
            } if correlation_ids.is_empty() => {
                let message = "async response without correlation ids".to_string();
                self.complete(instance, ExecutionStatus::Error, Some(message))
                    .await
            }
            ResponseKind::Async {
                status,
                correlation_ids,
            } => {
                if !ExecutionStatus::WAITING.contains(&status) {
                    let message = format!("async response with status {status}");
                    return self
                        .complete(instance, ExecutionStatus::Error, Some(message))
                        .await;
                }
                self.suspend(instance, status, correlation_ids, timeout).await
            }
            ResponseKind::Spawning { children, .. } if children.is_empty() => {
                self.complete(instance, ExecutionStatus::Success, None).await
            }
            ResponseKind::Spawning { children, strategy } => {
                self.spawn(instance, children, strategy, timeout).await
            }
        }
    }

    /// Wait for `correlation_ids` in `status` (RUNNING or PAUSED).
    async fn suspend(
        &self,
        mut instance: StateExecutionInstance,
        status: ExecutionStatus,
        correlation_ids: Vec<String>,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutorError> {
        instance.status = status;
        instance.state_execution_data.status = status;
        instance.correlation_ids = correlation_ids;
        self.register_wait(instance, timeout).await
    }

    /// Register the instance's correlation ids, persist it and arm its timer.
    pub(super) async fn register_wait(
        &self,
        mut instance: StateExecutionInstance,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutorError> {
        let callback = self.resume_callback(&instance);
        let wait_id = match self
            .inner
            .coordinator
            .wait_for_all(callback, &instance.correlation_ids)
        {
            Ok(wait_id) => wait_id,
            Err(e) => {
                tracing::error!(instance_id = %instance.id, error = %e, "wait registration failed");
                return self
                    .complete(instance, ExecutionStatus::Error, Some(e.to_string()))
                    .await;
            }
        };
        instance.wait_id = Some(wait_id);
        if !self
            .inner
            .repo
            .update_if_status(&instance, &ExecutionStatus::ACTIVE)
            .await?
        {
            self.inner.coordinator.cancel(wait_id);
            return Ok(());
        }

        self.arm_timer(&instance, timeout);
        self.inner.events.publish(ExecutionEvent::InstanceSuspended {
            execution_id: instance.execution_id,
            instance_id: instance.id,
            state_name: instance.state_name.clone(),
            correlation_ids: instance.correlation_ids.clone(),
        });
        tracing::debug!(
            instance_id = %instance.id,
            status = %instance.status,
            waits = instance.correlation_ids.len(),
            "instance suspended"
        );
        Ok(())
    }

    /// Create the composite's children and wait for all of them.
    async fn spawn(
        &self,
        mut parent: StateExecutionInstance,
        children: Vec<ChildInstance>,
        strategy: ExecutionStrategy,
        timeout: Option<Duration>,
    ) -> Result<(), ExecutorError> {
        let mut created = Vec::with_capacity(children.len());
        let mut prev: Option<Uuid> = None;
        for child in children {
            let Some(state) = self.inner.registry.get(&child.state_name) else {
                let message = format!("unknown child state '{}'", child.state_name);
                return self
                    .complete(parent, ExecutionStatus::Error, Some(message))
                    .await;
            };
            let mut instance = StateExecutionInstance::new(
                parent.app_id.clone(),
                parent.execution_id,
                child.state_name,
                state.state_type(),
            );
            instance.parent_instance_id = Some(parent.id);
            instance.notify_id = Some(instance.id.to_string());
            instance.context_elements = parent.context_elements.clone();
            instance.context_elements.extend(child.pushed_elements);
            instance.context_transition = child.context_element.is_some();
            instance.context_element = child.context_element;
            instance.rollback = child.rollback || parent.rollback || state.is_rollback();
            if strategy == ExecutionStrategy::Serial {
                instance.prev_instance_id = prev;
                prev = Some(instance.id);
            }
            created.push(instance);
        }

        self.inner.repo.insert_all(&created).await?;
        parent.child_strategy = Some(strategy);
        parent.correlation_ids = created
            .iter()
            .filter_map(|c| c.notify_id.clone())
            .collect();
        tracing::debug!(
            instance_id = %parent.id,
            state = %parent.state_name,
            children = created.len(),
            ?strategy,
            "spawning children"
        );

        let first_only = strategy == ExecutionStrategy::Serial;
        let to_dispatch: Vec<Uuid> = if first_only {
            created.iter().take(1).map(|c| c.id).collect()
        } else {
            created.iter().map(|c| c.id).collect()
        };
        let app_id = parent.app_id.clone();
        self.register_wait(parent, timeout).await?;
        for instance_id in to_dispatch {
            self.enqueue(EngineCommand::Dispatch {
                app_id: app_id.clone(),
                instance_id,
            });
        }
        Ok(())
    }

    /// Execution data of the execution's instances, by state name.
    pub(super) async fn history(
        &self,
        instance: &StateExecutionInstance,
    ) -> Result<ExecutionHistory, ExecutorError> {
        let instances = self
            .inner
            .repo
            .list_by_execution(&instance.app_id, instance.execution_id)
            .await?;
        Ok(build_history(instances))
    }
}
