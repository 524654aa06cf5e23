//! Terminal transitions: completing an instance, notifying its parent and
//! advancing or breaking a SERIAL sibling chain.

use chrono::Utc;

use shipyard_types::event::ExecutionEvent;
use shipyard_types::instance::StateExecutionInstance;
use shipyard_types::notify::{ElementNotifyResponse, NotifyResponse};
use shipyard_types::status::{ExecutionStatus, ExecutionStrategy};

use super::{EngineCommand, ExecutorError, StateMachineExecutor};
use crate::notify::NotifyOutcome;
use crate::repository::InstanceRepository;

/// Completion report a finished child sends to its parent.
pub(super) fn child_response(instance: &StateExecutionInstance) -> NotifyResponse {
    let data = &instance.state_execution_data;
    NotifyResponse::Element(ElementNotifyResponse {
        state_name: instance.state_name.clone(),
        status: instance.status,
        error_message: data.error_message.clone(),
        context_elements: instance.notify_elements.clone(),
        context_element: instance.context_element.clone(),
        summary: Some(data.step_summary()),
        started_at: instance.started_at,
        ended_at: instance.ended_at,
    })
}

impl<R: InstanceRepository> StateMachineExecutor<R> {
    /// Move `instance` to terminal `status` and run its end transition.
    ///
    /// A no-op if the stored instance is already terminal.
    pub(super) async fn complete(
        &self,
        mut instance: StateExecutionInstance,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> Result<(), ExecutorError> {
        let now = Utc::now();
        instance.status = status;
        instance.ended_at = Some(now);
        instance.wait_id = None;
        let data = &mut instance.state_execution_data;
        data.status = status;
        data.ended_at = Some(now);
        if error_message.is_some() {
            data.error_message = error_message;
        }
        if !self
            .inner
            .repo
            .update_if_status(&instance, &ExecutionStatus::ACTIVE)
            .await?
        {
            tracing::debug!(instance_id = %instance.id, "instance already terminal");
            return Ok(());
        }
        self.cancel_timer(instance.id);

        self.inner.events.publish(ExecutionEvent::InstanceCompleted {
            execution_id: instance.execution_id,
            instance_id: instance.id,
            state_name: instance.state_name.clone(),
            status,
            error_message: instance.state_execution_data.error_message.clone(),
        });
        tracing::info!(
            execution_id = %instance.execution_id,
            instance_id = %instance.id,
            state = %instance.state_name,
            %status,
            "instance completed"
        );

        self.end_transition(&instance).await
    }

    async fn end_transition(&self, instance: &StateExecutionInstance) -> Result<(), ExecutorError> {
        let (Some(parent_id), Some(notify_id)) = (instance.parent_instance_id, &instance.notify_id)
        else {
            if instance.is_root() {
                self.inner.events.publish(ExecutionEvent::ExecutionCompleted {
                    execution_id: instance.execution_id,
                    status: instance.status,
                });
                tracing::info!(
                    execution_id = %instance.execution_id,
                    status = %instance.status,
                    "execution completed"
                );
                self.release_execution(instance).await?;
            }
            return Ok(());
        };

        self.deliver(notify_id, child_response(instance));

        let parent = self.inner.repo.get(&instance.app_id, parent_id).await?;
        if parent.and_then(|p| p.child_strategy) == Some(ExecutionStrategy::Serial) {
            self.advance_serial_chain(instance).await?;
        }
        Ok(())
    }

    /// Dispatch the next SERIAL sibling, or skip the rest of the chain when
    /// `finished` broke it.
    async fn advance_serial_chain(&self, finished: &StateExecutionInstance) -> Result<(), ExecutorError> {
        let Some(parent_id) = finished.parent_instance_id else {
            return Ok(());
        };
        let siblings = self
            .inner
            .repo
            .list_by_parent(&finished.app_id, parent_id)
            .await?;
        let Some(next) = siblings
            .iter()
            .find(|s| s.prev_instance_id == Some(finished.id))
        else {
            return Ok(());
        };

        if finished.status.is_broke() {
            tracing::debug!(
                instance_id = %finished.id,
                status = %finished.status,
                "serial chain broken, skipping remaining siblings"
            );
            self.skip_chain_from(next, &siblings).await
        } else {
            self.start_next_sibling(finished, next).await
        }
    }

    /// Hand `finished`'s notify elements to `next` and queue it.
    ///
    /// Elements `next` already carries are not added twice, so a chain step
    /// replayed after a restart is idempotent.
    pub(super) async fn start_next_sibling(
        &self,
        finished: &StateExecutionInstance,
        next: &StateExecutionInstance,
    ) -> Result<(), ExecutorError> {
        let mut next = next.clone();
        for element in &finished.notify_elements {
            if !next.context_elements.iter().any(|e| e.id == element.id) {
                next.context_elements.push(element.clone());
            }
        }
        if self
            .inner
            .repo
            .update_if_status(&next, &[ExecutionStatus::New])
            .await?
        {
            self.enqueue(EngineCommand::Dispatch {
                app_id: next.app_id.clone(),
                instance_id: next.id,
            });
        }
        Ok(())
    }

    /// Mark `first` and every NEW sibling chained after it SKIPPED and
    /// notify their parent.
    pub(super) async fn skip_chain_from(
        &self,
        first: &StateExecutionInstance,
        siblings: &[StateExecutionInstance],
    ) -> Result<(), ExecutorError> {
        let next_of = |id: uuid::Uuid| siblings.iter().find(|s| s.prev_instance_id == Some(id));
        let mut cursor = Some(first);
        while let Some(sibling) = cursor {
            cursor = next_of(sibling.id);
            if sibling.status != ExecutionStatus::New {
                continue;
            }
            let mut skipped = sibling.clone();
            skipped.status = ExecutionStatus::Skipped;
            skipped.ended_at = Some(Utc::now());
            skipped.state_execution_data.status = ExecutionStatus::Skipped;
            if !self
                .inner
                .repo
                .update_if_status(&skipped, &[ExecutionStatus::New])
                .await?
            {
                continue;
            }
            self.inner.events.publish(ExecutionEvent::InstanceCompleted {
                execution_id: skipped.execution_id,
                instance_id: skipped.id,
                state_name: skipped.state_name.clone(),
                status: ExecutionStatus::Skipped,
                error_message: None,
            });
            if let Some(notify_id) = &skipped.notify_id {
                self.deliver(
                    notify_id,
                    NotifyResponse::Element(ElementNotifyResponse::skipped(&skipped.state_name)),
                );
            }
        }
        Ok(())
    }

    /// Drop the coordinator's delivered ids for `root`'s execution once no
    /// instance of it is active. A rollback root still running in the same
    /// execution keeps them.
    async fn release_execution(&self, root: &StateExecutionInstance) -> Result<(), ExecutorError> {
        let instances = self
            .inner
            .repo
            .list_by_execution(&root.app_id, root.execution_id)
            .await?;
        if instances.iter().any(|i| i.status.is_active()) {
            return Ok(());
        }
        let ids: Vec<String> = instances
            .iter()
            .flat_map(|i| i.notify_id.iter().chain(&i.correlation_ids))
            .cloned()
            .collect();
        self.inner.coordinator.forget(&ids);
        tracing::debug!(
            execution_id = %root.execution_id,
            ids = ids.len(),
            "execution correlation ids released"
        );
        Ok(())
    }

    /// Notify the coordinator on behalf of the engine itself.
    ///
    /// Duplicates here mean the engine lost track of an instance; they are
    /// logged as protocol violations.
    pub(super) fn deliver(&self, correlation_id: &str, response: NotifyResponse) {
        match self.inner.coordinator.notify(correlation_id, response) {
            Ok(NotifyOutcome::Discarded) => {
                self.inner.events.publish(ExecutionEvent::NotificationDiscarded {
                    correlation_id: correlation_id.to_string(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(correlation_id, error = %e, "protocol violation delivering completion");
            }
        }
    }
}
