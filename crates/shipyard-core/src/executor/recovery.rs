//! Restart recovery: rebuild waits and queues from persisted instances.

use shipyard_types::instance::StateExecutionInstance;
use shipyard_types::status::ExecutionStatus;

use super::transition::child_response;
use super::{EngineCommand, ExecutorError, StateMachineExecutor};
use crate::repository::InstanceRepository;

impl<R: InstanceRepository> StateMachineExecutor<R> {
    /// Resume every non-terminal instance after a restart.
    ///
    /// Waiting instances re-register their correlation ids and replay the
    /// completions of children that finished before the restart; runnable
    /// NEW instances are queued; interrupted aborts are finished. Remote
    /// results lost with the old process must be re-notified by their
    /// collaborators. Returns the number of instances touched.
    pub async fn recover(&self) -> Result<usize, ExecutorError> {
        let active = self.inner.repo.list_active().await?;
        let mut touched = 0;

        for instance in active {
            match instance.status {
                ExecutionStatus::New => {
                    if self.recover_new(instance).await? {
                        touched += 1;
                    }
                }
                ExecutionStatus::Running | ExecutionStatus::Paused => {
                    if instance.correlation_ids.is_empty() {
                        self.complete(
                            instance,
                            ExecutionStatus::Error,
                            Some("interrupted by restart before suspending".to_string()),
                        )
                        .await?;
                        touched += 1;
                        continue;
                    }

                    let finished_children: Vec<_> = if instance.state_type.is_composite() {
                        self.inner
                            .repo
                            .list_by_parent(&instance.app_id, instance.id)
                            .await?
                            .into_iter()
                            .filter(|c| {
                                c.status.is_terminal()
                                    && c.notify_id
                                        .as_ref()
                                        .is_some_and(|id| instance.correlation_ids.contains(id))
                            })
                            .collect()
                    } else {
                        Vec::new()
                    };

                    let timeout = self
                        .inner
                        .registry
                        .get(&instance.state_name)
                        .and_then(|state| self.timeout_for(state.as_ref()));
                    tracing::info!(
                        instance_id = %instance.id,
                        state = %instance.state_name,
                        replayed = finished_children.len(),
                        "re-registering wait after restart"
                    );
                    self.register_wait(instance, timeout).await?;
                    for child in &finished_children {
                        if let Some(notify_id) = &child.notify_id {
                            self.deliver(notify_id, child_response(child));
                        }
                    }
                    touched += 1;
                }
                ExecutionStatus::Aborting => {
                    self.complete(
                        instance,
                        ExecutionStatus::Aborted,
                        Some("abort interrupted by restart".to_string()),
                    )
                    .await?;
                    touched += 1;
                }
                _ => {}
            }
        }
        tracing::info!(touched, "recovery complete");
        Ok(touched)
    }

    /// Queue a NEW instance whose predecessor finished before the restart,
    /// or finish the chain step the crash interrupted.
    async fn recover_new(&self, instance: StateExecutionInstance) -> Result<bool, ExecutorError> {
        // Earlier recovery steps may have moved it already.
        let Some(instance) = self.inner.repo.get(&instance.app_id, instance.id).await? else {
            return Ok(false);
        };
        if instance.status != ExecutionStatus::New {
            return Ok(false);
        }

        let Some(prev_id) = instance.prev_instance_id else {
            self.enqueue(EngineCommand::Dispatch {
                app_id: instance.app_id.clone(),
                instance_id: instance.id,
            });
            return Ok(true);
        };
        let Some(prev) = self.inner.repo.get(&instance.app_id, prev_id).await? else {
            tracing::warn!(instance_id = %instance.id, %prev_id, "serial predecessor missing");
            return Ok(false);
        };
        if !prev.status.is_terminal() {
            return Ok(false);
        }

        if prev.status.is_broke() {
            let siblings = match instance.parent_instance_id {
                Some(parent_id) => {
                    self.inner
                        .repo
                        .list_by_parent(&instance.app_id, parent_id)
                        .await?
                }
                None => Vec::new(),
            };
            tracing::info!(
                instance_id = %instance.id,
                prev_status = %prev.status,
                "skipping serial chain broken before restart"
            );
            self.skip_chain_from(&instance, &siblings).await?;
        } else {
            self.start_next_sibling(&prev, &instance).await?;
        }
        Ok(true)
    }
}
