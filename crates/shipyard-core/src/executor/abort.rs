//! Aborts and timeouts.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shipyard_types::event::ExecutionEvent;
use shipyard_types::instance::StateExecutionInstance;
use shipyard_types::status::ExecutionStatus;

use super::dispatch::panic_message;
use super::{EngineCommand, ExecutorError, StateMachineExecutor};
use crate::context::ExecutionContext;
use crate::repository::InstanceRepository;

impl<R: InstanceRepository> StateMachineExecutor<R> {
    /// Abort `instance_id` and every non-terminal descendant.
    ///
    /// All affected waits are cancelled first, then abort handlers run
    /// deepest first and each instance is forced to ABORTED.
    pub(super) async fn abort_tree(
        &self,
        app_id: &str,
        instance_id: Uuid,
        reason: &str,
    ) -> Result<(), ExecutorError> {
        let Some(root) = self.inner.repo.get(app_id, instance_id).await? else {
            tracing::warn!(%instance_id, "abort of unknown instance ignored");
            return Ok(());
        };
        if root.status.is_terminal() {
            tracing::debug!(%instance_id, status = %root.status, "abort ignored, instance already terminal");
            return Ok(());
        }

        let mut targets = vec![root];
        let mut cursor = 0;
        while cursor < targets.len() {
            let children = self
                .inner
                .repo
                .list_by_parent(app_id, targets[cursor].id)
                .await?;
            targets.extend(children.into_iter().filter(|c| c.status.is_active()));
            cursor += 1;
        }

        let mut aborting: Vec<(StateExecutionInstance, ExecutionStatus)> = Vec::new();
        for mut target in targets {
            let previous = target.status;
            if previous == ExecutionStatus::Aborting {
                aborting.push((target, previous));
                continue;
            }
            target.status = ExecutionStatus::Aborting;
            target.state_execution_data.status = ExecutionStatus::Aborting;
            if !self
                .inner
                .repo
                .update_if_status(
                    &target,
                    &[
                        ExecutionStatus::New,
                        ExecutionStatus::Running,
                        ExecutionStatus::Paused,
                    ],
                )
                .await?
            {
                continue;
            }
            if let Some(wait_id) = target.wait_id {
                self.inner.coordinator.cancel(wait_id);
            }
            self.cancel_timer(target.id);
            aborting.push((target, previous));
        }

        tracing::info!(%instance_id, count = aborting.len(), reason, "aborting instances");
        for (target, previous) in aborting.into_iter().rev() {
            if previous != ExecutionStatus::New {
                self.run_abort_handler(&target).await?;
            }
            self.complete(target, ExecutionStatus::Aborted, Some(reason.to_string()))
                .await?;
        }
        Ok(())
    }

    async fn run_abort_handler(&self, instance: &StateExecutionInstance) -> Result<(), ExecutorError> {
        let Some(state) = self.inner.registry.get(&instance.state_name) else {
            return Ok(());
        };
        let history = self.history(instance).await?;
        let result = catch_unwind(AssertUnwindSafe(|| {
            let ctx = ExecutionContext::new(instance, &history, &self.inner.resolvers);
            state.handle_abort_event(&ctx);
        }));
        if let Err(panic) = result {
            tracing::error!(
                instance_id = %instance.id,
                state = %instance.state_name,
                panic = %panic_message(panic.as_ref()),
                "abort handler panicked"
            );
        }
        Ok(())
    }

    pub(super) async fn on_timeout(
        &self,
        app_id: &str,
        instance_id: Uuid,
        dispatch_seq: u32,
        after: Duration,
    ) -> Result<(), ExecutorError> {
        let Some(instance) = self.inner.repo.get(app_id, instance_id).await? else {
            return Ok(());
        };
        if instance.dispatch_seq != dispatch_seq
            || !ExecutionStatus::WAITING.contains(&instance.status)
        {
            tracing::debug!(%instance_id, "stale timeout ignored");
            return Ok(());
        }

        tracing::warn!(
            %instance_id,
            state = %instance.state_name,
            timeout_secs = after.as_secs(),
            "state timed out"
        );
        self.inner.events.publish(ExecutionEvent::InstanceTimedOut {
            execution_id: instance.execution_id,
            instance_id,
            state_name: instance.state_name.clone(),
            timeout_secs: after.as_secs(),
        });
        let reason = format!("timed out after {}s", after.as_secs());
        self.abort_tree(app_id, instance_id, &reason).await
    }

    /// Schedule a timeout for the instance's current dispatch.
    pub(super) fn arm_timer(&self, instance: &StateExecutionInstance, timeout: Option<Duration>) {
        let Some(after) = timeout else {
            return;
        };
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.timers.insert(instance.id, token.clone()) {
            previous.cancel();
        }

        let commands = self.inner.commands.clone();
        let command = EngineCommand::Timeout {
            app_id: instance.app_id.clone(),
            instance_id: instance.id,
            dispatch_seq: instance.dispatch_seq,
            after,
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    let _ = commands.send(command);
                }
            }
        });
    }

    pub(super) fn cancel_timer(&self, instance_id: Uuid) {
        if let Some((_, token)) = self.inner.timers.remove(&instance_id) {
            token.cancel();
        }
    }
}
