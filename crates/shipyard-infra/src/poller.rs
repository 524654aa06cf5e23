//! Poll/backoff collaborator for remote tasks.
//!
//! Some agents cannot push results back. For those, `TaskPoller` asks a
//! [`TaskStatusSource`] whether a queued task has finished, backing off
//! exponentially between polls, and delivers the outcome through a
//! [`ResultNotifier`] (normally the executor). After the attempt budget is
//! spent the task is reported as failed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use shipyard_core::collaborator::ResultNotifier;
use shipyard_core::notify::NotifyOutcome;
use shipyard_types::config::EngineConfig;
use shipyard_types::notify::{CommandResult, NotifyResponse};
use shipyard_types::task::DelegateTask;

// ---------------------------------------------------------------------------
// Status source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending,
    Done(CommandResult),
}

/// Answers "has this task finished?" for one kind of remote agent.
///
/// A poll error counts as an attempt and is retried.
pub trait TaskStatusSource: Send + Sync + 'static {
    fn poll(
        &self,
        task: &DelegateTask,
    ) -> impl std::future::Future<Output = anyhow::Result<PollStatus>> + Send;
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.poll_initial_backoff_ms),
            max: Duration::from_millis(config.poll_max_backoff_ms),
            max_attempts: config.poll_max_attempts,
        }
    }

    /// Delay before poll number `attempt` (zero-based): doubles each time,
    /// capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

// ---------------------------------------------------------------------------
// TaskPoller
// ---------------------------------------------------------------------------

pub struct TaskPoller<S> {
    source: Arc<S>,
    notifier: Arc<dyn ResultNotifier>,
    backoff: Backoff,
}

impl<S> Clone for TaskPoller<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            notifier: Arc::clone(&self.notifier),
            backoff: self.backoff,
        }
    }
}

impl<S: TaskStatusSource> TaskPoller<S> {
    pub fn new(source: S, notifier: Arc<dyn ResultNotifier>, backoff: Backoff) -> Self {
        Self {
            source: Arc::new(source),
            notifier,
            backoff,
        }
    }

    /// Poll `task` until it finishes or the attempt budget runs out, then
    /// notify its result under `task.wait_id`.
    pub async fn watch(&self, task: DelegateTask) -> Option<NotifyOutcome> {
        for attempt in 0..self.backoff.max_attempts {
            tokio::time::sleep(self.backoff.delay(attempt)).await;
            match self.source.poll(&task).await {
                Ok(PollStatus::Done(result)) => {
                    tracing::debug!(
                        correlation_id = %task.wait_id,
                        attempt,
                        success = result.is_success(),
                        "task finished"
                    );
                    return self.deliver(&task, result);
                }
                Ok(PollStatus::Pending) => {}
                Err(e) => {
                    tracing::warn!(correlation_id = %task.wait_id, attempt, error = %e, "task poll failed");
                }
            }
        }

        tracing::warn!(
            correlation_id = %task.wait_id,
            attempts = self.backoff.max_attempts,
            "task did not finish, reporting failure"
        );
        let message = format!(
            "task {} did not complete after {} polls",
            task.wait_id, self.backoff.max_attempts
        );
        self.deliver(&task, CommandResult::failure(message))
    }

    fn deliver(&self, task: &DelegateTask, result: CommandResult) -> Option<NotifyOutcome> {
        match self
            .notifier
            .notify(&task.wait_id, NotifyResponse::Command(result))
        {
            Ok(outcome) => {
                if outcome == NotifyOutcome::Discarded {
                    tracing::debug!(correlation_id = %task.wait_id, "polled result discarded");
                }
                Some(outcome)
            }
            Err(e) => {
                tracing::warn!(correlation_id = %task.wait_id, error = %e, "polled result rejected");
                None
            }
        }
    }

    /// Consume queued tasks and watch each one on its own task until
    /// `shutdown` is cancelled. In-flight watches are cancelled with it.
    pub fn spawn(
        self,
        mut tasks: mpsc::UnboundedReceiver<DelegateTask>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("task poller shutting down");
                        break;
                    }
                    task = tasks.recv() => {
                        let Some(task) = task else { break };
                        let poller = self.clone();
                        let cancel = shutdown.child_token();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                _ = poller.watch(task) => {}
                            }
                        });
                    }
                }
            }
        })
    }
}
