//! State machine executor.
//!
//! Drives every state execution instance from NEW to a terminal status:
//! invokes the state, interprets its response, persists the result and
//! registers correlation ids with the wait/notify coordinator. Work arrives
//! as [`EngineCommand`]s on a single queue, so transitions of any one
//! instance are serialized and no task ever blocks on a remote result.

mod abort;
mod dispatch;
mod recovery;
mod transition;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use shipyard_types::config::EngineConfig;
use shipyard_types::element::ContextElement;
use shipyard_types::error::RepositoryError;
use shipyard_types::event::ExecutionEvent;
use shipyard_types::instance::StateExecutionInstance;
use shipyard_types::notify::NotifyResponse;

use crate::collaborator::ResultNotifier;
use crate::context::VariableResolver;
use crate::event::EventBus;
use crate::notify::{NotifyCallback, NotifyError, NotifyOutcome, WaitNotifyCoordinator};
use crate::repository::InstanceRepository;
use crate::state::{State, StateRegistry};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("no state named '{0}' is registered")]
    UnknownState(String),
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Unit of work on the executor queue.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Dispatch {
        app_id: String,
        instance_id: Uuid,
    },
    Resume {
        app_id: String,
        instance_id: Uuid,
        responses: HashMap<String, NotifyResponse>,
    },
    Timeout {
        app_id: String,
        instance_id: Uuid,
        dispatch_seq: u32,
        after: Duration,
    },
    Abort {
        app_id: String,
        instance_id: Uuid,
        reason: String,
    },
}

/// Coordinator callback that turns a completed wait into a resume command.
struct ResumeCallback {
    app_id: String,
    instance_id: Uuid,
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl NotifyCallback for ResumeCallback {
    fn on_complete(&self, responses: HashMap<String, NotifyResponse>) {
        let command = EngineCommand::Resume {
            app_id: self.app_id.clone(),
            instance_id: self.instance_id,
            responses,
        };
        if self.commands.send(command).is_err() {
            tracing::error!(instance_id = %self.instance_id, "executor queue closed, resume dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Execution requests
// ---------------------------------------------------------------------------

/// Request to start a root instance.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub app_id: String,
    pub execution_id: Uuid,
    pub state_name: String,
    /// Initial context stack, bottom first.
    pub elements: Vec<ContextElement>,
    pub rollback: bool,
}

impl ExecutionRequest {
    pub fn new(app_id: impl Into<String>, state_name: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            execution_id: Uuid::now_v7(),
            state_name: state_name.into(),
            elements: Vec::new(),
            rollback: false,
        }
    }

    /// Run inside an existing execution (rollbacks read its history).
    pub fn in_execution(mut self, execution_id: Uuid) -> Self {
        self.execution_id = execution_id;
        self
    }

    pub fn with_element(mut self, element: ContextElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn rollback(mut self) -> Self {
        self.rollback = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

struct Inner<R> {
    repo: R,
    registry: Arc<StateRegistry>,
    coordinator: WaitNotifyCoordinator,
    events: EventBus,
    config: EngineConfig,
    resolvers: Vec<Arc<dyn VariableResolver>>,
    commands: mpsc::UnboundedSender<EngineCommand>,
    inbox: Mutex<mpsc::UnboundedReceiver<EngineCommand>>,
    /// Armed timeout per suspended instance.
    timers: DashMap<Uuid, CancellationToken>,
}

/// Drives state execution instances stored in `R`.
pub struct StateMachineExecutor<R: InstanceRepository> {
    inner: Arc<Inner<R>>,
}

impl<R: InstanceRepository> Clone for StateMachineExecutor<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: InstanceRepository> ResultNotifier for StateMachineExecutor<R> {
    fn notify(
        &self,
        correlation_id: &str,
        response: NotifyResponse,
    ) -> Result<NotifyOutcome, NotifyError> {
        StateMachineExecutor::notify(self, correlation_id, response)
    }
}

pub struct ExecutorBuilder<R> {
    repo: R,
    registry: Arc<StateRegistry>,
    coordinator: Option<WaitNotifyCoordinator>,
    events: Option<EventBus>,
    config: EngineConfig,
    resolvers: Vec<Arc<dyn VariableResolver>>,
}

impl<R: InstanceRepository> ExecutorBuilder<R> {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a coordinator with the notify path (task pollers, APIs).
    pub fn coordinator(mut self, coordinator: WaitNotifyCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn variable_resolver(mut self, resolver: Arc<dyn VariableResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn build(self) -> StateMachineExecutor<R> {
        let (commands, inbox) = mpsc::unbounded_channel();
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(self.config.event_bus_capacity));
        StateMachineExecutor {
            inner: Arc::new(Inner {
                repo: self.repo,
                registry: self.registry,
                coordinator: self.coordinator.unwrap_or_default(),
                events,
                config: self.config,
                resolvers: self.resolvers,
                commands,
                inbox: Mutex::new(inbox),
                timers: DashMap::new(),
            }),
        }
    }
}

impl<R: InstanceRepository> StateMachineExecutor<R> {
    pub fn builder(repo: R, registry: Arc<StateRegistry>) -> ExecutorBuilder<R> {
        ExecutorBuilder {
            repo,
            registry,
            coordinator: None,
            events: None,
            config: EngineConfig::default(),
            resolvers: Vec::new(),
        }
    }

    pub fn coordinator(&self) -> &WaitNotifyCoordinator {
        &self.inner.coordinator
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn repository(&self) -> &R {
        &self.inner.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Create and queue the root instance of an execution.
    pub async fn start(
        &self,
        request: ExecutionRequest,
    ) -> Result<StateExecutionInstance, ExecutorError> {
        let state = self
            .inner
            .registry
            .get(&request.state_name)
            .ok_or_else(|| ExecutorError::UnknownState(request.state_name.clone()))?;

        let mut instance = StateExecutionInstance::new(
            request.app_id,
            request.execution_id,
            request.state_name,
            state.state_type(),
        );
        instance.context_elements = request.elements;
        instance.rollback = request.rollback || state.is_rollback();
        self.inner.repo.insert(&instance).await?;

        tracing::info!(
            execution_id = %instance.execution_id,
            instance_id = %instance.id,
            state = %instance.state_name,
            "execution started"
        );
        self.enqueue(EngineCommand::Dispatch {
            app_id: instance.app_id.clone(),
            instance_id: instance.id,
        });
        Ok(instance)
    }

    /// Request an abort of `instance_id` and its running descendants.
    pub fn abort(&self, app_id: &str, instance_id: Uuid, reason: impl Into<String>) {
        self.enqueue(EngineCommand::Abort {
            app_id: app_id.to_string(),
            instance_id,
            reason: reason.into(),
        });
    }

    /// Deliver a remote result. The only way external results re-enter the engine.
    pub fn notify(
        &self,
        correlation_id: &str,
        response: NotifyResponse,
    ) -> Result<NotifyOutcome, NotifyError> {
        let outcome = self.inner.coordinator.notify(correlation_id, response)?;
        if outcome == NotifyOutcome::Discarded {
            self.inner.events.publish(ExecutionEvent::NotificationDiscarded {
                correlation_id: correlation_id.to_string(),
            });
        }
        Ok(outcome)
    }

    pub async fn instance(
        &self,
        app_id: &str,
        instance_id: Uuid,
    ) -> Result<Option<StateExecutionInstance>, ExecutorError> {
        Ok(self.inner.repo.get(app_id, instance_id).await?)
    }

    /// Process queued commands until the queue is empty.
    ///
    /// Returns the number of commands processed. Commands produced while
    /// processing are handled in the same call.
    pub async fn run_until_idle(&self) -> Result<usize, ExecutorError> {
        let mut inbox = self.inner.inbox.lock().await;
        let mut processed = 0;
        while let Ok(command) = inbox.try_recv() {
            self.process(command).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Process commands until `shutdown` is cancelled.
    ///
    /// Errors are logged and the loop keeps going.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut inbox = self.inner.inbox.lock().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("executor shutting down");
                    break;
                }
                command = inbox.recv() => {
                    let Some(command) = command else { break };
                    if let Err(e) = self.process(command).await {
                        tracing::error!(error = %e, "executor command failed");
                    }
                }
            }
        }
    }

    async fn process(&self, command: EngineCommand) -> Result<(), ExecutorError> {
        match command {
            EngineCommand::Dispatch {
                app_id,
                instance_id,
            } => self.dispatch(&app_id, instance_id).await,
            EngineCommand::Resume {
                app_id,
                instance_id,
                responses,
            } => self.resume(&app_id, instance_id, responses).await,
            EngineCommand::Timeout {
                app_id,
                instance_id,
                dispatch_seq,
                after,
            } => self.on_timeout(&app_id, instance_id, dispatch_seq, after).await,
            EngineCommand::Abort {
                app_id,
                instance_id,
                reason,
            } => self.abort_tree(&app_id, instance_id, &reason).await,
        }
    }

    fn enqueue(&self, command: EngineCommand) {
        if self.inner.commands.send(command).is_err() {
            tracing::error!("executor queue closed, command dropped");
        }
    }

    fn resume_callback(&self, instance: &StateExecutionInstance) -> Arc<dyn NotifyCallback> {
        Arc::new(ResumeCallback {
            app_id: instance.app_id.clone(),
            instance_id: instance.id,
            commands: self.inner.commands.clone(),
        })
    }

    /// Composites only time out when they declare a timeout; leaves fall
    /// back to the engine default.
    fn timeout_for(&self, state: &dyn State) -> Option<Duration> {
        state.timeout().or_else(|| {
            (!state.state_type().is_composite())
                .then(|| Duration::from_secs(self.inner.config.default_state_timeout_secs))
        })
    }
}

impl<R: InstanceRepository> std::fmt::Debug for StateMachineExecutor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachineExecutor")
            .field("registry", &self.inner.registry)
            .field("coordinator", &self.inner.coordinator)
            .field("armed_timers", &self.inner.timers.len())
            .finish()
    }
}
