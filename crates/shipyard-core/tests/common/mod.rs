//! Recording collaborators and executor wiring shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use shipyard_core::collaborator::{
    ActivitySink, ClusterInspector, CollaboratorError, Collaborators, DataCollector,
    DispatchError, SettingsResolver, TaskDispatcher,
};
use shipyard_core::context::ExecutionContext;
use shipyard_core::definition::{build_registry, parse_pipeline_yaml};
use shipyard_core::executor::StateMachineExecutor;
use shipyard_core::repository::InstanceRepository;
use shipyard_core::repository::memory::InMemoryInstanceStore;
use shipyard_core::state::{StateError, StateRegistry};
use shipyard_types::config::EngineConfig;
use shipyard_types::element::{ContextElement, ElementKind, WorkflowStandardParams};
use shipyard_types::instance::StateExecutionInstance;
use shipyard_types::notify::{CommandResult, NotifyResponse};
use shipyard_types::resize::ServiceRevision;
use shipyard_types::status::ExecutionStatus;
use shipyard_types::task::{Activity, DelegateTask, TaskType};

pub const APP: &str = "app-1";

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingDispatcher {
    tasks: Mutex<Vec<DelegateTask>>,
}

impl RecordingDispatcher {
    pub fn tasks(&self) -> Vec<DelegateTask> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn of_type(&self, task_type: TaskType) -> Vec<DelegateTask> {
        self.tasks()
            .into_iter()
            .filter(|t| t.task_type == task_type)
            .collect()
    }

    /// Wait id of the most recently queued task.
    pub fn last_wait_id(&self) -> String {
        self.tasks.lock().unwrap().last().unwrap().wait_id.clone()
    }
}

impl TaskDispatcher for RecordingDispatcher {
    fn queue_task(&self, task: DelegateTask) -> Result<String, DispatchError> {
        let id = task.id.to_string();
        self.tasks.lock().unwrap().push(task);
        Ok(id)
    }

    fn execute_task(&self, _task: DelegateTask) -> Result<CommandResult, DispatchError> {
        Ok(CommandResult::success())
    }
}

#[derive(Default)]
pub struct RecordingActivities {
    activities: Mutex<HashMap<Uuid, Activity>>,
}

impl RecordingActivities {
    pub fn by_state(&self, state_name: &str) -> Vec<Activity> {
        self.activities
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.state_name == state_name)
            .cloned()
            .collect()
    }

    pub fn status_of(&self, state_name: &str) -> Option<ExecutionStatus> {
        self.by_state(state_name).first().map(|a| a.status)
    }
}

impl ActivitySink for RecordingActivities {
    fn save(&self, activity: Activity) -> Uuid {
        let id = activity.id;
        self.activities.lock().unwrap().insert(id, activity);
        id
    }

    fn update_status(&self, activity_id: Uuid, status: ExecutionStatus) {
        if let Some(activity) = self.activities.lock().unwrap().get_mut(&activity_id) {
            activity.status = status;
        }
    }
}

pub struct StaticSettings;

impl SettingsResolver for StaticSettings {
    fn get(&self, setting_id: &str) -> Result<serde_json::Value, CollaboratorError> {
        match setting_id {
            "aws-prod" => Ok(serde_json::json!({ "region": "us-east-1" })),
            other => Err(CollaboratorError::ConfigurationNotFound(other.to_string())),
        }
    }
}

/// In-memory cluster: desired counts per service, revisions per family.
#[derive(Default)]
pub struct FakeCluster {
    pub desired: Mutex<HashMap<String, u32>>,
    pub active: Mutex<Vec<(String, u32)>>,
    pub revisions: Mutex<Vec<ServiceRevision>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

impl ClusterInspector for FakeCluster {
    fn desired_count(
        &self,
        _setting: &serde_json::Value,
        _cluster: &str,
        service_name: &str,
    ) -> Result<Option<u32>, CollaboratorError> {
        Ok(self.desired.lock().unwrap().get(service_name).copied())
    }

    fn active_service_counts(
        &self,
        _setting: &serde_json::Value,
        _cluster: &str,
        _service_name: &str,
    ) -> Result<Vec<(String, u32)>, CollaboratorError> {
        Ok(self.active.lock().unwrap().clone())
    }

    fn list_revisions(
        &self,
        _setting: &serde_json::Value,
        _cluster: &str,
        _service_name: &str,
    ) -> Result<Vec<ServiceRevision>, CollaboratorError> {
        Ok(self.revisions.lock().unwrap().clone())
    }

    fn delete_revisions(
        &self,
        _setting: &serde_json::Value,
        _cluster: &str,
        revisions: &[ServiceRevision],
    ) -> Result<(), CollaboratorError> {
        let mut stored = self.revisions.lock().unwrap();
        stored.retain(|r| !revisions.iter().any(|d| d.name == r.name));
        self.deleted
            .lock()
            .unwrap()
            .extend(revisions.iter().map(|r| r.name.clone()));
        Ok(())
    }
}

/// Scores a collection result by its `error_rate` output field.
pub struct ErrorRateCollector;

impl DataCollector for ErrorRateCollector {
    fn provider(&self) -> &str {
        "error-rate"
    }

    fn build_request(&self, ctx: &ExecutionContext<'_>) -> Result<serde_json::Value, StateError> {
        Ok(serde_json::json!({ "query": ctx.render_expression("errors{app=\"${context.app_id}\"}") }))
    }

    fn score(&self, result: &CommandResult) -> Result<f64, StateError> {
        result
            .output
            .get("error_rate")
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| StateError::Protocol("collection result without error_rate".into()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub type TestExecutor = StateMachineExecutor<Arc<InMemoryInstanceStore>>;

pub struct Harness {
    pub executor: TestExecutor,
    pub store: Arc<InMemoryInstanceStore>,
    pub registry: Arc<StateRegistry>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub activities: Arc<RecordingActivities>,
    pub cluster: Arc<FakeCluster>,
}

impl Harness {
    /// Build an executor for the pipeline in `yaml`.
    pub fn new(yaml: &str) -> Self {
        Self::with_config(yaml, EngineConfig::default())
    }

    pub fn with_config(yaml: &str, config: EngineConfig) -> Self {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let activities = Arc::new(RecordingActivities::default());
        let cluster = Arc::new(FakeCluster::default());
        let collaborators = Collaborators {
            dispatcher: dispatcher.clone(),
            activities: activities.clone(),
            settings: Arc::new(StaticSettings),
            cluster: cluster.clone(),
            collectors: HashMap::from([(
                "error-rate".to_string(),
                Arc::new(ErrorRateCollector) as Arc<dyn DataCollector>,
            )]),
        };
        let definition = parse_pipeline_yaml(yaml).unwrap();
        let registry = Arc::new(build_registry(&definition, &collaborators, &config).unwrap());
        let store = Arc::new(InMemoryInstanceStore::new());
        let executor = StateMachineExecutor::builder(store.clone(), registry.clone())
            .config(config)
            .build();
        Self {
            executor,
            store,
            registry,
            dispatcher,
            activities,
            cluster,
        }
    }

    pub async fn instances(&self, execution_id: Uuid) -> Vec<StateExecutionInstance> {
        self.store.list_by_execution(APP, execution_id).await.unwrap()
    }

    /// First instance of `state_name` in the execution.
    pub async fn named(&self, execution_id: Uuid, state_name: &str) -> StateExecutionInstance {
        self.instances(execution_id)
            .await
            .into_iter()
            .find(|i| i.state_name == state_name)
            .unwrap_or_else(|| panic!("no instance of '{state_name}'"))
    }

    /// Notify `wait_id` with `result` and drain the queue.
    pub async fn complete_task(&self, wait_id: &str, result: CommandResult) {
        self.executor
            .notify(wait_id, NotifyResponse::Command(result))
            .unwrap();
        self.executor.run_until_idle().await.unwrap();
    }

    /// A second executor over the same store, as after a restart.
    pub fn restarted(&self) -> TestExecutor {
        StateMachineExecutor::builder(self.store.clone(), self.registry.clone()).build()
    }
}

pub fn standard_params() -> ContextElement {
    ContextElement::new(
        "standard",
        ElementKind::Standard(WorkflowStandardParams {
            app_id: APP.into(),
            env_id: Some("prod".into()),
            variables: Default::default(),
        }),
    )
}
