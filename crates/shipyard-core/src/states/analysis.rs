//! Verification gate scored by a provider-specific [`DataCollector`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use shipyard_types::execution_data::{AnalysisExecutionData, ExecutionPayload, ScoreComparison};
use shipyard_types::instance::StateType;
use shipyard_types::notify::NotifyResponse;
use shipyard_types::status::ExecutionStatus;
use shipyard_types::task::{ActivityKind, DelegateTask, TaskType};

use super::start_activity;
use crate::collaborator::{ActivitySink, DataCollector, TaskDispatcher};
use crate::context::ExecutionContext;
use crate::state::{ExecutionResponse, State, StateError};

pub struct AnalysisState {
    pub name: String,
    pub collector: Arc<dyn DataCollector>,
    pub threshold: f64,
    pub comparison: ScoreComparison,
    pub timeout: Option<Duration>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub activities: Arc<dyn ActivitySink>,
}

impl std::fmt::Debug for AnalysisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisState")
            .field("name", &self.name)
            .field("provider", &self.collector.provider())
            .field("threshold", &self.threshold)
            .field("comparison", &self.comparison)
            .finish_non_exhaustive()
    }
}

impl State for AnalysisState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> StateType {
        StateType::Analysis
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<ExecutionResponse, StateError> {
        let provider = self.collector.provider().to_string();
        let request = self.collector.build_request(ctx)?;
        let activity_id = start_activity(self.activities.as_ref(), ctx, &provider, ActivityKind::Verification);
        let correlation_id = format!("{activity_id}:collect");

        let mut task = DelegateTask::new(
            ctx.app_id(),
            TaskType::DataCollection,
            correlation_id.clone(),
            json!({ "provider": provider, "request": request }),
        );
        task.timeout_secs = self.timeout.map(|t| t.as_secs());
        self.dispatcher.queue_task(task)?;

        Ok(ExecutionResponse::asynchronous(vec![correlation_id.clone()]).with_payload(
            ExecutionPayload::Analysis(AnalysisExecutionData {
                correlation_id,
                activity_id,
                provider,
                threshold: self.threshold,
                comparison: self.comparison,
                score: None,
            }),
        ))
    }

    fn handle_async_response(
        &self,
        ctx: &ExecutionContext<'_>,
        responses: &HashMap<String, NotifyResponse>,
    ) -> Result<ExecutionResponse, StateError> {
        let Some(mut data) = ctx.state_execution_data().analysis().cloned() else {
            return Err(StateError::Protocol("analysis resumed without analysis data".into()));
        };
        let result = responses
            .get(&data.correlation_id)
            .and_then(NotifyResponse::as_command)
            .ok_or_else(|| StateError::Protocol(format!("no collection result for '{}'", data.correlation_id)))?;

        if !result.is_success() {
            self.activities.update_status(data.activity_id, ExecutionStatus::Failed);
            return Err(StateError::RemoteTaskFailure(
                result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("{} data collection failed", data.provider)),
            ));
        }

        let score = self.collector.score(result)?;
        data.score = Some(score);
        let passed = data.comparison.passes(score, data.threshold);
        tracing::info!(
            instance_id = %ctx.instance_id(),
            provider = %data.provider,
            score,
            threshold = data.threshold,
            passed,
            "verification scored"
        );

        if passed {
            self.activities.update_status(data.activity_id, ExecutionStatus::Success);
            return Ok(ExecutionResponse::success().with_payload(ExecutionPayload::Analysis(data)));
        }
        self.activities.update_status(data.activity_id, ExecutionStatus::Failed);
        let relation = match data.comparison {
            ScoreComparison::AtLeast => "below",
            ScoreComparison::AtMost => "above",
        };
        let message = format!(
            "{} score {score:.2} is {relation} threshold {:.2}",
            data.provider, data.threshold
        );
        Ok(ExecutionResponse::failed(message).with_payload(ExecutionPayload::Analysis(data)))
    }

    fn handle_abort_event(&self, ctx: &ExecutionContext<'_>) {
        if let Some(data) = ctx.state_execution_data().analysis() {
            self.activities.update_status(data.activity_id, ExecutionStatus::Aborted);
        }
    }
}
