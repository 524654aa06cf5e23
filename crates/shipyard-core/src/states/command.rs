//! Run a named command on a remote agent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use shipyard_types::element::{ContextElement, ElementKind, InstanceListElement};
use shipyard_types::execution_data::{CommandExecutionData, ExecutionPayload};
use shipyard_types::instance::StateType;
use shipyard_types::notify::NotifyResponse;
use shipyard_types::status::ExecutionStatus;
use shipyard_types::task::{ActivityKind, DelegateTask, TaskType};

use super::start_activity;
use crate::collaborator::{ActivitySink, TaskDispatcher};
use crate::context::ExecutionContext;
use crate::state::{ExecutionResponse, State, StateError};

/// Queues one command and completes with the agent's result.
///
/// Elements the agent reports (a freshly created container service, the
/// hosts it touched) are handed on to the parent and the next sibling.
pub struct CommandState {
    pub name: String,
    pub command_name: String,
    /// String values may contain `${...}` references.
    pub parameters: Value,
    pub rollback: bool,
    pub timeout: Option<Duration>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub activities: Arc<dyn ActivitySink>,
}

impl std::fmt::Debug for CommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandState")
            .field("name", &self.name)
            .field("command_name", &self.command_name)
            .field("rollback", &self.rollback)
            .finish_non_exhaustive()
    }
}

/// Render every string in `value`.
fn render_value(ctx: &ExecutionContext<'_>, value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(ctx.render_expression(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(ctx, v)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(ctx, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl State for CommandState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> StateType {
        StateType::Command
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn is_rollback(&self) -> bool {
        self.rollback
    }

    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<ExecutionResponse, StateError> {
        let parameters = render_value(ctx, &self.parameters);
        let activity_id = start_activity(self.activities.as_ref(), ctx, &self.command_name, ActivityKind::Command);
        let correlation_id = activity_id.to_string();

        let mut task = DelegateTask::new(
            ctx.app_id(),
            TaskType::Command,
            correlation_id.clone(),
            json!({ "command_name": self.command_name, "parameters": parameters }),
        );
        task.timeout_secs = self.timeout.map(|t| t.as_secs());
        self.dispatcher.queue_task(task)?;
        tracing::debug!(
            instance_id = %ctx.instance_id(),
            command = %self.command_name,
            correlation_id = %correlation_id,
            "command queued"
        );

        Ok(ExecutionResponse::asynchronous(vec![correlation_id.clone()]).with_payload(
            ExecutionPayload::Command(CommandExecutionData {
                command_name: self.command_name.clone(),
                activity_id,
                correlation_id,
                output: Value::Null,
            }),
        ))
    }

    fn handle_async_response(
        &self,
        ctx: &ExecutionContext<'_>,
        responses: &HashMap<String, NotifyResponse>,
    ) -> Result<ExecutionResponse, StateError> {
        let Some(mut data) = ctx.state_execution_data().command().cloned() else {
            return Err(StateError::Protocol("command resumed without command data".into()));
        };
        let result = responses
            .get(&data.correlation_id)
            .and_then(NotifyResponse::as_command)
            .ok_or_else(|| StateError::Protocol(format!("no command result for '{}'", data.correlation_id)))?;

        if !result.is_success() {
            self.activities.update_status(data.activity_id, ExecutionStatus::Failed);
            return Err(StateError::RemoteTaskFailure(
                result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("command '{}' failed", data.command_name)),
            ));
        }
        self.activities.update_status(data.activity_id, ExecutionStatus::Success);
        data.output = result.output.clone();

        let mut response = ExecutionResponse::success().with_payload(ExecutionPayload::Command(data));
        for element in &result.context_elements {
            response = response.with_notify_element(element.clone());
        }
        if !result.instances.is_empty() {
            response = response.with_notify_element(ContextElement::new(
                self.command_name.clone(),
                ElementKind::InstanceList(InstanceListElement {
                    instances: result.instances.clone(),
                }),
            ));
        }
        Ok(response)
    }

    fn handle_abort_event(&self, ctx: &ExecutionContext<'_>) {
        if let Some(data) = ctx.state_execution_data().command() {
            self.activities.update_status(data.activity_id, ExecutionStatus::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionHistory;
    use shipyard_types::element::ServiceElement;
    use shipyard_types::instance::StateExecutionInstance;
    use uuid::Uuid;

    #[test]
    fn parameters_render_recursively() {
        let mut instance = StateExecutionInstance::new("app-1", Uuid::now_v7(), "setup", StateType::Command);
        instance.context_elements.push(ContextElement::new(
            "web",
            ElementKind::Service(ServiceElement {
                id: "svc-1".into(),
                name: "web".into(),
            }),
        ));
        let history = ExecutionHistory::new();
        let ctx = ExecutionContext::new(&instance, &history, &[]);

        let rendered = render_value(
            &ctx,
            &json!({ "family": "${service.name}", "ports": [80, "${service.id}"], "dry_run": false }),
        );
        assert_eq!(
            rendered,
            json!({ "family": "web", "ports": [80, "svc-1"], "dry_run": false })
        );
    }
}
