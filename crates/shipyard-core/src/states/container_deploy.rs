//! Container service resize.
//!
//! Forward runs plan a resize of the new service group against what the
//! cluster currently runs; rollback runs replay the reversed resize pushed
//! by their phase step. Either way the two halves (grow the new group,
//! shrink the old ones) are queued one after the other in the order the
//! container element's resize strategy asks for, each under its own
//! correlation id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use shipyard_types::element::{ContainerServiceElement, ContextElement, ElementKind, InstanceListElement};
use shipyard_types::execution_data::{ExecutionPayload, InstanceStatusSummary, ResizeExecutionData};
use shipyard_types::instance::StateType;
use shipyard_types::notify::NotifyResponse;
use shipyard_types::resize::{ContainerServiceData, InstanceUnitType};
use shipyard_types::status::ExecutionStatus;
use shipyard_types::task::{ActivityKind, DelegateTask, TaskType};

use super::start_activity;
use crate::collaborator::{ActivitySink, ClusterInspector, SettingsResolver, TaskDispatcher};
use crate::context::ExecutionContext;
use crate::resize::{
    ResizePhase, ResizePlan, effective_max_instances, phase_order, plan_resize, revisions_to_prune,
    target_count,
};
use crate::state::{ExecutionResponse, State, StateError};

pub struct ContainerDeployState {
    pub name: String,
    pub command_name: String,
    pub instance_count: u32,
    pub instance_unit_type: InstanceUnitType,
    pub rollback: bool,
    pub timeout: Option<Duration>,
    /// Superseded revisions kept after a successful resize.
    pub revisions_to_retain: usize,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub activities: Arc<dyn ActivitySink>,
    pub settings: Arc<dyn SettingsResolver>,
    pub cluster: Arc<dyn ClusterInspector>,
}

impl std::fmt::Debug for ContainerDeployState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerDeployState")
            .field("name", &self.name)
            .field("command_name", &self.command_name)
            .field("instance_count", &self.instance_count)
            .field("instance_unit_type", &self.instance_unit_type)
            .field("rollback", &self.rollback)
            .finish_non_exhaustive()
    }
}

fn wait_id(data: &ResizeExecutionData, phase: ResizePhase) -> String {
    format!("{}:{}", data.activity_id, phase.as_str())
}

fn phase_of(correlation_id: &str) -> Option<ResizePhase> {
    match correlation_id.rsplit_once(':')?.1 {
        "upsize" => Some(ResizePhase::Upsize),
        "downsize" => Some(ResizePhase::Downsize),
        _ => None,
    }
}

fn changes(groups: &[ContainerServiceData]) -> bool {
    groups.iter().any(|g| g.previous_count != g.desired_count)
}

impl ContainerDeployState {
    /// Plan the forward resize from the cluster's current counts.
    fn plan(
        &self,
        setting: &serde_json::Value,
        container: &ContainerServiceElement,
    ) -> Result<ResizePlan, StateError> {
        let cluster = &container.cluster_name;
        let service = &container.service_name;
        let previous = self
            .cluster
            .desired_count(setting, cluster, service)?
            .ok_or_else(|| StateError::Configuration(format!("service setup not done, service name: {service}")))?;
        let active = self.cluster.active_service_counts(setting, cluster, service)?;

        let max = effective_max_instances(self.instance_unit_type, container.max_instances, &active);
        let desired = target_count(self.instance_count, self.instance_unit_type, max);
        tracing::debug!(
            service = %service,
            previous,
            desired,
            max,
            "planning resize"
        );
        Ok(plan_resize(service, previous, desired, max, &active)?)
    }

    /// Queue the first outstanding half after `done`, or finish when none is left.
    fn advance(
        &self,
        ctx: &ExecutionContext<'_>,
        setting: &serde_json::Value,
        container: &ContainerServiceElement,
        mut data: ResizeExecutionData,
        done: Option<ResizePhase>,
    ) -> Result<ExecutionResponse, StateError> {
        let order = phase_order(container.resize_strategy);
        let start = match done {
            None => 0,
            Some(done) => order.iter().position(|p| *p == done).map_or(order.len(), |i| i + 1),
        };

        for phase in &order[start..] {
            let groups = match phase {
                ResizePhase::Upsize => &data.new_instance_data,
                ResizePhase::Downsize => &data.old_instance_data,
            };
            if !changes(groups) {
                continue;
            }
            let correlation_id = wait_id(&data, *phase);
            let mut task = DelegateTask::new(
                ctx.app_id(),
                TaskType::Resize,
                correlation_id.clone(),
                json!({
                    "command_name": self.command_name,
                    "setting": setting,
                    "cluster_name": container.cluster_name,
                    "service_name": container.service_name,
                    "phase": phase.as_str(),
                    "resize": groups,
                }),
            );
            task.timeout_secs = self.timeout.map(|t| t.as_secs());
            self.dispatcher.queue_task(task)?;
            tracing::info!(
                instance_id = %ctx.instance_id(),
                correlation_id = %correlation_id,
                phase = phase.as_str(),
                groups = groups.len(),
                "resize queued"
            );
            data.downsize = *phase == ResizePhase::Downsize;
            return Ok(ExecutionResponse::asynchronous(vec![correlation_id])
                .with_payload(ExecutionPayload::Resize(data)));
        }

        self.cleanup(setting, container);
        self.activities.update_status(data.activity_id, ExecutionStatus::Success);
        data.downsize = false;
        let instances = InstanceListElement {
            instances: data.new_instances.iter().map(|s| s.instance.clone()).collect(),
        };
        Ok(ExecutionResponse::success()
            .with_notify_element(ContextElement::new(
                container.service_name.clone(),
                ElementKind::InstanceList(instances),
            ))
            .with_payload(ExecutionPayload::Resize(data)))
    }

    /// Prune superseded revisions. Failures are logged, never raised.
    fn cleanup(&self, setting: &serde_json::Value, container: &ContainerServiceElement) {
        let cluster = &container.cluster_name;
        let result = self
            .cluster
            .list_revisions(setting, cluster, &container.service_name)
            .and_then(|revisions| {
                let prune = revisions_to_prune(&revisions, self.revisions_to_retain);
                if prune.is_empty() {
                    return Ok(0);
                }
                self.cluster.delete_revisions(setting, cluster, &prune)?;
                Ok(prune.len())
            });
        match result {
            Ok(pruned) => tracing::debug!(service = %container.service_name, pruned, "old revisions pruned"),
            Err(e) => tracing::warn!(service = %container.service_name, error = %e, "revision cleanup failed"),
        }
    }
}

impl State for ContainerDeployState {
    fn name(&self) -> &str {
        &self.name
    }

    fn state_type(&self) -> StateType {
        StateType::ContainerDeploy
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn is_rollback(&self) -> bool {
        self.rollback
    }

    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<ExecutionResponse, StateError> {
        let container = ctx.container_service_element()?;
        let setting = self.settings.get(&container.setting_id)?;

        let (new_instance_data, old_instance_data) = if self.rollback || ctx.is_rollback() {
            let rollback = ctx.container_rollback_element()?;
            (rollback.new_instance_data.clone(), rollback.old_instance_data.clone())
        } else {
            let plan = self.plan(&setting, container)?;
            (plan.new_instance_data, plan.old_instance_data)
        };

        let activity_id = start_activity(self.activities.as_ref(), ctx, &self.command_name, ActivityKind::Command);
        let data = ResizeExecutionData {
            activity_id,
            cluster_name: container.cluster_name.clone(),
            service_name: container.service_name.clone(),
            new_instance_data,
            old_instance_data,
            downsize: false,
            new_instances: Vec::new(),
        };
        self.advance(ctx, &setting, container, data, None)
    }

    fn handle_async_response(
        &self,
        ctx: &ExecutionContext<'_>,
        responses: &HashMap<String, NotifyResponse>,
    ) -> Result<ExecutionResponse, StateError> {
        let Some(mut data) = ctx.state_execution_data().resize().cloned() else {
            return Err(StateError::Protocol("resize resumed without resize data".into()));
        };
        let correlation_id = ctx
            .correlation_ids()
            .first()
            .ok_or_else(|| StateError::Protocol("resize resumed without a correlation id".into()))?;
        let done = phase_of(correlation_id)
            .ok_or_else(|| StateError::Protocol(format!("unexpected resize correlation id '{correlation_id}'")))?;
        let result = responses
            .get(correlation_id)
            .and_then(NotifyResponse::as_command)
            .ok_or_else(|| StateError::Protocol(format!("no command result for '{correlation_id}'")))?;

        if !result.is_success() {
            self.activities.update_status(data.activity_id, ExecutionStatus::Failed);
            let message = result
                .error_message
                .clone()
                .unwrap_or_else(|| format!("{} of {} failed", done.as_str(), data.service_name));
            return Err(StateError::RemoteTaskFailure(message));
        }
        if done == ResizePhase::Upsize {
            data.new_instances = result
                .instances
                .iter()
                .map(|instance| InstanceStatusSummary {
                    instance: instance.clone(),
                    status: ExecutionStatus::Success,
                })
                .collect();
        }

        let container = ctx.container_service_element()?;
        let setting = self.settings.get(&container.setting_id)?;
        self.advance(ctx, &setting, container, data, Some(done))
    }

    fn handle_abort_event(&self, ctx: &ExecutionContext<'_>) {
        if let Some(data) = ctx.state_execution_data().resize() {
            self.activities.update_status(data.activity_id, ExecutionStatus::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_name_their_phase() {
        let data = ResizeExecutionData {
            activity_id: uuid::Uuid::now_v7(),
            cluster_name: "prod".into(),
            service_name: "web__3".into(),
            new_instance_data: Vec::new(),
            old_instance_data: Vec::new(),
            downsize: false,
            new_instances: Vec::new(),
        };
        let up = wait_id(&data, ResizePhase::Upsize);
        let down = wait_id(&data, ResizePhase::Downsize);
        assert_ne!(up, down);
        assert_eq!(phase_of(&up), Some(ResizePhase::Upsize));
        assert_eq!(phase_of(&down), Some(ResizePhase::Downsize));
        assert_eq!(phase_of("approval-1"), None);
    }

    #[test]
    fn unchanged_groups_are_not_resized() {
        assert!(!changes(&[]));
        assert!(!changes(&[ContainerServiceData::new("web__2", 3, 3)]));
        assert!(changes(&[ContainerServiceData::new("web__2", 3, 1)]));
    }
}
