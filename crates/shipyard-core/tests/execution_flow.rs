//! Serial and parallel children, aborts, timeouts and restart recovery.

mod common;

use std::time::Duration;

use shipyard_core::executor::ExecutionRequest;
use shipyard_core::notify::NotifyOutcome;
use shipyard_core::repository::InstanceRepository;
use shipyard_types::element::{ContextElement, ElementKind, ParamElement};
use shipyard_types::event::ExecutionEvent;
use shipyard_types::notify::{CommandResult, NotifyResponse};
use shipyard_types::status::ExecutionStatus;
use shipyard_types::task::TaskType;

use common::{APP, Harness, standard_params};

fn wrap_up(parallel: bool, continue_on_failure: bool) -> String {
    format!(
        r#"
name: wrap-up
root: wrap-up
states:
  - name: wrap-up
    kind: phase_step
    step_type: wrap_up
    parallel: {parallel}
    continue_on_failure: {continue_on_failure}
    steps: [drain, notify-team, tag-release]
  - name: drain
    kind: command
    command_name: drain
    parameters:
      env: "${{workflow.env_id}}"
  - name: notify-team
    kind: command
    command_name: notify
  - name: tag-release
    kind: command
    command_name: tag
"#
    )
}

#[tokio::test]
async fn serial_children_run_one_after_another() {
    let h = Harness::new(&wrap_up(false, false));
    let root = h
        .executor
        .start(ExecutionRequest::new(APP, "wrap-up").with_element(standard_params()))
        .await
        .unwrap();
    h.executor.run_until_idle().await.unwrap();

    let tasks = h.dispatcher.of_type(TaskType::Command);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].parameters["command_name"], "drain");
    assert_eq!(tasks[0].parameters["parameters"]["env"], "prod");

    h.complete_task(&h.dispatcher.last_wait_id(), CommandResult::success())
        .await;
    assert_eq!(h.dispatcher.tasks().len(), 2);
    h.complete_task(&h.dispatcher.last_wait_id(), CommandResult::success())
        .await;
    h.complete_task(&h.dispatcher.last_wait_id(), CommandResult::success())
        .await;

    let names: Vec<_> = h
        .dispatcher
        .tasks()
        .iter()
        .map(|t| t.parameters["command_name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["drain", "notify", "tag"]);

    let root = h.executor.instance(APP, root.id).await.unwrap().unwrap();
    assert_eq!(root.status, ExecutionStatus::Success);
    assert_eq!(root.child_strategy, Some(shipyard_types::status::ExecutionStrategy::Serial));
    assert_eq!(h.activities.status_of("drain"), Some(ExecutionStatus::Success));
}

#[tokio::test]
async fn finished_executions_release_their_correlation_ids() {
    let h = Harness::new(&wrap_up(false, false));
    for _ in 0..5 {
        let root = h
            .executor
            .start(ExecutionRequest::new(APP, "wrap-up").with_element(standard_params()))
            .await
            .unwrap();
        h.executor.run_until_idle().await.unwrap();
        for _ in 0..3 {
            h.complete_task(&h.dispatcher.last_wait_id(), CommandResult::success())
                .await;
        }
        let root = h.executor.instance(APP, root.id).await.unwrap().unwrap();
        assert_eq!(root.status, ExecutionStatus::Success);
        assert_eq!(h.executor.coordinator().tracked_ids(), 0);
    }
    assert_eq!(h.dispatcher.tasks().len(), 15);
}

#[tokio::test]
async fn serial_failure_skips_remaining_siblings() {
    let h = Harness::new(&wrap_up(false, false));
    let root = h
        .executor
        .start(ExecutionRequest::new(APP, "wrap-up").with_element(standard_params()))
        .await
        .unwrap();
    h.executor.run_until_idle().await.unwrap();

    h.complete_task(&h.dispatcher.last_wait_id(), CommandResult::failure("disk full"))
        .await;

    assert_eq!(h.dispatcher.tasks().len(), 1);
    assert_eq!(
        h.named(root.execution_id, "drain").await.status,
        ExecutionStatus::Failed
    );
    for skipped in ["notify-team", "tag-release"] {
        assert_eq!(
            h.named(root.execution_id, skipped).await.status,
            ExecutionStatus::Skipped
        );
    }

    let root = h.executor.instance(APP, root.id).await.unwrap().unwrap();
    assert_eq!(root.status, ExecutionStatus::Failed);
    assert_eq!(
        root.state_execution_data.error_message.as_deref(),
        Some("disk full")
    );
    assert_eq!(h.activities.status_of("drain"), Some(ExecutionStatus::Failed));
}

#[tokio::test]
async fn parallel_children_all_run_and_failure_aggregates() {
    let h = Harness::new(&wrap_up(true, false));
    let root = h
        .executor
        .start(ExecutionRequest::new(APP, "wrap-up").with_element(standard_params()))
        .await
        .unwrap();
    h.executor.run_until_idle().await.unwrap();

    let tasks = h.dispatcher.tasks();
    assert_eq!(tasks.len(), 3);

    h.complete_task(&tasks[1].wait_id, CommandResult::success()).await;
    h.complete_task(&tasks[0].wait_id, CommandResult::failure("drain refused"))
        .await;
    let running = h.executor.instance(APP, root.id).await.unwrap().unwrap();
    assert_eq!(running.status, ExecutionStatus::Running);

    h.complete_task(&tasks[2].wait_id, CommandResult::success()).await;

    let root = h.executor.instance(APP, root.id).await.unwrap().unwrap();
    assert_eq!(root.status, ExecutionStatus::Failed);
    assert_eq!(
        root.state_execution_data.error_message.as_deref(),
        Some("drain refused")
    );
    assert_eq!(
        h.named(root.execution_id, "tag-release").await.status,
        ExecutionStatus::Success
    );
}

#[tokio::test]
async fn continue_on_failure_succeeds_despite_failed_child() {
    let h = Harness::new(&wrap_up(true, true));
    let root = h
        .executor
        .start(ExecutionRequest::new(APP, "wrap-up").with_element(standard_params()))
        .await
        .unwrap();
    h.executor.run_until_idle().await.unwrap();

    let tasks = h.dispatcher.tasks();
    h.complete_task(&tasks[0].wait_id, CommandResult::failure("flaky")).await;
    h.complete_task(&tasks[1].wait_id, CommandResult::success()).await;
    h.complete_task(&tasks[2].wait_id, CommandResult::success()).await;

    let root = h.executor.instance(APP, root.id).await.unwrap().unwrap();
    assert_eq!(root.status, ExecutionStatus::Success);
    assert!(root.state_execution_data.error_message.is_none());
}

#[tokio::test]
async fn duplicate_notification_is_rejected() {
    let h = Harness::new(&wrap_up(true, false));
    h.executor
        .start(ExecutionRequest::new(APP, "wrap-up").with_element(standard_params()))
        .await
        .unwrap();
    h.executor.run_until_idle().await.unwrap();

    let wait_id = h.dispatcher.tasks()[0].wait_id.clone();
    assert_eq!(
        h.executor
            .notify(&wait_id, NotifyResponse::Command(CommandResult::success()))
            .unwrap(),
        NotifyOutcome::Delivered
    );
    assert!(
        h.executor
            .notify(&wait_id, NotifyResponse::Command(CommandResult::success()))
            .is_err()
    );
}

#[tokio::test]
async fn abort_stops_the_tree_and_discards_late_results() {
    let h = Harness::new(&wrap_up(false, false));
    let mut events = h.executor.events().subscribe();
    let root = h
        .executor
        .start(ExecutionRequest::new(APP, "wrap-up").with_element(standard_params()))
        .await
        .unwrap();
    h.executor.run_until_idle().await.unwrap();
    let wait_id = h.dispatcher.last_wait_id();

    h.executor.abort(APP, root.id, "operator cancelled");
    h.executor.run_until_idle().await.unwrap();

    for instance in h.instances(root.execution_id).await {
        assert_eq!(instance.status, ExecutionStatus::Aborted, "{}", instance.state_name);
    }
    assert_eq!(h.activities.status_of("drain"), Some(ExecutionStatus::Aborted));
    let root_after = h.executor.instance(APP, root.id).await.unwrap().unwrap();
    assert_eq!(
        root_after.state_execution_data.error_message.as_deref(),
        Some("operator cancelled")
    );

    let outcome = h
        .executor
        .notify(&wait_id, NotifyResponse::Command(CommandResult::success()))
        .unwrap();
    assert_eq!(outcome, NotifyOutcome::Discarded);
    h.executor.run_until_idle().await.unwrap();
    assert_eq!(
        h.named(root.execution_id, "drain").await.status,
        ExecutionStatus::Aborted
    );

    let mut completed = None;
    let mut discarded = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ExecutionEvent::ExecutionCompleted { status, .. } => completed = Some(status),
            ExecutionEvent::NotificationDiscarded { correlation_id } if correlation_id == wait_id => {
                discarded = true
            }
            _ => {}
        }
    }
    assert_eq!(completed, Some(ExecutionStatus::Aborted));
    assert!(discarded);
}

#[tokio::test(start_paused = true)]
async fn silent_task_times_out() {
    let h = Harness::new(
        r#"
name: timeout
root: wrap-up
states:
  - name: wrap-up
    kind: phase_step
    step_type: wrap_up
    steps: [drain]
  - name: drain
    kind: command
    command_name: drain
    timeout_secs: 5
"#,
    );
    let mut events = h.executor.events().subscribe();
    let root = h
        .executor
        .start(ExecutionRequest::new(APP, "wrap-up"))
        .await
        .unwrap();
    h.executor.run_until_idle().await.unwrap();
    assert_eq!(h.dispatcher.tasks()[0].timeout_secs, Some(5));

    tokio::time::sleep(Duration::from_secs(6)).await;
    h.executor.run_until_idle().await.unwrap();

    let drain = h.named(root.execution_id, "drain").await;
    assert_eq!(drain.status, ExecutionStatus::Aborted);
    assert_eq!(
        drain.state_execution_data.error_message.as_deref(),
        Some("timed out after 5s")
    );
    let root = h.executor.instance(APP, root.id).await.unwrap().unwrap();
    assert_eq!(root.status, ExecutionStatus::Aborted);

    let mut timed_out = false;
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::InstanceTimedOut { timeout_secs, .. } = event {
            assert_eq!(timeout_secs, 5);
            timed_out = true;
        }
    }
    assert!(timed_out);
}

#[tokio::test(start_paused = true)]
async fn answered_task_does_not_time_out() {
    let h = Harness::new(
        r#"
name: timeout
root: drain
states:
  - name: drain
    kind: command
    command_name: drain
    timeout_secs: 5
"#,
    );
    let root = h
        .executor
        .start(ExecutionRequest::new(APP, "drain"))
        .await
        .unwrap();
    h.executor.run_until_idle().await.unwrap();
    h.complete_task(&h.dispatcher.last_wait_id(), CommandResult::success())
        .await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.executor.run_until_idle().await.unwrap(), 0);
    let root = h.executor.instance(APP, root.id).await.unwrap().unwrap();
    assert_eq!(root.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn waits_survive_a_restart() {
    let h = Harness::new(&wrap_up(true, false));
    let root = h
        .executor
        .start(ExecutionRequest::new(APP, "wrap-up").with_element(standard_params()))
        .await
        .unwrap();
    h.executor.run_until_idle().await.unwrap();
    let tasks = h.dispatcher.tasks();

    // First child finishes before the restart; its parent has not resumed yet.
    h.complete_task(&tasks[0].wait_id, CommandResult::success()).await;

    let restarted = h.restarted();
    let touched = restarted.recover().await.unwrap();
    assert_eq!(touched, 3);
    restarted.run_until_idle().await.unwrap();

    for task in &tasks[1..] {
        restarted
            .notify(&task.wait_id, NotifyResponse::Command(CommandResult::success()))
            .unwrap();
    }
    restarted.run_until_idle().await.unwrap();

    let root = restarted.instance(APP, root.id).await.unwrap().unwrap();
    assert_eq!(root.status, ExecutionStatus::Success);
}

/// Persist `state_name` as finished without running its end transition, as
/// if the process died right after the status write.
async fn finish_before_crash(
    h: &Harness,
    execution_id: uuid::Uuid,
    state_name: &str,
    status: ExecutionStatus,
    error_message: Option<&str>,
    notify_elements: Vec<ContextElement>,
) {
    let mut instance = h.named(execution_id, state_name).await;
    instance.status = status;
    instance.state_execution_data.status = status;
    instance.state_execution_data.error_message = error_message.map(str::to_string);
    instance.notify_elements = notify_elements;
    assert!(
        h.store
            .update_if_status(&instance, &[ExecutionStatus::Running])
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn broken_serial_chain_is_skipped_after_restart() {
    let h = Harness::new(&wrap_up(false, false));
    let root = h
        .executor
        .start(ExecutionRequest::new(APP, "wrap-up").with_element(standard_params()))
        .await
        .unwrap();
    h.executor.run_until_idle().await.unwrap();
    finish_before_crash(
        &h,
        root.execution_id,
        "drain",
        ExecutionStatus::Failed,
        Some("disk full"),
        Vec::new(),
    )
    .await;

    let restarted = h.restarted();
    assert_eq!(restarted.recover().await.unwrap(), 2);
    restarted.run_until_idle().await.unwrap();

    for skipped in ["notify-team", "tag-release"] {
        assert_eq!(
            h.named(root.execution_id, skipped).await.status,
            ExecutionStatus::Skipped
        );
    }
    assert_eq!(h.dispatcher.tasks().len(), 1);
    let root = restarted.instance(APP, root.id).await.unwrap().unwrap();
    assert_eq!(root.status, ExecutionStatus::Failed);
    assert_eq!(
        root.state_execution_data.error_message.as_deref(),
        Some("disk full")
    );
}

#[tokio::test]
async fn serial_chain_resumes_with_notify_elements_after_restart() {
    let h = Harness::new(&wrap_up(false, false));
    let root = h
        .executor
        .start(ExecutionRequest::new(APP, "wrap-up").with_element(standard_params()))
        .await
        .unwrap();
    h.executor.run_until_idle().await.unwrap();

    let build = ContextElement::new(
        "build",
        ElementKind::Param(ParamElement {
            values: [("number".to_string(), serde_json::json!(42))].into(),
        }),
    );
    finish_before_crash(
        &h,
        root.execution_id,
        "drain",
        ExecutionStatus::Success,
        None,
        vec![build.clone()],
    )
    .await;

    let restarted = h.restarted();
    restarted.recover().await.unwrap();
    restarted.run_until_idle().await.unwrap();

    let tasks = h.dispatcher.tasks();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[1].parameters["command_name"], "notify");
    let notify_team = h.named(root.execution_id, "notify-team").await;
    assert_eq!(notify_team.status, ExecutionStatus::Running);
    assert_eq!(
        notify_team
            .context_elements
            .iter()
            .filter(|e| e.id == build.id)
            .count(),
        1
    );
}

#[tokio::test]
async fn unknown_root_state_is_rejected() {
    let h = Harness::new(&wrap_up(false, false));
    let err = h
        .executor
        .start(ExecutionRequest::new(APP, "missing"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "no state named 'missing' is registered");
}
