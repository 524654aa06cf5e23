//! Channel-backed remote task dispatcher.
//!
//! `queue_task` hands the task to whatever consumes the receiver (an agent
//! transport, or the [`TaskPoller`](crate::poller::TaskPoller) pump). The
//! synchronous path is not supported: every task goes through the queue.

use tokio::sync::mpsc;

use shipyard_core::collaborator::{DispatchError, TaskDispatcher};
use shipyard_types::notify::CommandResult;
use shipyard_types::task::DelegateTask;

#[derive(Debug, Clone)]
pub struct ChannelTaskDispatcher {
    tasks: mpsc::UnboundedSender<DelegateTask>,
}

impl ChannelTaskDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DelegateTask>) {
        let (tasks, rx) = mpsc::unbounded_channel();
        (Self { tasks }, rx)
    }
}

impl TaskDispatcher for ChannelTaskDispatcher {
    fn queue_task(&self, task: DelegateTask) -> Result<String, DispatchError> {
        let wait_id = task.wait_id.clone();
        tracing::debug!(
            task_id = %task.id,
            task_type = ?task.task_type,
            correlation_id = %wait_id,
            "task queued"
        );
        self.tasks.send(task).map_err(|_| DispatchError::Unavailable)?;
        Ok(wait_id)
    }

    fn execute_task(&self, task: DelegateTask) -> Result<CommandResult, DispatchError> {
        Err(DispatchError::Rejected(format!(
            "synchronous execution not supported for task {}",
            task.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_types::task::TaskType;

    fn task(wait_id: &str) -> DelegateTask {
        DelegateTask::new("app-1", TaskType::Command, wait_id, serde_json::json!({}))
    }

    #[tokio::test]
    async fn queued_tasks_arrive_in_order() {
        let (dispatcher, mut rx) = ChannelTaskDispatcher::new();
        assert_eq!(dispatcher.queue_task(task("w-1")).unwrap(), "w-1");
        dispatcher.queue_task(task("w-2")).unwrap();

        assert_eq!(rx.recv().await.unwrap().wait_id, "w-1");
        assert_eq!(rx.recv().await.unwrap().wait_id, "w-2");
    }

    #[test]
    fn closed_receiver_is_unavailable() {
        let (dispatcher, rx) = ChannelTaskDispatcher::new();
        drop(rx);
        assert!(matches!(
            dispatcher.queue_task(task("w-1")),
            Err(DispatchError::Unavailable)
        ));
    }

    #[test]
    fn synchronous_execution_is_rejected() {
        let (dispatcher, _rx) = ChannelTaskDispatcher::new();
        assert!(matches!(
            dispatcher.execute_task(task("w-1")),
            Err(DispatchError::Rejected(_))
        ));
    }
}
