//! Task queue messages and the in-process queue

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::DeployError;
use crate::models::deployment::DeploymentId;

/// Unit of work consumed by the worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Run the executor for one provider
    Deploy {
        deployment_id: DeploymentId,
        provider_id: String,
    },

    /// Try to finalize the deployment's overall status
    Finalize { deployment_id: DeploymentId },
}

impl Task {
    pub fn deployment_id(&self) -> DeploymentId {
        match self {
            Task::Deploy { deployment_id, .. } | Task::Finalize { deployment_id } => *deployment_id,
        }
    }
}

/// Queue the dispatcher and workers enqueue into. Delivery is at least once.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task) -> Result<(), DeployError>;
}

/// In-process queue backed by an unbounded channel
#[derive(Debug, Clone)]
pub struct LocalTaskQueue {
    sender: mpsc::UnboundedSender<Task>,
}

impl LocalTaskQueue {
    /// Create the queue together with the receiving end for the worker pool
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, task: Task) -> Result<(), DeployError> {
        self.sender
            .send(task)
            .map_err(|e| DeployError::QueueError(format!("worker pool is gone: {:?}", e.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_task_message_shape() {
        let id = DeploymentId::new();
        let task = Task::Deploy {
            deployment_id: id,
            provider_id: "aws".to_string(),
        };

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["task"], "deploy");
        assert_eq!(value["deployment_id"], id.to_string());
        assert_eq!(value["provider_id"], "aws");

        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
        assert_eq!(back.deployment_id(), id);
    }

    #[tokio::test]
    async fn test_local_queue() {
        let (queue, mut receiver) = LocalTaskQueue::channel();
        let id = DeploymentId::new();
        assert_ok!(queue.enqueue(Task::Finalize { deployment_id: id }).await);
        assert_eq!(
            receiver.recv().await,
            Some(Task::Finalize { deployment_id: id })
        );

        drop(receiver);
        assert_err!(queue.enqueue(Task::Finalize { deployment_id: id }).await);
    }
}
