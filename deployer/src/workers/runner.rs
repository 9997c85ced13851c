//! Worker pool consuming the task queue

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::deploy::aggregator::{Aggregation, StatusAggregator};
use crate::deploy::executor::DeploymentExecutor;
use crate::errors::DeployError;
use crate::workers::queue::{Task, TaskQueue};

/// Worker pool options
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of tasks executing at once
    pub concurrency: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Everything a task needs to run
#[derive(Clone)]
pub struct TaskContext {
    pub executor: Arc<DeploymentExecutor>,
    pub aggregator: StatusAggregator,
    pub queue: Arc<dyn TaskQueue>,
    pub cancel: CancellationToken,
}

/// Run the worker pool until shutdown or until the queue closes.
///
/// Each task runs as its own tokio task. On shutdown the cancellation token is fired and
/// in-flight tasks are awaited, so every attempt still records its status and cleans up.
pub async fn run(
    options: &Options,
    context: TaskContext,
    mut tasks: mpsc::UnboundedReceiver<Task>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Worker pool starting with {} slot(s)...", options.concurrency);

    let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut running = JoinSet::new();

    loop {
        let task = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Worker pool shutting down...");
                break;
            }
            task = tasks.recv() => match task {
                Some(task) => task,
                None => {
                    debug!("Task queue closed");
                    break;
                }
            },
            // Reap finished tasks so the set does not grow
            Some(_) = running.join_next(), if !running.is_empty() => continue,
        };

        let permit = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Worker pool shutting down...");
                break;
            }
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let context = context.clone();
        running.spawn(async move {
            let outcome = handle_task(task, &context).await;
            info!("{}", outcome);
            drop(permit);
            outcome
        });
    }

    context.cancel.cancel();
    while let Some(result) = running.join_next().await {
        if let Err(e) = result {
            error!("Worker task panicked: {}", e);
        }
    }
    info!("Worker pool stopped");
}

/// Execute one task and describe its outcome
pub async fn handle_task(task: Task, context: &TaskContext) -> String {
    match task {
        Task::Deploy {
            deployment_id,
            provider_id,
        } => {
            let outcome = match context
                .executor
                .run(deployment_id, &provider_id, &context.cancel)
                .await
            {
                Ok(_) => format!(
                    "Deploy {} completed successfully on {}",
                    deployment_id, provider_id
                ),
                Err(DeployError::NotFound(_)) => {
                    return format!("Deploy {} not found", deployment_id);
                }
                Err(DeployError::Superseded(_)) => format!(
                    "Deploy {} on {} was superseded by a newer run",
                    deployment_id, provider_id
                ),
                Err(e) => format!("Deploy {} failed on {}: {}", deployment_id, provider_id, e),
            };

            // The sweep covers a lost follow-up
            if let Err(e) = context.queue.enqueue(Task::Finalize { deployment_id }).await {
                warn!("Failed to queue finalization of {}: {}", deployment_id, e);
            }
            outcome
        }
        Task::Finalize { deployment_id } => match context.aggregator.finalize(deployment_id).await {
            Ok(Aggregation::Finalized(status)) => {
                format!("Deploy {} finalized as {}", deployment_id, status)
            }
            Ok(Aggregation::Pending { remaining }) => format!(
                "Deploy {} has {} attempt(s) outstanding",
                deployment_id, remaining
            ),
            Ok(Aggregation::AlreadyTerminal(status)) => {
                format!("Deploy {} already {}", deployment_id, status)
            }
            Err(DeployError::NotFound(_)) => format!("Deploy {} not found", deployment_id),
            Err(e) => format!("Finalization of {} failed: {}", deployment_id, e),
        },
    }
}
