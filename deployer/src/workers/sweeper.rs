//! Periodic aggregation sweep

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::deploy::aggregator::StatusAggregator;

/// Sweeper worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

/// Run the sweeper worker
pub async fn run<S, F>(
    options: &Options,
    aggregator: &StatusAggregator,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Sweeper worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Sweeper worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        debug!("Sweeping non-terminal deployments...");
        match aggregator.sweep().await {
            Ok(finalized) => {
                for (id, status) in finalized {
                    info!("Sweep finalized deployment {} as {}", id, status);
                }
            }
            Err(e) => {
                error!("Sweep failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deployment::{AttemptStatus, DeploymentStatus};
    use crate::storage::memory::MemoryStore;
    use crate::storage::store::Store;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_sweep_finalizes_then_stops() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let deployment = store
            .insert_deployment("https://example.com/app.git", &["aws".to_string()])
            .await
            .unwrap();
        let (attempt, _) = store.get_or_create_attempt(deployment.id, "aws").await.unwrap();
        store.set_attempt_status(attempt.id, attempt.run, AttemptStatus::Succeeded).await.unwrap();

        let aggregator = StatusAggregator::new(store.clone());
        let (tx, rx) = oneshot::channel::<()>();
        let shutdown = Box::pin(async move {
            let _ = rx.await;
        });

        let options = Options {
            interval: Duration::from_millis(5),
        };
        let worker = tokio::spawn(async move {
            run(&options, &aggregator, tokio::time::sleep, shutdown).await;
        });

        let mut status = DeploymentStatus::Pending;
        for _ in 0..200 {
            status = store.deployment(deployment.id).await.unwrap().unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(status, DeploymentStatus::Completed);

        tx.send(()).unwrap();
        worker.await.unwrap();
    }
}
