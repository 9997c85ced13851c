//! Main application run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::DeployError;
use crate::models::deployment::{DeploymentId, DeploymentReport, DeploymentRequest};
use crate::workers::queue::Task;
use crate::workers::{runner, sweeper};

/// Deploy one request and return its final report
pub async fn run(
    options: AppOptions,
    request: DeploymentRequest,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<DeploymentReport, DeployError> {
    info!("Initializing deployment orchestrator...");

    let (state, tasks) = AppState::init(&options)?;
    run_with_state(Arc::new(state), tasks, &options, request, shutdown_signal).await
}

/// Start the workers on `state`, submit `request` and wait until the deployment is
/// terminal or the shutdown signal fires
pub async fn run_with_state(
    state: Arc<AppState>,
    tasks: mpsc::UnboundedReceiver<Task>,
    options: &AppOptions,
    request: DeploymentRequest,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<DeploymentReport, DeployError> {
    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());
    shutdown_manager.with_app_state(state.clone())?;

    init_worker_pool(options, state.clone(), tasks, &mut shutdown_manager, shutdown_tx.subscribe())?;
    if options.enable_sweeper {
        init_sweeper_worker(options.sweeper.clone(), state.clone(), &mut shutdown_manager, shutdown_tx.subscribe())?;
    }

    let deployment = match state.dispatcher.submit(request).await {
        Ok(deployment) => deployment,
        Err(e) => {
            error!("Failed to submit deployment: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
        }
        result = await_terminal(state.clone(), deployment.id, options.lifecycle.status_poll_interval) => {
            if let Err(e) = result {
                error!("Lost track of deployment {}: {}", deployment.id, e);
            }
        }
    }

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await?;

    // Attempts interrupted by the shutdown are terminal by now
    if let Err(e) = state.aggregator.finalize(deployment.id).await {
        warn!("Final aggregation of {} failed: {}", deployment.id, e);
    }
    state.report(deployment.id).await
}

async fn await_terminal(
    state: Arc<AppState>,
    deployment_id: DeploymentId,
    poll_interval: Duration,
) -> Result<(), DeployError> {
    loop {
        let deployment = state
            .store
            .deployment(deployment_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("deployment {}", deployment_id)))?;
        if deployment.status.is_terminal() {
            info!("Deployment {} is {}", deployment_id, deployment.status);
            return Ok(());
        }
        tokio::time::sleep(poll_interval).await;
    }
}

// =============================== INITIALIZATION ================================== //

fn init_worker_pool(
    options: &AppOptions,
    state: Arc<AppState>,
    tasks: mpsc::UnboundedReceiver<Task>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployError> {
    info!("Initializing worker pool...");

    let pool_options = options.worker_pool.clone();
    let context = state.task_context();

    let handle = tokio::spawn(async move {
        runner::run(
            &pool_options,
            context,
            tasks,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_worker_pool_handle(handle)
}

fn init_sweeper_worker(
    options: sweeper::Options,
    state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DeployError> {
    info!("Initializing sweeper worker...");

    let aggregator = state.aggregator.clone();

    let handle = tokio::spawn(async move {
        sweeper::run(
            &options,
            &aggregator,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_sweeper_worker_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    worker_pool_handle: Option<JoinHandle<()>>,
    sweeper_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            worker_pool_handle: None,
            sweeper_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), DeployError> {
        if self.app_state.is_some() {
            return Err(DeployError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_worker_pool_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DeployError> {
        if self.worker_pool_handle.is_some() {
            return Err(DeployError::ShutdownError("worker_pool_handle already set".to_string()));
        }
        self.worker_pool_handle = Some(handle);
        Ok(())
    }

    pub fn with_sweeper_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DeployError> {
        if self.sweeper_worker_handle.is_some() {
            return Err(DeployError::ShutdownError("sweeper_handle already set".to_string()));
        }
        self.sweeper_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), DeployError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}", max_delay);
                Err(DeployError::ShutdownError(format!(
                    "timed out after {:?}",
                    max_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeployError> {
        info!("Shutting down deployment orchestrator...");

        // 1. Sweeper worker
        if let Some(handle) = self.sweeper_worker_handle.take() {
            handle.await.map_err(|e| DeployError::ShutdownError(e.to_string()))?;
        }

        // 2. Worker pool, which cancels and drains in-flight attempts
        if let Some(handle) = self.worker_pool_handle.take() {
            handle.await.map_err(|e| DeployError::ShutdownError(e.to_string()))?;
        }

        // 3. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
