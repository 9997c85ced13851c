//! Application state management

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::aggregator::StatusAggregator;
use crate::deploy::executor::DeploymentExecutor;
use crate::deploy::git::GitCloner;
use crate::deploy::stager::{ArtifactStager, RepositoryCloner};
use crate::drivers::DriverRegistry;
use crate::errors::DeployError;
use crate::models::deployment::{DeploymentId, DeploymentReport, LogFilter};
use crate::storage::memory::MemoryStore;
use crate::storage::store::Store;
use crate::workers::dispatcher::Dispatcher;
use crate::workers::queue::{LocalTaskQueue, Task, TaskQueue};
use crate::workers::runner::TaskContext;

/// Main application state
pub struct AppState {
    /// Persistence handle
    pub store: Arc<dyn Store>,

    /// Provider drivers
    pub registry: Arc<DriverRegistry>,

    /// Runs provider attempts
    pub executor: Arc<DeploymentExecutor>,

    /// Finalizes deployments
    pub aggregator: StatusAggregator,

    /// Creates and fans out deployments
    pub dispatcher: Dispatcher,

    /// Queue the workers consume
    pub queue: Arc<dyn TaskQueue>,

    /// Cancels in-flight attempts on shutdown
    pub cancel: CancellationToken,
}

impl AppState {
    /// Initialize application state from options, returning the task receiver
    pub fn init(options: &AppOptions) -> Result<(Self, mpsc::UnboundedReceiver<Task>), DeployError> {
        info!("Initializing application state...");

        let registry = DriverRegistry::from_settings(&options.providers)?;
        let cloner = Arc::new(GitCloner::new(&options.git));

        Ok(Self::new(
            Arc::new(MemoryStore::new()),
            registry,
            cloner,
            options.storage.workspace_dir(),
        ))
    }

    /// Wire the components around the given store, drivers and cloner
    pub fn new(
        store: Arc<dyn Store>,
        registry: DriverRegistry,
        cloner: Arc<dyn RepositoryCloner>,
        workspace_dir: impl Into<PathBuf>,
    ) -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (queue, tasks) = LocalTaskQueue::channel();
        let queue: Arc<dyn TaskQueue> = Arc::new(queue);
        let registry = Arc::new(registry);

        let executor = Arc::new(DeploymentExecutor::new(
            store.clone(),
            registry.clone(),
            ArtifactStager::new(cloner, workspace_dir),
        ));

        let state = Self {
            aggregator: StatusAggregator::new(store.clone()),
            dispatcher: Dispatcher::new(store.clone(), queue.clone()),
            store,
            registry,
            executor,
            queue,
            cancel: CancellationToken::new(),
        };
        (state, tasks)
    }

    /// Context handed to every worker task
    pub fn task_context(&self) -> TaskContext {
        TaskContext {
            executor: self.executor.clone(),
            aggregator: self.aggregator.clone(),
            queue: self.queue.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Deployment with its attempts and log entries
    pub async fn report(&self, deployment_id: DeploymentId) -> Result<DeploymentReport, DeployError> {
        let deployment = self
            .store
            .deployment(deployment_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("deployment {}", deployment_id)))?;
        let attempts = self.store.attempts(deployment_id).await?;
        let logs = self.store.logs(deployment_id, &LogFilter::default()).await?;

        Ok(DeploymentReport {
            deployment,
            attempts,
            logs,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        info!("Shutting down application state...");
        self.cancel.cancel();
        Ok(())
    }
}
