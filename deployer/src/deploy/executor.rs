//! Deployment executor: runs one provider attempt end to end

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::deploy::fsm::{AttemptEvent, AttemptFsm};
use crate::deploy::sink::EventSink;
use crate::deploy::stager::{ArtifactStager, WorkingDir};
use crate::drivers::{DriverRegistry, ProvisionContext, CANCELLED_CAUSE};
use crate::errors::DeployError;
use crate::models::deployment::{AttemptStatus, Deployment, DeploymentId, ProviderAttempt};
use crate::storage::store::Store;

/// Deployment executor
pub struct DeploymentExecutor {
    store: Arc<dyn Store>,
    registry: Arc<DriverRegistry>,
    stager: ArtifactStager,
}

impl DeploymentExecutor {
    pub fn new(store: Arc<dyn Store>, registry: Arc<DriverRegistry>, stager: ArtifactStager) -> Self {
        Self {
            store,
            registry,
            stager,
        }
    }

    /// Run the attempt for `(deployment_id, provider_id)`.
    ///
    /// The attempt row is reused if it already exists. Its terminal status is written and
    /// the working directory removed before this returns, on every path. A failure is
    /// returned to the caller after that.
    pub async fn run(
        &self,
        deployment_id: DeploymentId,
        provider_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderAttempt, DeployError> {
        let deployment = self
            .store
            .deployment(deployment_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("deployment {}", deployment_id)))?;

        let mut fsm = AttemptFsm::new();
        let attempt = self.register(&deployment, provider_id).await?;
        fsm.process(AttemptEvent::Registered)
            .map_err(DeployError::StateError)?;

        let sink = EventSink::new(self.store.clone(), &attempt);
        sink.info("Starting deployment process").await;

        let mut workdir = None;
        let outcome = self
            .drive(&deployment, &sink, &mut fsm, &mut workdir, cancel)
            .await
            .map_err(|e| cancelled_or(e, cancel));

        let recorded = match outcome {
            Ok(()) => {
                advance(&mut fsm, AttemptEvent::Complete);
                sink.info(format!("Deployment to {} completed successfully", provider_id))
                    .await;
                self.record(&attempt, AttemptStatus::Succeeded).await
            }
            Err(e) => {
                advance(&mut fsm, AttemptEvent::Fail(e.to_string()));
                sink.error(format!("Deployment failed: {}", e)).await;
                match self.record(&attempt, AttemptStatus::Failed).await {
                    Ok(_) => Err(e),
                    Err(DeployError::Superseded(reason)) => {
                        warn!("{}; keeping its status", reason);
                        Err(e)
                    }
                    Err(store_err) => {
                        error!(
                            "Failed to record failure of attempt {}: {}",
                            attempt.id, store_err
                        );
                        Err(e)
                    }
                }
            }
        };

        cleanup(workdir, &sink).await;

        debug!(
            "Attempt {} (run {}) for {} on {} ended in {:?}{}",
            attempt.id,
            attempt.run,
            deployment_id,
            provider_id,
            fsm.state(),
            fsm.error().map(|e| format!(": {}", e)).unwrap_or_default()
        );
        recorded
    }

    /// Get or create the attempt row and start a new run on it. The row goes back to
    /// `in_progress` and any overlapping older run loses its right to write the status.
    async fn register(
        &self,
        deployment: &Deployment,
        provider_id: &str,
    ) -> Result<ProviderAttempt, DeployError> {
        let (attempt, created) = self
            .store
            .get_or_create_attempt(deployment.id, provider_id)
            .await?;

        if created {
            info!("Created attempt {} for {} on {}", attempt.id, deployment.id, provider_id);
        } else {
            info!("Reusing attempt {} for {} on {}", attempt.id, deployment.id, provider_id);
        }
        self.store.start_attempt_run(attempt.id).await
    }

    /// Write the terminal status if this run still owns the attempt
    async fn record(
        &self,
        attempt: &ProviderAttempt,
        status: AttemptStatus,
    ) -> Result<ProviderAttempt, DeployError> {
        self.store
            .set_attempt_status(attempt.id, attempt.run, status)
            .await?
            .ok_or_else(|| {
                DeployError::Superseded(format!(
                    "run {} of attempt {} was superseded by a newer run",
                    attempt.run, attempt.id
                ))
            })
    }

    async fn drive(
        &self,
        deployment: &Deployment,
        sink: &EventSink,
        fsm: &mut AttemptFsm,
        workdir: &mut Option<WorkingDir>,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        // Unknown providers fail here, before any clone or remote call
        let driver = self.registry.resolve(sink.provider_id())?;

        let dir = workdir.insert(self.stager.prepare(deployment.id, sink.provider_id()).await?);

        self.stager.stage(&deployment.repo_url, dir, cancel).await?;
        fsm.process(AttemptEvent::Cloned)
            .map_err(DeployError::StateError)?;
        sink.info(format!("Cloned repository {}", deployment.repo_url))
            .await;

        self.stager.validate(dir).await?;
        fsm.process(AttemptEvent::Validated)
            .map_err(DeployError::StateError)?;

        let ctx = ProvisionContext {
            deployment_id: deployment.id,
            working_dir: dir.path(),
            sink,
            cancel,
        };
        driver.provision(&ctx).await?;
        fsm.process(AttemptEvent::Provisioned)
            .map_err(DeployError::StateError)?;
        Ok(())
    }
}

fn advance(fsm: &mut AttemptFsm, event: AttemptEvent) {
    if let Err(e) = fsm.process(event) {
        warn!("{}", e);
    }
}

/// A driver step interrupted by the token surfaces as a cancellation
fn cancelled_or(err: DeployError, cancel: &CancellationToken) -> DeployError {
    let interrupted = matches!(&err, DeployError::Driver(e) if e.cause == CANCELLED_CAUSE);
    if interrupted && cancel.is_cancelled() {
        DeployError::Cancelled
    } else {
        err
    }
}

async fn cleanup(workdir: Option<WorkingDir>, sink: &EventSink) {
    let Some(dir) = workdir else {
        return;
    };

    let path = dir.path().to_path_buf();
    match tokio::task::spawn_blocking(move || dir.close()).await {
        Ok(Ok(())) => sink.debug("Cleaned up temporary files").await,
        Ok(Err(e)) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            sink.warning(format!("Failed to clean up temporary files: {}", e))
                .await
        }
        Err(e) => warn!("Cleanup task for {} failed: {}", path.display(), e),
    }
}
