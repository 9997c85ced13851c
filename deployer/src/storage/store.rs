//! Persistence handle for deployments, attempts and log entries

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::DeployError;
use crate::models::deployment::{
    AttemptStatus, Deployment, DeploymentId, DeploymentStatus, LogEntry, LogFilter, NewLogEntry,
    ProviderAttempt,
};

/// Storage operations the orchestration core depends on.
///
/// Implementations must keep at most one attempt per `(deployment, provider)` pair and
/// must cascade deployment deletion to its attempts and log entries.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a new deployment in `pending`
    async fn insert_deployment(
        &self,
        repo_url: &str,
        providers: &[String],
    ) -> Result<Deployment, DeployError>;

    async fn deployment(&self, id: DeploymentId) -> Result<Option<Deployment>, DeployError>;

    /// All deployments, newest first
    async fn list_deployments(&self) -> Result<Vec<Deployment>, DeployError>;

    /// Delete a deployment with its attempts and logs. Returns false if it did not exist.
    async fn delete_deployment(&self, id: DeploymentId) -> Result<bool, DeployError>;

    /// Return the attempt for the pair, creating it in `in_progress` if absent.
    /// The flag is true when the row was created by this call.
    async fn get_or_create_attempt(
        &self,
        deployment_id: DeploymentId,
        provider_id: &str,
    ) -> Result<(ProviderAttempt, bool), DeployError>;

    /// Hand the attempt to a new executor run: bump its run generation and move it to
    /// `in_progress`. Returns the row carrying the generation the run now owns.
    async fn start_attempt_run(&self, attempt_id: Uuid) -> Result<ProviderAttempt, DeployError>;

    /// Compare-and-set the attempt status on the run generation.
    /// Returns `None` without writing if a newer run has taken the attempt over.
    async fn set_attempt_status(
        &self,
        attempt_id: Uuid,
        run: u64,
        status: AttemptStatus,
    ) -> Result<Option<ProviderAttempt>, DeployError>;

    /// Attempts of a deployment in creation order
    async fn attempts(&self, deployment_id: DeploymentId)
        -> Result<Vec<ProviderAttempt>, DeployError>;

    /// Move a non-terminal deployment to a terminal status.
    /// Returns false without writing if the deployment is already terminal.
    async fn finalize_deployment(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, DeployError>;

    async fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry, DeployError>;

    /// Log entries of a deployment ordered by timestamp
    async fn logs(
        &self,
        deployment_id: DeploymentId,
        filter: &LogFilter,
    ) -> Result<Vec<LogEntry>, DeployError>;
}
