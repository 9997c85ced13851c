//! In-memory store backend

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::DeployError;
use crate::models::deployment::{
    AttemptStatus, Deployment, DeploymentId, DeploymentStatus, LogEntry, LogFilter, NewLogEntry,
    ProviderAttempt,
};
use crate::storage::store::Store;

#[derive(Default)]
struct Inner {
    deployments: HashMap<DeploymentId, Deployment>,
    attempts: Vec<ProviderAttempt>,
    logs: Vec<LogEntry>,
    next_log_id: u64,
}

/// Store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn find_attempt(inner: &mut Inner, attempt_id: Uuid) -> Result<&mut ProviderAttempt, DeployError> {
    inner
        .attempts
        .iter_mut()
        .find(|a| a.id == attempt_id)
        .ok_or_else(|| DeployError::NotFound(format!("provider attempt {}", attempt_id)))
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_deployment(
        &self,
        repo_url: &str,
        providers: &[String],
    ) -> Result<Deployment, DeployError> {
        let now = Utc::now();
        let deployment = Deployment {
            id: DeploymentId::new(),
            repo_url: repo_url.to_string(),
            providers: providers.to_vec(),
            status: DeploymentStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        let mut inner = self.inner.write().await;
        inner.deployments.insert(deployment.id, deployment.clone());
        Ok(deployment)
    }

    async fn deployment(&self, id: DeploymentId) -> Result<Option<Deployment>, DeployError> {
        let inner = self.inner.read().await;
        Ok(inner.deployments.get(&id).cloned())
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>, DeployError> {
        let inner = self.inner.read().await;
        let mut deployments: Vec<Deployment> = inner.deployments.values().cloned().collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }

    async fn delete_deployment(&self, id: DeploymentId) -> Result<bool, DeployError> {
        let mut inner = self.inner.write().await;
        if inner.deployments.remove(&id).is_none() {
            return Ok(false);
        }
        inner.attempts.retain(|a| a.deployment_id != id);
        inner.logs.retain(|l| l.deployment_id != id);
        Ok(true)
    }

    async fn get_or_create_attempt(
        &self,
        deployment_id: DeploymentId,
        provider_id: &str,
    ) -> Result<(ProviderAttempt, bool), DeployError> {
        let mut inner = self.inner.write().await;

        if !inner.deployments.contains_key(&deployment_id) {
            return Err(DeployError::NotFound(format!("deployment {}", deployment_id)));
        }

        if let Some(existing) = inner
            .attempts
            .iter()
            .find(|a| a.deployment_id == deployment_id && a.provider_id == provider_id)
        {
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let attempt = ProviderAttempt {
            id: Uuid::new_v4(),
            deployment_id,
            provider_id: provider_id.to_string(),
            status: AttemptStatus::InProgress,
            run: 0,
            created_at: now,
            updated_at: now,
        };
        inner.attempts.push(attempt.clone());
        Ok((attempt, true))
    }

    async fn start_attempt_run(&self, attempt_id: Uuid) -> Result<ProviderAttempt, DeployError> {
        let mut inner = self.inner.write().await;
        let attempt = find_attempt(&mut inner, attempt_id)?;

        attempt.run += 1;
        attempt.status = AttemptStatus::InProgress;
        attempt.updated_at = Utc::now();
        Ok(attempt.clone())
    }

    async fn set_attempt_status(
        &self,
        attempt_id: Uuid,
        run: u64,
        status: AttemptStatus,
    ) -> Result<Option<ProviderAttempt>, DeployError> {
        let mut inner = self.inner.write().await;
        let attempt = find_attempt(&mut inner, attempt_id)?;

        if attempt.run != run {
            return Ok(None);
        }
        attempt.status = status;
        attempt.updated_at = Utc::now();
        Ok(Some(attempt.clone()))
    }

    async fn attempts(
        &self,
        deployment_id: DeploymentId,
    ) -> Result<Vec<ProviderAttempt>, DeployError> {
        let inner = self.inner.read().await;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.deployment_id == deployment_id)
            .cloned()
            .collect())
    }

    async fn finalize_deployment(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, DeployError> {
        if !status.is_terminal() {
            return Err(DeployError::StateError(format!(
                "cannot finalize deployment {} as {:?}",
                id, status
            )));
        }

        let mut inner = self.inner.write().await;
        let deployment = inner
            .deployments
            .get_mut(&id)
            .ok_or_else(|| DeployError::NotFound(format!("deployment {}", id)))?;

        if deployment.status.is_terminal() {
            return Ok(false);
        }

        deployment.status = status;
        deployment.completed_at = Some(completed_at);
        deployment.updated_at = completed_at;
        Ok(true)
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry, DeployError> {
        let mut inner = self.inner.write().await;

        if !inner.deployments.contains_key(&entry.deployment_id) {
            return Err(DeployError::NotFound(format!("deployment {}", entry.deployment_id)));
        }

        inner.next_log_id += 1;
        let entry = LogEntry {
            id: inner.next_log_id,
            deployment_id: entry.deployment_id,
            attempt_id: entry.attempt_id,
            provider_id: entry.provider_id,
            level: entry.level,
            message: entry.message,
            timestamp: Utc::now(),
        };
        inner.logs.push(entry.clone());
        Ok(entry)
    }

    async fn logs(
        &self,
        deployment_id: DeploymentId,
        filter: &LogFilter,
    ) -> Result<Vec<LogEntry>, DeployError> {
        let inner = self.inner.read().await;
        let mut entries: Vec<LogEntry> = inner
            .logs
            .iter()
            .filter(|l| l.deployment_id == deployment_id)
            .filter(|l| {
                filter
                    .provider_id
                    .as_deref()
                    .map_or(true, |p| l.provider_id == p)
            })
            .filter(|l| filter.level.map_or(true, |level| l.level == level))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(entries)
    }
}
