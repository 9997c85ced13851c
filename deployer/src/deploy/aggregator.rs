//! Status aggregator: folds provider attempts into the deployment's overall status

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::deployment::{AttemptStatus, DeploymentId, DeploymentStatus, ProviderAttempt};
use crate::storage::store::Store;

/// Result of one aggregation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Some attempts are not terminal yet; nothing was written
    Pending { remaining: usize },

    /// This pass wrote the terminal status
    Finalized(DeploymentStatus),

    /// The deployment was already terminal; nothing was written
    AlreadyTerminal(DeploymentStatus),
}

/// Overall status once every requested provider has a terminal attempt.
///
/// `None` while any requested provider has no attempt yet or an attempt is still
/// `in_progress`. Any failed attempt fails the whole deployment.
pub fn aggregate(requested: &[String], attempts: &[ProviderAttempt]) -> Option<DeploymentStatus> {
    if requested.is_empty() && attempts.is_empty() {
        return None;
    }
    if remaining(requested, attempts) > 0 {
        return None;
    }

    if attempts.iter().any(|a| a.status == AttemptStatus::Failed) {
        Some(DeploymentStatus::Failed)
    } else {
        Some(DeploymentStatus::Completed)
    }
}

/// Number of requested providers or attempts that are not terminal
fn remaining(requested: &[String], attempts: &[ProviderAttempt]) -> usize {
    let missing = requested
        .iter()
        .filter(|provider| !attempts.iter().any(|a| &a.provider_id == *provider))
        .count();
    let running = attempts.iter().filter(|a| !a.status.is_terminal()).count();
    missing + running
}

/// Finalizes deployments whose attempts are all terminal
#[derive(Clone)]
pub struct StatusAggregator {
    store: Arc<dyn Store>,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Finalize one deployment if possible. Safe to call any number of times.
    pub async fn finalize(&self, deployment_id: DeploymentId) -> Result<Aggregation, DeployError> {
        let deployment = self
            .store
            .deployment(deployment_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("deployment {}", deployment_id)))?;

        if deployment.status.is_terminal() {
            return Ok(Aggregation::AlreadyTerminal(deployment.status));
        }

        let attempts = self.store.attempts(deployment_id).await?;
        let Some(status) = aggregate(&deployment.providers, &attempts) else {
            let remaining = remaining(&deployment.providers, &attempts);
            debug!("Deployment {} has {} attempt(s) outstanding", deployment_id, remaining);
            return Ok(Aggregation::Pending { remaining });
        };

        if self
            .store
            .finalize_deployment(deployment_id, status, Utc::now())
            .await?
        {
            info!("Deployment {} finalized as {:?}", deployment_id, status);
            return Ok(Aggregation::Finalized(status));
        }

        // Another aggregator won the race
        let current = self
            .store
            .deployment(deployment_id)
            .await?
            .map(|d| d.status)
            .unwrap_or(status);
        Ok(Aggregation::AlreadyTerminal(current))
    }

    /// Finalize every non-terminal deployment. Returns the ones finalized by this pass.
    pub async fn sweep(&self) -> Result<Vec<(DeploymentId, DeploymentStatus)>, DeployError> {
        let mut finalized = Vec::new();
        for deployment in self.store.list_deployments().await? {
            if deployment.status.is_terminal() {
                continue;
            }
            match self.finalize(deployment.id).await {
                Ok(Aggregation::Finalized(status)) => finalized.push((deployment.id, status)),
                Ok(_) => {}
                // Deleted between listing and finalizing
                Err(DeployError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(finalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn attempt(provider: &str, status: AttemptStatus) -> ProviderAttempt {
        ProviderAttempt {
            id: Uuid::new_v4(),
            deployment_id: DeploymentId::new(),
            provider_id: provider.to_string(),
            status,
            run: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn providers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_aggregate_rules() {
        let requested = providers(&["aws", "oracle"]);
        use AttemptStatus::*;

        let cases = [
            (vec![("aws", Succeeded), ("oracle", Succeeded)], Some(DeploymentStatus::Completed)),
            (vec![("aws", Succeeded), ("oracle", Failed)], Some(DeploymentStatus::Failed)),
            (vec![("aws", Failed), ("oracle", Failed)], Some(DeploymentStatus::Failed)),
            (vec![("aws", Failed), ("oracle", InProgress)], None),
            (vec![("aws", Succeeded)], None),
            (vec![], None),
        ];

        for (attempts, expected) in cases {
            let attempts: Vec<_> = attempts.into_iter().map(|(p, s)| attempt(p, s)).collect();
            assert_eq!(aggregate(&requested, &attempts), expected, "{:?}", attempts);
        }
    }

    #[tokio::test]
    async fn test_finalize_exactly_once() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let aggregator = StatusAggregator::new(store.clone());
        let deployment = store
            .insert_deployment("https://example.com/app.git", &providers(&["aws", "oracle"]))
            .await
            .unwrap();

        let (aws, _) = store.get_or_create_attempt(deployment.id, "aws").await.unwrap();
        assert_eq!(
            aggregator.finalize(deployment.id).await.unwrap(),
            Aggregation::Pending { remaining: 2 }
        );

        let (oracle, _) = store.get_or_create_attempt(deployment.id, "oracle").await.unwrap();
        store.set_attempt_status(aws.id, aws.run, AttemptStatus::Succeeded).await.unwrap();
        assert_eq!(
            aggregator.finalize(deployment.id).await.unwrap(),
            Aggregation::Pending { remaining: 1 }
        );
        let unchanged = store.deployment(deployment.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, DeploymentStatus::Pending);
        assert!(unchanged.completed_at.is_none());

        store.set_attempt_status(oracle.id, oracle.run, AttemptStatus::Failed).await.unwrap();
        assert_eq!(
            aggregator.finalize(deployment.id).await.unwrap(),
            Aggregation::Finalized(DeploymentStatus::Failed)
        );
        let first = store.deployment(deployment.id).await.unwrap().unwrap();
        assert!(first.completed_at.is_some());

        assert_eq!(
            aggregator.finalize(deployment.id).await.unwrap(),
            Aggregation::AlreadyTerminal(DeploymentStatus::Failed)
        );
        let second = store.deployment(deployment.id).await.unwrap().unwrap();
        assert_eq!(first.completed_at, second.completed_at);
    }

    #[tokio::test]
    async fn test_sweep() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let aggregator = StatusAggregator::new(store.clone());

        let done = store
            .insert_deployment("https://example.com/a.git", &providers(&["aws"]))
            .await
            .unwrap();
        let (attempt, _) = store.get_or_create_attempt(done.id, "aws").await.unwrap();
        store.set_attempt_status(attempt.id, attempt.run, AttemptStatus::Succeeded).await.unwrap();

        let running = store
            .insert_deployment("https://example.com/b.git", &providers(&["aws"]))
            .await
            .unwrap();
        store.get_or_create_attempt(running.id, "aws").await.unwrap();

        let finalized = aggregator.sweep().await.unwrap();
        assert_eq!(finalized, vec![(done.id, DeploymentStatus::Completed)]);
        assert!(aggregator.sweep().await.unwrap().is_empty());
    }
}
