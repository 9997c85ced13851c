//! Task dispatcher: one deploy task per requested provider

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::info;
use url::Url;

use crate::errors::DeployError;
use crate::models::deployment::{Deployment, DeploymentId, DeploymentRequest};
use crate::storage::store::Store;
use crate::workers::queue::{Task, TaskQueue};

const REPO_SCHEMES: &[&str] = &["https", "http", "ssh", "git", "file"];

/// Creates deployments and fans them out to the worker pool
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    queue: Arc<dyn TaskQueue>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Validate the request, create the `pending` deployment and enqueue its attempts.
    ///
    /// Returns once the tasks are queued; attempt outcomes are left to the aggregator.
    pub async fn submit(&self, request: DeploymentRequest) -> Result<Deployment, DeployError> {
        validate_repo_url(&request.repo_url)?;
        let providers = normalise_providers(&request.providers)?;

        let deployment = self
            .store
            .insert_deployment(&request.repo_url, &providers)
            .await?;
        info!(
            "Created deployment {} for {} on {:?}",
            deployment.id, deployment.repo_url, deployment.providers
        );

        try_join_all(
            deployment
                .providers
                .iter()
                .map(|provider_id| self.enqueue_deploy(deployment.id, provider_id)),
        )
        .await?;
        Ok(deployment)
    }

    /// Queue one more run for a provider the deployment requested
    pub async fn redispatch(
        &self,
        deployment_id: DeploymentId,
        provider_id: &str,
    ) -> Result<(), DeployError> {
        let deployment = self
            .store
            .deployment(deployment_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("deployment {}", deployment_id)))?;

        if !deployment.providers.iter().any(|p| p == provider_id) {
            return Err(DeployError::InvalidRequest(format!(
                "provider {} was not requested for deployment {}",
                provider_id, deployment_id
            )));
        }

        info!("Re-dispatching {} on {}", deployment_id, provider_id);
        self.enqueue_deploy(deployment_id, provider_id).await
    }

    async fn enqueue_deploy(
        &self,
        deployment_id: DeploymentId,
        provider_id: &str,
    ) -> Result<(), DeployError> {
        self.queue
            .enqueue(Task::Deploy {
                deployment_id,
                provider_id: provider_id.to_string(),
            })
            .await
    }
}

fn validate_repo_url(repo_url: &str) -> Result<(), DeployError> {
    let url = Url::parse(repo_url)
        .map_err(|e| DeployError::InvalidRequest(format!("invalid repository URL {}: {}", repo_url, e)))?;
    if !REPO_SCHEMES.contains(&url.scheme()) {
        return Err(DeployError::InvalidRequest(format!(
            "unsupported repository URL scheme: {}",
            url.scheme()
        )));
    }
    Ok(())
}

/// Trim, drop blanks and de-duplicate, keeping request order
fn normalise_providers(providers: &[String]) -> Result<Vec<String>, DeployError> {
    let mut normalised: Vec<String> = Vec::with_capacity(providers.len());
    for provider in providers.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        if !normalised.iter().any(|p| p == provider) {
            normalised.push(provider.to_string());
        }
    }

    if normalised.is_empty() {
        return Err(DeployError::InvalidRequest(
            "at least one provider is required".to_string(),
        ));
    }
    Ok(normalised)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deployment::DeploymentStatus;
    use crate::storage::memory::MemoryStore;
    use crate::workers::queue::LocalTaskQueue;

    fn request(repo_url: &str, providers: &[&str]) -> DeploymentRequest {
        DeploymentRequest {
            repo_url: repo_url.to_string(),
            providers: providers.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_submit_fans_out_one_task_per_provider() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let (queue, mut tasks) = LocalTaskQueue::channel();
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(queue));

        let deployment = dispatcher
            .submit(request("https://example.com/app.git", &["aws", " oracle", "aws"]))
            .await
            .unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Pending);
        assert_eq!(deployment.providers, vec!["aws".to_string(), "oracle".to_string()]);

        let mut queued = Vec::new();
        while let Ok(task) = tasks.try_recv() {
            queued.push(task);
        }
        assert_eq!(
            queued,
            vec![
                Task::Deploy { deployment_id: deployment.id, provider_id: "aws".to_string() },
                Task::Deploy { deployment_id: deployment.id, provider_id: "oracle".to_string() },
            ]
        );
        // Dispatch alone never creates attempts
        assert!(store.attempts(deployment.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_requests() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let (queue, _tasks) = LocalTaskQueue::channel();
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(queue));

        for bad in [
            request("not a url", &["aws"]),
            request("ftp://example.com/app.git", &["aws"]),
            request("https://example.com/app.git", &[]),
            request("https://example.com/app.git", &["  "]),
        ] {
            let err = dispatcher.submit(bad).await.unwrap_err();
            assert!(matches!(err, DeployError::InvalidRequest(_)), "{}", err);
        }
        assert!(store.list_deployments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redispatch() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let (queue, mut tasks) = LocalTaskQueue::channel();
        let dispatcher = Dispatcher::new(store, Arc::new(queue));

        let deployment = dispatcher
            .submit(request("https://example.com/app.git", &["aws"]))
            .await
            .unwrap();
        tasks.try_recv().unwrap();

        dispatcher.redispatch(deployment.id, "aws").await.unwrap();
        assert_eq!(
            tasks.try_recv().unwrap(),
            Task::Deploy { deployment_id: deployment.id, provider_id: "aws".to_string() }
        );

        assert!(matches!(
            dispatcher.redispatch(deployment.id, "gcp").await,
            Err(DeployError::InvalidRequest(_))
        ));
        assert!(matches!(
            dispatcher.redispatch(DeploymentId::new(), "aws").await,
            Err(DeployError::NotFound(_))
        ));
    }
}
