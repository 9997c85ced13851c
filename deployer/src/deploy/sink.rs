//! Event log sink scoped to one provider attempt

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::deployment::{DeploymentId, NewLogEntry, ProviderAttempt, Severity};
use crate::storage::store::Store;

/// Appends timestamped log entries for an attempt and mirrors them to `tracing`
#[derive(Clone)]
pub struct EventSink {
    store: Arc<dyn Store>,
    deployment_id: DeploymentId,
    attempt_id: Uuid,
    provider_id: String,
}

impl EventSink {
    pub fn new(store: Arc<dyn Store>, attempt: &ProviderAttempt) -> Self {
        Self {
            store,
            deployment_id: attempt.deployment_id,
            attempt_id: attempt.id,
            provider_id: attempt.provider_id.clone(),
        }
    }

    pub fn deployment_id(&self) -> DeploymentId {
        self.deployment_id
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Persist one entry. A store failure is reported through `tracing` and never
    /// interrupts the attempt.
    pub async fn record(&self, level: Severity, message: impl Into<String>) {
        let message = message.into();
        let deployment = self.deployment_id;
        let provider = self.provider_id.as_str();

        match level {
            Severity::Debug => debug!(%deployment, provider, "{}", message),
            Severity::Info => info!(%deployment, provider, "{}", message),
            Severity::Warning => warn!(%deployment, provider, "{}", message),
            Severity::Error | Severity::Critical => {
                error!(%deployment, provider, severity = %level, "{}", message)
            }
        }

        let entry = NewLogEntry {
            deployment_id: self.deployment_id,
            attempt_id: self.attempt_id,
            provider_id: self.provider_id.clone(),
            level,
            message,
        };
        if let Err(e) = self.store.append_log(entry).await {
            error!(%deployment, provider, "Failed to persist log entry: {}", e);
        }
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.record(Severity::Debug, message).await
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.record(Severity::Info, message).await
    }

    pub async fn warning(&self, message: impl Into<String>) {
        self.record(Severity::Warning, message).await
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.record(Severity::Error, message).await
    }

    pub async fn critical(&self, message: impl Into<String>) {
        self.record(Severity::Critical, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deployment::LogFilter;
    use crate::storage::memory::MemoryStore;

    #[tokio::test]
    async fn test_entries_are_scoped_and_ordered() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let deployment = store
            .insert_deployment("https://example.com/app.git", &["aws".to_string()])
            .await
            .unwrap();
        let (attempt, _) = store.get_or_create_attempt(deployment.id, "aws").await.unwrap();

        let sink = EventSink::new(store.clone(), &attempt);
        sink.info("first").await;
        sink.warning("second").await;
        sink.critical("third").await;

        let entries = store.logs(deployment.id, &LogFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.attempt_id == attempt.id && e.provider_id == "aws"));
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].level, Severity::Warning);
        assert_eq!(entries[2].level, Severity::Critical);
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
