//! Infrastructure stack API

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::errors::DeployError;
use crate::storage::settings::StackApiSettings;

/// Template submitted to a stack API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "format", content = "body", rename_all = "snake_case")]
pub enum StackTemplate {
    /// Inline template document
    Document(String),

    /// Base64-encoded zip holding the configuration
    ZipBase64(String),
}

/// Create or update request for one stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackRequest {
    pub name: String,
    pub template: StackTemplate,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// Stack as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Result of a create-or-update submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackOutcome {
    Created(StackSummary),
    Updated(StackSummary),
    Unchanged(StackSummary),
}

impl StackOutcome {
    pub fn summary(&self) -> &StackSummary {
        match self {
            StackOutcome::Created(s) | StackOutcome::Updated(s) | StackOutcome::Unchanged(s) => s,
        }
    }
}

/// Errors reported by a stack API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackApiError {
    #[error("no changes to apply")]
    NoChanges,

    #[error("stack API rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("stack API unreachable: {0}")]
    Transport(String),
}

/// Provider stack-provisioning API
#[async_trait]
pub trait StackClient: Send + Sync {
    async fn find_stack(&self, name: &str) -> Result<Option<StackSummary>, StackApiError>;

    async fn create_stack(&self, request: &StackRequest) -> Result<StackSummary, StackApiError>;

    async fn update_stack(
        &self,
        stack: &StackSummary,
        request: &StackRequest,
    ) -> Result<StackSummary, StackApiError>;
}

/// Create the stack if absent, update it otherwise. An update with nothing to apply succeeds.
pub async fn upsert_stack(
    client: &dyn StackClient,
    request: &StackRequest,
) -> Result<StackOutcome, StackApiError> {
    match client.find_stack(&request.name).await? {
        None => client.create_stack(request).await.map(StackOutcome::Created),
        Some(existing) => match client.update_stack(&existing, request).await {
            Ok(updated) => Ok(StackOutcome::Updated(updated)),
            Err(StackApiError::NoChanges) => Ok(StackOutcome::Unchanged(existing)),
            Err(e) => Err(e),
        },
    }
}

const NO_UPDATES_MARKER: &str = "no updates are to be performed";

/// JSON client for a stack provisioning gateway
pub struct HttpStackClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpStackClient {
    pub fn new(settings: &StackApiSettings) -> Result<Self, DeployError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| DeployError::ConfigError(format!("stack API client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    async fn read_summary(response: reqwest::Response) -> Result<StackSummary, StackApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Stack API request failed: {} - {}", status, body);
            return Err(StackApiError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| StackApiError::Transport(e.to_string()))
    }
}

#[async_trait]
impl StackClient for HttpStackClient {
    async fn find_stack(&self, name: &str) -> Result<Option<StackSummary>, StackApiError> {
        let url = format!("{}/stacks/{}", self.base_url, name);
        debug!("GET {}", url);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| StackApiError::Transport(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_summary(response).await.map(Some)
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<StackSummary, StackApiError> {
        let url = format!("{}/stacks", self.base_url);
        debug!("POST {}", url);

        let response = self
            .authorize(self.client.post(&url).json(request))
            .send()
            .await
            .map_err(|e| StackApiError::Transport(e.to_string()))?;
        Self::read_summary(response).await
    }

    async fn update_stack(
        &self,
        stack: &StackSummary,
        request: &StackRequest,
    ) -> Result<StackSummary, StackApiError> {
        let url = format!("{}/stacks/{}", self.base_url, stack.id);
        debug!("PUT {}", url);

        let response = self
            .authorize(self.client.put(&url).json(request))
            .send()
            .await
            .map_err(|e| StackApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Err(StackApiError::NoChanges);
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            if body.to_lowercase().contains(NO_UPDATES_MARKER) {
                return Err(StackApiError::NoChanges);
            }
            error!("Stack update failed: {} - {}", status, body);
            return Err(StackApiError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }
        Self::read_summary(response).await
    }
}

/// A stack held by [`MemoryStackClient`]
#[derive(Debug, Clone)]
pub struct StoredStack {
    pub summary: StackSummary,
    pub request: StackRequest,
    pub revision: u32,
}

/// Stack API kept in memory
#[derive(Default)]
pub struct MemoryStackClient {
    stacks: Mutex<HashMap<String, StoredStack>>,
    rejection: Mutex<Option<String>>,
}

impl MemoryStackClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every following create or update with `message`
    pub fn reject_with(&self, message: impl Into<String>) {
        let mut rejection = self.rejection.lock().unwrap_or_else(|e| e.into_inner());
        *rejection = Some(message.into());
    }

    pub fn stack(&self, name: &str) -> Option<StoredStack> {
        let stacks = self.stacks.lock().unwrap_or_else(|e| e.into_inner());
        stacks.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        let stacks = self.stacks.lock().unwrap_or_else(|e| e.into_inner());
        stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_rejection(&self) -> Result<(), StackApiError> {
        let rejection = self.rejection.lock().unwrap_or_else(|e| e.into_inner());
        match rejection.as_ref() {
            Some(message) => Err(StackApiError::Rejected {
                status: 400,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StackClient for MemoryStackClient {
    async fn find_stack(&self, name: &str) -> Result<Option<StackSummary>, StackApiError> {
        Ok(self.stack(name).map(|s| s.summary))
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<StackSummary, StackApiError> {
        self.check_rejection()?;
        let mut stacks = self.stacks.lock().unwrap_or_else(|e| e.into_inner());
        if stacks.contains_key(&request.name) {
            return Err(StackApiError::Rejected {
                status: 409,
                message: format!("stack {} already exists", request.name),
            });
        }

        let summary = StackSummary {
            id: format!("stack-{}", stacks.len() + 1),
            name: request.name.clone(),
            status: Some("CREATE_IN_PROGRESS".to_string()),
        };
        stacks.insert(
            request.name.clone(),
            StoredStack {
                summary: summary.clone(),
                request: request.clone(),
                revision: 1,
            },
        );
        Ok(summary)
    }

    async fn update_stack(
        &self,
        stack: &StackSummary,
        request: &StackRequest,
    ) -> Result<StackSummary, StackApiError> {
        self.check_rejection()?;
        let mut stacks = self.stacks.lock().unwrap_or_else(|e| e.into_inner());
        let stored = stacks.get_mut(&stack.name).ok_or_else(|| StackApiError::Rejected {
            status: 404,
            message: format!("stack {} does not exist", stack.name),
        })?;

        if stored.request == *request {
            return Err(StackApiError::NoChanges);
        }

        stored.request = request.clone();
        stored.revision += 1;
        stored.summary.status = Some("UPDATE_IN_PROGRESS".to_string());
        Ok(stored.summary.clone())
    }
}
