//! Error types for the deployment orchestrator

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provisioning stage a driver failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStage {
    /// Archiving the working directory
    Packaging,

    /// Uploading the archive to object storage
    Upload,

    /// Translating the compose manifest into a provider template
    TemplateConversion,

    /// Creating or updating the provider stack
    StackOperation,
}

impl fmt::Display for DriverStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Packaging => write!(f, "packaging"),
            Self::Upload => write!(f, "upload"),
            Self::TemplateConversion => write!(f, "template conversion"),
            Self::StackOperation => write!(f, "stack operation"),
        }
    }
}

/// Failure raised by a provider driver while provisioning
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} failed: {cause}")]
pub struct DriverError {
    pub stage: DriverStage,
    pub cause: String,
}

impl DriverError {
    pub fn new(stage: DriverStage, cause: impl Into<String>) -> Self {
        let cause = cause.into();
        Self {
            stage,
            cause: if cause.is_empty() {
                "unknown cause".to_string()
            } else {
                cause
            },
        }
    }
}

/// Classification of every failure the core can surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CloneFailure,
    ManifestMissing,
    PackagingFailure,
    UploadFailure,
    TemplateConversionFailure,
    StackOperationFailure,
    UnsupportedProvider,
    Cancelled,
    Internal,
}

/// Main error type for the deployment orchestrator
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to clone {url}: {cause}")]
    CloneFailed { url: String, cause: String },

    #[error("Manifest not found: {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Deployment cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid state transition: {0}")]
    StateError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Superseded: {0}")]
    Superseded(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Map the error onto the failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::CloneFailed { .. } => ErrorKind::CloneFailure,
            DeployError::ManifestMissing(_) => ErrorKind::ManifestMissing,
            DeployError::Driver(e) => match e.stage {
                DriverStage::Packaging => ErrorKind::PackagingFailure,
                DriverStage::Upload => ErrorKind::UploadFailure,
                DriverStage::TemplateConversion => ErrorKind::TemplateConversionFailure,
                DriverStage::StackOperation => ErrorKind::StackOperationFailure,
            },
            DeployError::UnsupportedProvider(_) => ErrorKind::UnsupportedProvider,
            DeployError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }
}
