//! Deployment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(Uuid);

impl DeploymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Object key of the packaged artifact within the configured bucket
    pub fn artifact_key(&self) -> String {
        format!("{}/app.zip", self.0)
    }

    /// Name of the provider stack owned by this deployment
    pub fn stack_name(&self) -> String {
        format!("deploy-{}", self.0)
    }
}

impl Default for DeploymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DeploymentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for DeploymentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Overall status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Completed | DeploymentStatus::Failed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Status of a single provider attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Succeeded,
    Failed,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }
}

/// One request to deploy a repository to a set of providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,

    /// Source repository URL
    pub repo_url: String,

    /// Requested provider identifiers, de-duplicated in request order
    pub providers: Vec<String>,

    pub status: DeploymentStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Set only on the terminal transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request accepted by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub repo_url: String,
    pub providers: Vec<String>,
}

/// One provider-specific execution tied to a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub id: Uuid,
    pub deployment_id: DeploymentId,
    pub provider_id: String,
    pub status: AttemptStatus,

    /// Generation of the executor run that owns the row. Bumped by every run start;
    /// status writes from an older run are rejected.
    #[serde(default)]
    pub run: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Severity of a persisted log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// Append-only event scoped to a deployment and one of its attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub deployment_id: DeploymentId,
    pub attempt_id: Uuid,
    pub provider_id: String,
    pub level: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Log entry before the store assigns its id and timestamp
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub deployment_id: DeploymentId,
    pub attempt_id: Uuid,
    pub provider_id: String,
    pub level: Severity,
    pub message: String,
}

/// Filter for listing log entries
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub provider_id: Option<String>,
    pub level: Option<Severity>,
}

/// A deployment together with its provider attempts and event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentReport {
    #[serde(flatten)]
    pub deployment: Deployment,
    pub attempts: Vec<ProviderAttempt>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl DeploymentReport {
    pub fn attempt(&self, provider_id: &str) -> Option<&ProviderAttempt> {
        self.attempts.iter().find(|a| a.provider_id == provider_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names() {
        let id: DeploymentId = "7f1c2a52-9a43-4d8e-b1a2-0c5e8d3f9b10".parse().unwrap();
        assert_eq!(id.artifact_key(), "7f1c2a52-9a43-4d8e-b1a2-0c5e8d3f9b10/app.zip");
        assert_eq!(id.stack_name(), "deploy-7f1c2a52-9a43-4d8e-b1a2-0c5e8d3f9b10");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&DeploymentStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(serde_json::to_string(&AttemptStatus::Succeeded).unwrap(), "\"succeeded\"");
        assert_eq!(serde_json::to_string(&Severity::Warning).unwrap(), "\"warning\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!DeploymentStatus::Pending.is_terminal());
        assert!(!DeploymentStatus::InProgress.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
        assert!(!AttemptStatus::InProgress.is_terminal());
        assert!(AttemptStatus::Failed.is_terminal());
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("WARN".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("fatal".parse::<Severity>().is_err());
    }
}
