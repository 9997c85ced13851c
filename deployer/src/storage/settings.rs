//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Optional directory for rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Root under which per-attempt working directories are created
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,

    /// Maximum number of tasks executing at once
    #[serde(default = "default_concurrency")]
    pub worker_concurrency: usize,

    /// Interval of the aggregator sweep in seconds
    #[serde(default = "default_sweep_interval")]
    pub aggregator_interval_secs: u64,

    /// Grace period for in-flight tasks on shutdown, in seconds
    #[serde(default = "default_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,

    /// Source checkout configuration
    #[serde(default)]
    pub git: GitSettings,

    /// Provider driver configuration
    #[serde(default)]
    pub providers: ProviderSettings,
}

fn default_concurrency() -> usize {
    4
}

fn default_sweep_interval() -> u64 {
    15
}

fn default_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            log_dir: None,
            workspace_dir: None,
            worker_concurrency: default_concurrency(),
            aggregator_interval_secs: default_sweep_interval(),
            max_shutdown_delay_secs: default_shutdown_delay(),
            git: GitSettings::default(),
            providers: ProviderSettings::default(),
        }
    }
}

/// Git checkout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    /// Git executable
    #[serde(default = "default_git_binary")]
    pub binary: String,

    /// Shallow clone depth; full history when absent
    #[serde(default)]
    pub depth: Option<u32>,
}

fn default_git_binary() -> String {
    "git".to_string()
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            depth: Some(1),
        }
    }
}

/// Per-provider settings. A provider without settings is not registered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub aws: Option<AwsSettings>,

    #[serde(default)]
    pub oracle: Option<OracleSettings>,
}

/// Provisioning gateway used to submit stacks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackApiSettings {
    /// Base URL of the stack API
    pub base_url: String,

    /// Bearer token
    #[serde(default, skip_serializing)]
    pub token: Option<SecretString>,

    /// Request timeout in seconds
    #[serde(default = "default_stack_timeout")]
    pub timeout_secs: u64,
}

fn default_stack_timeout() -> u64 {
    60
}

/// AWS driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsSettings {
    /// Artifact bucket
    pub bucket: String,

    #[serde(default = "default_aws_region")]
    pub region: String,

    /// Custom S3 endpoint (S3-compatible stores)
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<SecretString>,

    pub stack_api: StackApiSettings,

    /// Fargate task cpu units
    #[serde(default = "default_aws_cpu")]
    pub cpu: u32,

    /// Fargate task memory in MiB
    #[serde(default = "default_aws_memory")]
    pub memory_mib: u32,

    /// Subnets for the ECS service
    #[serde(default)]
    pub subnets: Vec<String>,

    #[serde(default = "default_true")]
    pub assign_public_ip: bool,
}

fn default_aws_region() -> String {
    "us-east-1".to_string()
}

fn default_aws_cpu() -> u32 {
    256
}

fn default_aws_memory() -> u32 {
    512
}

fn default_true() -> bool {
    true
}

/// Oracle Cloud driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSettings {
    /// Artifact bucket
    pub bucket: String,

    /// Object storage namespace
    pub namespace: String,

    pub region: String,

    pub compartment_id: String,

    pub availability_domain: String,

    pub subnet_id: String,

    #[serde(default = "default_oracle_shape")]
    pub shape: String,

    #[serde(default = "default_oracle_ocpus")]
    pub ocpus: u32,

    #[serde(default = "default_oracle_memory")]
    pub memory_gbs: u32,

    /// Customer secret key id for the S3 compatibility API
    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<SecretString>,

    pub stack_api: StackApiSettings,
}

fn default_oracle_shape() -> String {
    "CI.Standard.E4.Flex".to_string()
}

fn default_oracle_ocpus() -> u32 {
    1
}

fn default_oracle_memory() -> u32 {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.log_level, LogLevel::Info);
        assert_eq!(settings.worker_concurrency, 4);
        assert_eq!(settings.git.binary, "git");
        assert!(settings.providers.aws.is_none());
        assert!(settings.providers.oracle.is_none());
    }

    #[test]
    fn test_provider_settings() {
        let raw = r#"{
            "log_level": "debug",
            "providers": {
                "aws": {
                    "bucket": "artifacts",
                    "subnets": ["subnet-1"],
                    "stack_api": { "base_url": "https://stacks.internal/aws", "token": "s3cr3t" }
                }
            }
        }"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.log_level, LogLevel::Debug);

        let aws = settings.providers.aws.unwrap();
        assert_eq!(aws.region, "us-east-1");
        assert_eq!(aws.cpu, 256);
        assert!(aws.stack_api.token.is_some());
        assert_eq!(aws.stack_api.timeout_secs, 60);
    }
}
