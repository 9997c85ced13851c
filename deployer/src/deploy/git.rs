//! Git checkout for staging source repositories

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::deploy::stager::RepositoryCloner;
use crate::errors::DeployError;
use crate::storage::settings::GitSettings;

/// Clones repositories with the `git` executable
#[derive(Debug, Clone)]
pub struct GitCloner {
    binary: String,
    depth: Option<u32>,
}

impl GitCloner {
    pub fn new(settings: &GitSettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            depth: settings.depth,
        }
    }

    fn command(&self, repo_url: &str, destination: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(["clone", "--quiet"]);
        if let Some(depth) = self.depth {
            command.arg(format!("--depth={}", depth));
        }
        command
            .arg("--")
            .arg(repo_url)
            .arg(destination)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Default for GitCloner {
    fn default() -> Self {
        Self::new(&GitSettings::default())
    }
}

#[async_trait]
impl RepositoryCloner for GitCloner {
    async fn clone_repository(
        &self,
        repo_url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        info!("Cloning Git repository: {} to {}", repo_url, destination.display());

        let output = tokio::select! {
            output = self.command(repo_url, destination).output() => {
                output.map_err(|e| DeployError::CloneFailed {
                    url: repo_url.to_string(),
                    cause: format!("failed to run {}: {}", self.binary, e),
                })?
            }
            _ = cancel.cancelled() => {
                debug!("Clone of {} cancelled", repo_url);
                return Err(DeployError::Cancelled);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DeployError::CloneFailed {
                url: repo_url.to_string(),
                cause: if stderr.is_empty() {
                    format!("git clone exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        info!("Successfully cloned Git repository");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_clone_failure() {
        let cloner = GitCloner::new(&GitSettings {
            binary: "definitely-not-a-git-binary".to_string(),
            depth: None,
        });
        let dir = tempfile::TempDir::new().unwrap();

        let result = cloner
            .clone_repository(
                "https://example.com/app.git",
                dir.path(),
                &CancellationToken::new(),
            )
            .await;

        match result {
            Err(DeployError::CloneFailed { url, cause }) => {
                assert_eq!(url, "https://example.com/app.git");
                assert!(!cause.is_empty());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_clone() {
        let cloner = GitCloner::default();
        let dir = tempfile::TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        // `select!` polls branches in random order, so a fast spawn failure may win
        let result = cloner
            .clone_repository("https://example.invalid/app.git", dir.path(), &cancel)
            .await;
        assert!(result.is_err());
    }
}
