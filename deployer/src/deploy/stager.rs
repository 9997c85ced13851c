//! Artifact stager: private working directories and manifest validation

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::deployment::DeploymentId;

/// Compose manifest expected at the root of a staged repository
pub const MANIFEST_FILE: &str = "docker-compose.yml";

/// Version-control clone operation
#[async_trait]
pub trait RepositoryCloner: Send + Sync {
    /// Populate `destination` (an existing empty directory) with a working tree of `repo_url`
    async fn clone_repository(
        &self,
        repo_url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError>;
}

/// Temporary working directory exclusively owned by one executor run.
///
/// Removed by `close`, or on drop if the run unwinds before reaching it.
#[derive(Debug)]
pub struct WorkingDir {
    dir: TempDir,
}

impl WorkingDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn manifest(&self) -> File {
        File::new(self.dir.path().join(MANIFEST_FILE))
    }

    /// Remove the directory and everything in it
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// Stages source repositories into isolated working directories
pub struct ArtifactStager {
    cloner: Arc<dyn RepositoryCloner>,
    workspace_root: PathBuf,
}

impl ArtifactStager {
    pub fn new(cloner: Arc<dyn RepositoryCloner>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            cloner,
            workspace_root: workspace_root.into(),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Allocate a private, empty working directory for one attempt
    pub async fn prepare(
        &self,
        deployment_id: DeploymentId,
        provider_id: &str,
    ) -> Result<WorkingDir, DeployError> {
        tokio::fs::create_dir_all(&self.workspace_root).await?;

        let prefix = format!("deploy-{}-{}-", deployment_id, sanitise(provider_id));
        let root = self.workspace_root.clone();
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).tempdir_in(root)
        })
        .await
        .map_err(|e| DeployError::Internal(format!("workspace task failed: {}", e)))??;

        debug!("Prepared working directory {}", dir.path().display());
        Ok(WorkingDir { dir })
    }

    /// Clone the repository into the working directory
    pub async fn stage(
        &self,
        repo_url: &str,
        workdir: &WorkingDir,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        self.cloner
            .clone_repository(repo_url, workdir.path(), cancel)
            .await
    }

    /// Verify the working directory contains the deployable manifest
    pub async fn validate(&self, workdir: &WorkingDir) -> Result<PathBuf, DeployError> {
        let manifest = workdir.manifest();
        if !manifest.is_file().await {
            return Err(DeployError::ManifestMissing(PathBuf::from(MANIFEST_FILE)));
        }
        Ok(manifest.path().to_path_buf())
    }
}

fn sanitise(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WriteManifest(bool);

    #[async_trait]
    impl RepositoryCloner for WriteManifest {
        async fn clone_repository(
            &self,
            _repo_url: &str,
            destination: &Path,
            _cancel: &CancellationToken,
        ) -> Result<(), DeployError> {
            if self.0 {
                tokio::fs::write(destination.join(MANIFEST_FILE), "services: {}\n").await?;
            }
            tokio::fs::write(destination.join("README.md"), "hello").await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stage_and_validate() {
        let root = TempDir::new().unwrap();
        let stager = ArtifactStager::new(Arc::new(WriteManifest(true)), root.path().join("ws"));
        let id = DeploymentId::new();

        let workdir = stager.prepare(id, "aws").await.unwrap();
        assert!(workdir.path().starts_with(root.path().join("ws")));
        let name = workdir.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("deploy-{}-aws-", id)));

        stager
            .stage("https://example.com/app.git", &workdir, &CancellationToken::new())
            .await
            .unwrap();
        let manifest = stager.validate(&workdir).await.unwrap();
        assert!(manifest.ends_with(MANIFEST_FILE));

        let path = workdir.path().to_path_buf();
        workdir.close().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let root = TempDir::new().unwrap();
        let stager = ArtifactStager::new(Arc::new(WriteManifest(false)), root.path());
        let workdir = stager.prepare(DeploymentId::new(), "oracle").await.unwrap();

        stager
            .stage("https://example.com/app.git", &workdir, &CancellationToken::new())
            .await
            .unwrap();
        let result = stager.validate(&workdir).await;
        assert!(matches!(result, Err(DeployError::ManifestMissing(_))));
    }

    #[tokio::test]
    async fn test_separate_dirs_per_attempt() {
        let root = TempDir::new().unwrap();
        let stager = ArtifactStager::new(Arc::new(WriteManifest(true)), root.path());
        let id = DeploymentId::new();

        let a = stager.prepare(id, "aws").await.unwrap();
        let b = stager.prepare(id, "aws").await.unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_sanitise() {
        assert_eq!(sanitise("azure-classic"), "azure-classic");
        assert_eq!(sanitise("../etc"), "___etc");
    }
}
