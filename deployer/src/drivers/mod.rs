//! Provider drivers
//!
//! A driver turns a validated working directory into a running stack on one cloud
//! provider. Every driver follows the same four steps: package, upload, translate the
//! compose manifest, and create or update the provider stack. The shared steps live here,
//! the translation is provider specific.

pub mod aws;
pub mod oracle;
pub mod registry;
pub mod stack;
pub mod storage;

use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tokio_util::sync::CancellationToken;

use crate::deploy::archive::{self, Archive};
use crate::deploy::compose::{ComposeFile, ServiceSpec};
use crate::deploy::sink::EventSink;
use crate::deploy::stager::MANIFEST_FILE;
use crate::errors::{DriverError, DriverStage};
use crate::models::deployment::DeploymentId;
use stack::{StackClient, StackOutcome, StackRequest};

pub use registry::{DriverRegistry, ProviderKind};

/// Cause recorded when a step is interrupted by the cancellation token
pub const CANCELLED_CAUSE: &str = "cancelled";

/// Inputs of one `provision` call
pub struct ProvisionContext<'a> {
    pub deployment_id: DeploymentId,

    /// Validated working directory holding the cloned repository
    pub working_dir: &'a Path,

    pub sink: &'a EventSink,

    pub cancel: &'a CancellationToken,
}

/// Remote provisioning for one cloud target
#[async_trait]
pub trait ProviderDriver: Send + Sync {
    /// Registry key, e.g. "aws"
    fn provider_id(&self) -> &'static str;

    async fn provision(&self, ctx: &ProvisionContext<'_>) -> Result<(), DriverError>;
}

/// Where an uploaded artifact lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub bucket: String,
    pub key: String,
    pub digest: String,
}

impl ArtifactLocation {
    pub fn uri(&self, scheme: &str) -> String {
        format!("{}://{}/{}", scheme, self.bucket, self.key)
    }
}

/// Run one provisioning step, racing it against cancellation
pub(crate) async fn run_step<T, F>(
    ctx: &ProvisionContext<'_>,
    stage: DriverStage,
    step: F,
) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, String>>,
{
    let result = tokio::select! {
        result = step => result,
        _ = ctx.cancel.cancelled() => Err(CANCELLED_CAUSE.to_string()),
    };
    result.map_err(|cause| DriverError::new(stage, cause))
}

/// Log a failed step and hand the error back
pub(crate) async fn report(ctx: &ProvisionContext<'_>, err: DriverError) -> DriverError {
    ctx.sink.error(format!("Error in {}: {}", err.stage, err.cause)).await;
    err
}

/// Package the working directory
pub(crate) async fn package(ctx: &ProvisionContext<'_>) -> Result<Archive, DriverError> {
    let packaged = run_step(ctx, DriverStage::Packaging, async {
        archive::package_directory(ctx.working_dir)
            .await
            .map_err(|e| e.to_string())
    })
    .await;

    match packaged {
        Ok(archive) => {
            ctx.sink
                .info(format!(
                    "Created deployment package with {} files ({} bytes)",
                    archive.entries.len(),
                    archive.len()
                ))
                .await;
            Ok(archive)
        }
        Err(e) => Err(report(ctx, e).await),
    }
}

/// Put the archive at `{deployment_id}/app.zip` in `bucket`
pub(crate) async fn upload(
    ctx: &ProvisionContext<'_>,
    store: &dyn ObjectStore,
    bucket: &str,
    archive: &Archive,
) -> Result<ArtifactLocation, DriverError> {
    let key = ctx.deployment_id.artifact_key();
    let location = ObjectPath::from(key.as_str());
    let payload = PutPayload::from(archive.bytes.clone());

    let uploaded = run_step(ctx, DriverStage::Upload, async {
        store
            .put(&location, payload)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
    .await;

    match uploaded {
        Ok(()) => {
            ctx.sink
                .info(format!("Uploaded package to bucket {} as {}", bucket, key))
                .await;
            Ok(ArtifactLocation {
                bucket: bucket.to_string(),
                key,
                digest: archive.digest.clone(),
            })
        }
        Err(e) => Err(report(ctx, e).await),
    }
}

/// Load the compose manifest and normalise its services
pub(crate) async fn load_services(
    ctx: &ProvisionContext<'_>,
) -> Result<Vec<ServiceSpec>, DriverError> {
    let manifest = ctx.working_dir.join(MANIFEST_FILE);
    let loaded = run_step(ctx, DriverStage::TemplateConversion, async {
        ComposeFile::load(&manifest)
            .await
            .and_then(|compose| compose.service_specs())
            .map_err(|e| e.cause)
    })
    .await;

    match loaded {
        Ok(services) => Ok(services),
        Err(e) => Err(report(ctx, e).await),
    }
}

/// Create or update the stack, tolerating "no changes"
pub(crate) async fn submit_stack(
    ctx: &ProvisionContext<'_>,
    client: &dyn StackClient,
    request: &StackRequest,
) -> Result<StackOutcome, DriverError> {
    let submitted = run_step(ctx, DriverStage::StackOperation, async {
        stack::upsert_stack(client, request)
            .await
            .map_err(|e| e.to_string())
    })
    .await;

    match submitted {
        Ok(outcome) => {
            let stack = outcome.summary();
            let message = match &outcome {
                StackOutcome::Created(_) => {
                    format!("Stack {} creation initiated ({})", stack.name, stack.id)
                }
                StackOutcome::Updated(_) => {
                    format!("Stack {} update initiated ({})", stack.name, stack.id)
                }
                StackOutcome::Unchanged(_) => {
                    format!("No updates to be performed on stack {}", stack.name)
                }
            };
            ctx.sink.info(message).await;
            Ok(outcome)
        }
        Err(e) => Err(report(ctx, e).await),
    }
}
