//! Artifact object stores for the provider drivers

use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use secrecy::{ExposeSecret, SecretString};

use crate::errors::DeployError;
use crate::storage::settings::{AwsSettings, OracleSettings};

/// S3 bucket configured for the AWS driver
pub fn aws_store(settings: &AwsSettings) -> Result<Arc<dyn ObjectStore>, DeployError> {
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(&settings.bucket)
        .with_region(&settings.region);

    if let Some(endpoint) = &settings.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    builder = with_credentials(
        builder,
        settings.access_key_id.as_deref(),
        settings.secret_access_key.as_ref(),
    );

    let store = builder
        .build()
        .map_err(|e| DeployError::ConfigError(format!("aws object store: {}", e)))?;
    Ok(Arc::new(store))
}

/// Oracle Object Storage bucket through its S3 compatibility endpoint
pub fn oracle_store(settings: &OracleSettings) -> Result<Arc<dyn ObjectStore>, DeployError> {
    let builder = AmazonS3Builder::new()
        .with_bucket_name(&settings.bucket)
        .with_region(&settings.region)
        .with_endpoint(oracle_endpoint(&settings.namespace, &settings.region))
        .with_virtual_hosted_style_request(false);
    let builder = with_credentials(
        builder,
        settings.access_key_id.as_deref(),
        settings.secret_access_key.as_ref(),
    );

    let store = builder
        .build()
        .map_err(|e| DeployError::ConfigError(format!("oracle object store: {}", e)))?;
    Ok(Arc::new(store))
}

pub fn oracle_endpoint(namespace: &str, region: &str) -> String {
    format!(
        "https://{}.compat.objectstorage.{}.oraclecloud.com",
        namespace, region
    )
}

fn with_credentials(
    builder: AmazonS3Builder,
    access_key_id: Option<&str>,
    secret: Option<&SecretString>,
) -> AmazonS3Builder {
    match (access_key_id, secret) {
        (Some(key), Some(secret)) => builder
            .with_access_key_id(key)
            .with_secret_access_key(secret.expose_secret()),
        _ => builder,
    }
}
