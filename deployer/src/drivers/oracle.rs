//! Oracle Cloud driver: Object Storage artifact, Resource Manager stack running the
//! services as one container instance

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use object_store::ObjectStore;
use serde_json::{json, Value};

use super::stack::{HttpStackClient, StackClient, StackRequest, StackTemplate};
use super::{load_services, package, report, submit_stack, upload, ArtifactLocation};
use super::{ProviderDriver, ProvisionContext};
use crate::deploy::archive;
use crate::deploy::compose::ServiceSpec;
use crate::errors::{DeployError, DriverError, DriverStage};
use crate::storage::settings::OracleSettings;

pub const PROVIDER_ID: &str = "oracle";

/// Terraform configuration file inside the stack's zip source
pub const CONFIG_FILE: &str = "main.tf.json";

pub struct OracleDriver {
    settings: OracleSettings,
    objects: Arc<dyn ObjectStore>,
    stacks: Arc<dyn StackClient>,
}

impl OracleDriver {
    pub fn new(
        settings: OracleSettings,
        objects: Arc<dyn ObjectStore>,
        stacks: Arc<dyn StackClient>,
    ) -> Self {
        Self {
            settings,
            objects,
            stacks,
        }
    }

    pub fn from_settings(settings: &OracleSettings) -> Result<Self, DeployError> {
        let objects = super::storage::oracle_store(settings)?;
        let stacks = Arc::new(HttpStackClient::new(&settings.stack_api)?);
        Ok(Self::new(settings.clone(), objects, stacks))
    }
}

#[async_trait]
impl ProviderDriver for OracleDriver {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn provision(&self, ctx: &ProvisionContext<'_>) -> Result<(), DriverError> {
        let archive = package(ctx).await?;
        let artifact = upload(ctx, self.objects.as_ref(), &self.settings.bucket, &archive).await?;
        let services = load_services(ctx).await?;

        let stack_name = ctx.deployment_id.stack_name();
        let config = terraform_config(&stack_name, &services, &self.settings, &artifact);
        let source = match config_source(&config) {
            Ok(source) => source,
            Err(e) => return Err(report(ctx, e).await),
        };
        ctx.sink
            .info(format!(
                "Converted docker-compose.yml to Terraform configuration with {} container(s)",
                services.len()
            ))
            .await;

        let mut parameters = BTreeMap::new();
        parameters.insert(
            "compartment_id".to_string(),
            self.settings.compartment_id.clone(),
        );

        let request = StackRequest {
            name: stack_name,
            template: StackTemplate::ZipBase64(source),
            capabilities: Vec::new(),
            parameters,
        };
        submit_stack(ctx, self.stacks.as_ref(), &request).await?;
        Ok(())
    }
}

/// Translate normalised compose services into a Terraform JSON configuration
pub fn terraform_config(
    stack_name: &str,
    services: &[ServiceSpec],
    settings: &OracleSettings,
    artifact: &ArtifactLocation,
) -> Value {
    let containers: Vec<Value> = services.iter().map(container).collect();

    json!({
        "terraform": {
            "required_providers": {
                "oci": { "source": "oracle/oci" }
            }
        },
        "provider": {
            "oci": { "region": settings.region }
        },
        "variable": {
            "compartment_ocid": { "type": "string", "default": settings.compartment_id },
            "availability_domain": { "type": "string", "default": settings.availability_domain },
            "subnet_id": { "type": "string", "default": settings.subnet_id }
        },
        "resource": {
            "oci_container_instances_container_instance": {
                "app": {
                    "compartment_id": "${var.compartment_ocid}",
                    "availability_domain": "${var.availability_domain}",
                    "display_name": stack_name,
                    "container_restart_policy": "ALWAYS",
                    "shape": settings.shape,
                    "shape_config": {
                        "ocpus": settings.ocpus,
                        "memory_in_gbs": settings.memory_gbs
                    },
                    "vnics": [{ "subnet_id": "${var.subnet_id}" }],
                    "freeform_tags": {
                        "artifact": artifact.uri("oci"),
                        "artifact_sha256": artifact.digest
                    },
                    "containers": containers
                }
            }
        }
    })
}

fn container(service: &ServiceSpec) -> Value {
    let mut container = json!({
        "display_name": service.name,
        "image_url": service.image
    });

    if !service.environment.is_empty() {
        container["environment_variables"] = json!(service.environment);
    }
    if let Some((command, arguments)) = service.command.as_ref().and_then(|c| c.split_first()) {
        container["command"] = json!([command]);
        if !arguments.is_empty() {
            container["arguments"] = json!(arguments);
        }
    }
    container
}

/// Zip the configuration and encode it for the stack's zip-upload source
fn config_source(config: &Value) -> Result<String, DriverError> {
    let body = serde_json::to_vec_pretty(config).map_err(|e| {
        DriverError::new(DriverStage::TemplateConversion, e.to_string())
    })?;
    let zipped = archive::package_files(&[(CONFIG_FILE, body.as_slice())]).map_err(|e| {
        DriverError::new(DriverStage::TemplateConversion, e.to_string())
    })?;
    Ok(STANDARD.encode(&zipped.bytes))
}
