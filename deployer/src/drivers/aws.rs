//! AWS driver: S3 artifact, CloudFormation stack running the services on ECS Fargate

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use object_store::ObjectStore;
use serde_json::{json, Value};

use super::stack::{HttpStackClient, StackClient, StackRequest, StackTemplate};
use super::{load_services, package, report, submit_stack, upload, ArtifactLocation};
use super::{ProviderDriver, ProvisionContext};
use crate::deploy::compose::ServiceSpec;
use crate::errors::{DeployError, DriverError, DriverStage};
use crate::storage::settings::AwsSettings;

pub const PROVIDER_ID: &str = "aws";

const EXECUTION_ROLE_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy";

pub struct AwsDriver {
    settings: AwsSettings,
    objects: Arc<dyn ObjectStore>,
    stacks: Arc<dyn StackClient>,
}

impl AwsDriver {
    pub fn new(
        settings: AwsSettings,
        objects: Arc<dyn ObjectStore>,
        stacks: Arc<dyn StackClient>,
    ) -> Self {
        Self {
            settings,
            objects,
            stacks,
        }
    }

    /// Driver talking to the configured bucket and stack API
    pub fn from_settings(settings: &AwsSettings) -> Result<Self, DeployError> {
        let objects = super::storage::aws_store(settings)?;
        let stacks = Arc::new(HttpStackClient::new(&settings.stack_api)?);
        Ok(Self::new(settings.clone(), objects, stacks))
    }
}

#[async_trait]
impl ProviderDriver for AwsDriver {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn provision(&self, ctx: &ProvisionContext<'_>) -> Result<(), DriverError> {
        let archive = package(ctx).await?;
        let artifact = upload(ctx, self.objects.as_ref(), &self.settings.bucket, &archive).await?;
        let services = load_services(ctx).await?;

        let stack_name = ctx.deployment_id.stack_name();
        let template = match cloudformation_template(&stack_name, &services, &self.settings, &artifact) {
            Ok(template) => template,
            Err(e) => return Err(report(ctx, e).await),
        };
        ctx.sink
            .info(format!(
                "Converted docker-compose.yml to CloudFormation template with {} container(s)",
                services.len()
            ))
            .await;

        let request = StackRequest {
            name: stack_name,
            template: StackTemplate::Document(template.to_string()),
            capabilities: vec!["CAPABILITY_IAM".to_string()],
            parameters: BTreeMap::new(),
        };
        submit_stack(ctx, self.stacks.as_ref(), &request).await?;
        Ok(())
    }
}

/// Translate normalised compose services into a CloudFormation template
pub fn cloudformation_template(
    stack_name: &str,
    services: &[ServiceSpec],
    settings: &AwsSettings,
    artifact: &ArtifactLocation,
) -> Result<Value, DriverError> {
    if settings.subnets.is_empty() {
        return Err(DriverError::new(
            DriverStage::TemplateConversion,
            "no subnets configured for the ECS service",
        ));
    }

    // Containers of one Fargate task share a network namespace
    let mut published = HashSet::new();
    for service in services {
        for port in &service.ports {
            if !published.insert((port.container, port.protocol)) {
                return Err(DriverError::new(
                    DriverStage::TemplateConversion,
                    format!(
                        "port {}/{} is published by more than one service",
                        port.container,
                        port.protocol.as_str()
                    ),
                ));
            }
        }
    }

    let containers: Vec<Value> = services.iter().map(container_definition).collect();
    let public_ip = if settings.assign_public_ip { "ENABLED" } else { "DISABLED" };

    Ok(json!({
        "AWSTemplateFormatVersion": "2010-09-09",
        "Description": format!("Services for {}", stack_name),
        "Metadata": {
            "Artifact": {
                "Location": artifact.uri("s3"),
                "Sha256": artifact.digest
            }
        },
        "Resources": {
            "Cluster": {
                "Type": "AWS::ECS::Cluster",
                "Properties": { "ClusterName": stack_name }
            },
            "LogGroup": {
                "Type": "AWS::Logs::LogGroup",
                "Properties": {
                    "LogGroupName": format!("/ecs/{}", stack_name),
                    "RetentionInDays": 14
                }
            },
            "ExecutionRole": {
                "Type": "AWS::IAM::Role",
                "Properties": {
                    "AssumeRolePolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Effect": "Allow",
                            "Principal": { "Service": "ecs-tasks.amazonaws.com" },
                            "Action": "sts:AssumeRole"
                        }]
                    },
                    "ManagedPolicyArns": [EXECUTION_ROLE_POLICY]
                }
            },
            "TaskDefinition": {
                "Type": "AWS::ECS::TaskDefinition",
                "Properties": {
                    "Family": stack_name,
                    "RequiresCompatibilities": ["FARGATE"],
                    "NetworkMode": "awsvpc",
                    "Cpu": settings.cpu.to_string(),
                    "Memory": settings.memory_mib.to_string(),
                    "ExecutionRoleArn": { "Fn::GetAtt": ["ExecutionRole", "Arn"] },
                    "ContainerDefinitions": containers
                }
            },
            "Service": {
                "Type": "AWS::ECS::Service",
                "Properties": {
                    "Cluster": { "Ref": "Cluster" },
                    "LaunchType": "FARGATE",
                    "DesiredCount": 1,
                    "TaskDefinition": { "Ref": "TaskDefinition" },
                    "NetworkConfiguration": {
                        "AwsvpcConfiguration": {
                            "Subnets": settings.subnets,
                            "AssignPublicIp": public_ip
                        }
                    }
                }
            }
        },
        "Outputs": {
            "ClusterName": { "Value": { "Ref": "Cluster" } },
            "ServiceName": { "Value": { "Fn::GetAtt": ["Service", "Name"] } }
        }
    }))
}

fn container_definition(service: &ServiceSpec) -> Value {
    let mut container = json!({
        "Name": service.name,
        "Image": service.image,
        "Essential": true,
        "LogConfiguration": {
            "LogDriver": "awslogs",
            "Options": {
                "awslogs-group": { "Ref": "LogGroup" },
                "awslogs-region": { "Ref": "AWS::Region" },
                "awslogs-stream-prefix": service.name
            }
        }
    });

    if !service.ports.is_empty() {
        container["PortMappings"] = service
            .ports
            .iter()
            .map(|port| json!({ "ContainerPort": port.container, "Protocol": port.protocol.as_str() }))
            .collect();
    }
    if !service.environment.is_empty() {
        container["Environment"] = service
            .environment
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value }))
            .collect();
    }
    if let Some(command) = &service.command {
        container["Command"] = json!(command);
    }
    if !service.depends_on.is_empty() {
        container["DependsOn"] = service
            .depends_on
            .iter()
            .map(|name| json!({ "ContainerName": name, "Condition": "START" }))
            .collect();
    }
    container
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::compose::ComposeFile;
    use crate::deploy::stager::MANIFEST_FILE;
    use crate::drivers::stack::{MemoryStackClient, StackApiError};
    use crate::drivers::testing::{attempt_sink, COMPOSE};
    use crate::models::deployment::{LogFilter, Severity};
    use crate::storage::settings::StackApiSettings;
    use object_store::memory::InMemory;
    use object_store::path::Path as ObjectPath;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn settings() -> AwsSettings {
        AwsSettings {
            bucket: "artifacts".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            stack_api: StackApiSettings {
                base_url: "https://stacks.internal/aws".to_string(),
                token: None,
                timeout_secs: 5,
            },
            cpu: 512,
            memory_mib: 1024,
            subnets: vec!["subnet-a".to_string(), "subnet-b".to_string()],
            assign_public_ip: false,
        }
    }

    fn artifact() -> ArtifactLocation {
        ArtifactLocation {
            bucket: "artifacts".to_string(),
            key: "d1/app.zip".to_string(),
            digest: "00".repeat(32),
        }
    }

    #[test]
    fn test_template_structure() {
        let services = ComposeFile::parse(COMPOSE).unwrap().service_specs().unwrap();
        let template =
            cloudformation_template("deploy-d1", &services, &settings(), &artifact()).unwrap();

        let resources = &template["Resources"];
        assert_eq!(resources["Cluster"]["Type"], "AWS::ECS::Cluster");
        assert_eq!(resources["ExecutionRole"]["Type"], "AWS::IAM::Role");
        assert_eq!(resources["TaskDefinition"]["Properties"]["Cpu"], "512");
        assert_eq!(
            resources["Service"]["Properties"]["NetworkConfiguration"]["AwsvpcConfiguration"]
                ["AssignPublicIp"],
            "DISABLED"
        );
        assert_eq!(template["Metadata"]["Artifact"]["Location"], "s3://artifacts/d1/app.zip");

        let containers = resources["TaskDefinition"]["Properties"]["ContainerDefinitions"]
            .as_array()
            .unwrap();
        assert_eq!(containers.len(), 2);

        let web = containers.iter().find(|c| c["Name"] == "web").unwrap();
        assert_eq!(web["PortMappings"][0]["ContainerPort"], 80);
        assert!(web["PortMappings"][0].get("HostPort").is_none());
        assert_eq!(web["Environment"][0]["Name"], "MODE");
        assert_eq!(web["DependsOn"][0]["ContainerName"], "api");

        let api = containers.iter().find(|c| c["Name"] == "api").unwrap();
        assert_eq!(api["Command"], json!(["serve", "--port", "9000"]));
        assert!(api.get("PortMappings").is_none());
    }

    #[test]
    fn test_template_rejects_missing_subnets() {
        let services = ComposeFile::parse(COMPOSE).unwrap().service_specs().unwrap();
        let mut settings = settings();
        settings.subnets.clear();

        let err = cloudformation_template("deploy-d1", &services, &settings, &artifact())
            .unwrap_err();
        assert_eq!(err.stage, DriverStage::TemplateConversion);
    }

    #[test]
    fn test_template_rejects_port_clash() {
        let compose = "services:\n  a:\n    image: x\n    ports: [\"80\"]\n  b:\n    image: y\n    ports: [\"8080:80\"]\n";
        let services = ComposeFile::parse(compose).unwrap().service_specs().unwrap();
        assert!(cloudformation_template("deploy-d1", &services, &settings(), &artifact()).is_err());
    }

    #[tokio::test]
    async fn test_provision_creates_then_leaves_stack_unchanged() {
        let (store, deployment, sink) = attempt_sink(PROVIDER_ID).await;
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), COMPOSE).unwrap();

        let objects = Arc::new(InMemory::new());
        let stacks = Arc::new(MemoryStackClient::new());
        let driver = AwsDriver::new(settings(), objects.clone(), stacks.clone());
        let cancel = CancellationToken::new();
        let ctx = ProvisionContext {
            deployment_id: deployment.id,
            working_dir: dir.path(),
            sink: &sink,
            cancel: &cancel,
        };

        driver.provision(&ctx).await.unwrap();
        driver.provision(&ctx).await.unwrap();

        let stored = stacks.stack(&deployment.id.stack_name()).unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.request.capabilities, vec!["CAPABILITY_IAM".to_string()]);

        let key = ObjectPath::from(deployment.id.artifact_key().as_str());
        assert!(objects.head(&key).await.is_ok());

        let logs = store.logs(deployment.id, &LogFilter::default()).await.unwrap();
        assert!(logs.iter().all(|l| l.level == Severity::Info));
        assert!(logs.iter().any(|l| l.message.starts_with("No updates")));
    }

    #[tokio::test]
    async fn test_rejected_stack_is_stack_operation_failure() {
        let (store, deployment, sink) = attempt_sink(PROVIDER_ID).await;
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), COMPOSE).unwrap();

        let stacks = Arc::new(MemoryStackClient::new());
        stacks.reject_with("Template format error");
        let driver = AwsDriver::new(settings(), Arc::new(InMemory::new()), stacks);
        let cancel = CancellationToken::new();
        let ctx = ProvisionContext {
            deployment_id: deployment.id,
            working_dir: dir.path(),
            sink: &sink,
            cancel: &cancel,
        };

        let err = driver.provision(&ctx).await.unwrap_err();
        assert_eq!(err.stage, DriverStage::StackOperation);
        assert!(err.cause.contains(
            &StackApiError::Rejected {
                status: 400,
                message: "Template format error".to_string()
            }
            .to_string()
        ));

        let errors = store
            .logs(
                deployment.id,
                &LogFilter {
                    provider_id: None,
                    level: Some(Severity::Error),
                },
            )
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Template format error"));
    }
}
