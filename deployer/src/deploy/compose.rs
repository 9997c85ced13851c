//! Compose-style service manifest

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::{DriverError, DriverStage};

/// Parsed compose file. Only the keys the drivers translate are modelled.
#[derive(Debug, Clone, Deserialize)]
pub struct ComposeFile {
    #[serde(default)]
    pub services: BTreeMap<String, ComposeService>,
}

/// One compose service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComposeService {
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub ports: Vec<PortEntry>,

    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub command: Option<CommandEntry>,

    #[serde(default)]
    pub depends_on: DependsOn,
}

/// A `ports` item, short string syntax or bare number
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortEntry {
    Number(u16),
    Text(String),
}

/// `environment` as a map or a `KEY=VALUE` list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    Map(BTreeMap<String, Option<serde_yaml::Value>>),
    List(Vec<String>),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::List(Vec::new())
    }
}

/// `command` as a shell string or exec list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandEntry {
    Shell(String),
    Exec(Vec<String>),
}

/// `depends_on` as a list or a map of conditions
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, serde_yaml::Value>),
}

impl Default for DependsOn {
    fn default() -> Self {
        DependsOn::List(Vec::new())
    }
}

/// Transport protocol of a published port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Normalised port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: Option<u16>,
    pub container: u16,
    pub protocol: Protocol,
}

/// Normalised service ready for translation into a provider template
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub environment: BTreeMap<String, String>,
    pub command: Option<Vec<String>>,
    pub depends_on: Vec<String>,
}

impl ComposeFile {
    /// Read and parse the manifest
    pub async fn load(path: &Path) -> Result<Self, DriverError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            DriverError::new(
                DriverStage::TemplateConversion,
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, DriverError> {
        serde_yaml::from_str(raw).map_err(|e| {
            DriverError::new(
                DriverStage::TemplateConversion,
                format!("invalid compose file: {}", e),
            )
        })
    }

    /// Normalise every service, in name order
    pub fn service_specs(&self) -> Result<Vec<ServiceSpec>, DriverError> {
        if self.services.is_empty() {
            return Err(conversion_error("compose file defines no services"));
        }

        self.services
            .iter()
            .map(|(name, service)| service.to_spec(name))
            .collect()
    }
}

impl ComposeService {
    fn to_spec(&self, name: &str) -> Result<ServiceSpec, DriverError> {
        let image = self
            .image
            .clone()
            .filter(|image| !image.trim().is_empty())
            .ok_or_else(|| {
                conversion_error(format!(
                    "service '{}' has no image; build-only services cannot be deployed",
                    name
                ))
            })?;

        let ports = self
            .ports
            .iter()
            .map(|port| parse_port(port).map_err(|e| conversion_error(format!("service '{}': {}", name, e))))
            .collect::<Result<Vec<_>, _>>()?;

        let environment = match &self.environment {
            Environment::Map(map) => map
                .iter()
                .map(|(key, value)| (key.clone(), value.as_ref().map(yaml_scalar).unwrap_or_default()))
                .collect(),
            Environment::List(list) => list
                .iter()
                .map(|item| match item.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (item.clone(), String::new()),
                })
                .collect(),
        };

        let command = self.command.as_ref().map(|command| match command {
            CommandEntry::Shell(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandEntry::Exec(args) => args.clone(),
        });

        let depends_on = match &self.depends_on {
            DependsOn::List(list) => list.clone(),
            DependsOn::Map(map) => map.keys().cloned().collect(),
        };

        Ok(ServiceSpec {
            name: name.to_string(),
            image,
            ports,
            environment,
            command,
            depends_on,
        })
    }
}

fn conversion_error(cause: impl Into<String>) -> DriverError {
    DriverError::new(DriverStage::TemplateConversion, cause)
}

fn yaml_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Parse `[ip:][host:]container[/protocol]` or a bare container port
fn parse_port(entry: &PortEntry) -> Result<PortMapping, String> {
    let text = match entry {
        PortEntry::Number(port) => {
            return Ok(PortMapping {
                host: None,
                container: *port,
                protocol: Protocol::Tcp,
            })
        }
        PortEntry::Text(text) => text.trim(),
    };

    let (spec, protocol) = match text.rsplit_once('/') {
        Some((spec, "tcp")) => (spec, Protocol::Tcp),
        Some((spec, "udp")) => (spec, Protocol::Udp),
        Some((_, other)) => return Err(format!("unsupported port protocol '{}'", other)),
        None => (text, Protocol::Tcp),
    };

    let parts: Vec<&str> = spec.split(':').collect();
    let (host, container) = match parts.as_slice() {
        [container] => (None, *container),
        [host, container] => (Some(*host), *container),
        [_ip, host, container] => (Some(*host), *container),
        _ => return Err(format!("invalid port '{}'", text)),
    };

    let container = container
        .parse::<u16>()
        .map_err(|_| format!("invalid container port in '{}'", text))?;
    let host = match host {
        Some(host) if !host.is_empty() => Some(
            host.parse::<u16>()
                .map_err(|_| format!("invalid host port in '{}'", text))?,
        ),
        _ => None,
    };

    Ok(PortMapping {
        host,
        container,
        protocol,
    })
}
