//! Provider identifier to driver lookup

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use super::aws::AwsDriver;
use super::oracle::OracleDriver;
use super::ProviderDriver;
use crate::errors::DeployError;
use crate::storage::settings::ProviderSettings;

/// Provider kinds the orchestrator knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Aws,
    Oracle,
    Azure,
    Gcp,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Oracle => "oracle",
            ProviderKind::Azure => "azure",
            ProviderKind::Gcp => "gcp",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aws" => Ok(ProviderKind::Aws),
            "oracle" => Ok(ProviderKind::Oracle),
            "azure" => Ok(ProviderKind::Azure),
            "gcp" => Ok(ProviderKind::Gcp),
            other => Err(DeployError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Static set of provider drivers
#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<ProviderKind, Arc<dyn ProviderDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its own provider id. Fails for an unknown id.
    pub fn register(&mut self, driver: Arc<dyn ProviderDriver>) -> Result<(), DeployError> {
        let kind = ProviderKind::from_str(driver.provider_id())?;
        self.drivers.insert(kind, driver);
        Ok(())
    }

    pub fn with_driver(mut self, driver: Arc<dyn ProviderDriver>) -> Result<Self, DeployError> {
        self.register(driver)?;
        Ok(self)
    }

    /// Drivers for every provider that has settings
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, DeployError> {
        let mut registry = Self::new();
        if let Some(aws) = &settings.aws {
            registry.register(Arc::new(AwsDriver::from_settings(aws)?))?;
        }
        if let Some(oracle) = &settings.oracle {
            registry.register(Arc::new(OracleDriver::from_settings(oracle)?))?;
        }
        info!("Registered provider drivers: {:?}", registry.providers());
        Ok(registry)
    }

    /// Driver for `provider_id`. Never falls back to another provider.
    pub fn resolve(&self, provider_id: &str) -> Result<Arc<dyn ProviderDriver>, DeployError> {
        let kind = ProviderKind::from_str(provider_id)?;
        self.drivers.get(&kind).cloned().ok_or_else(|| {
            DeployError::UnsupportedProvider(format!("{} (no driver configured)", provider_id))
        })
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.resolve(provider_id).is_ok()
    }

    /// Registered provider ids, sorted
    pub fn providers(&self) -> Vec<&'static str> {
        let mut providers: Vec<&'static str> = self.drivers.keys().map(|k| k.as_str()).collect();
        providers.sort_unstable();
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ProvisionContext;
    use crate::errors::{DriverError, ErrorKind};
    use async_trait::async_trait;

    struct NoopDriver(&'static str);

    #[async_trait]
    impl ProviderDriver for NoopDriver {
        fn provider_id(&self) -> &'static str {
            self.0
        }

        async fn provision(&self, _ctx: &ProvisionContext<'_>) -> Result<(), DriverError> {
            Ok(())
        }
    }

    #[test]
    fn test_resolve_registered() {
        let registry = DriverRegistry::new()
            .with_driver(Arc::new(NoopDriver("aws")))
            .unwrap();
        assert_eq!(registry.resolve("aws").unwrap().provider_id(), "aws");
        assert_eq!(registry.providers(), vec!["aws"]);
    }

    #[test]
    fn test_unknown_provider_fails_fast() {
        let registry = DriverRegistry::new()
            .with_driver(Arc::new(NoopDriver("aws")))
            .unwrap();

        let err = registry.resolve("azure-classic").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedProvider);
        assert_eq!(err.to_string(), "Unsupported provider: azure-classic");

        // Known kind without a driver is not silently replaced
        let err = registry.resolve("gcp").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedProvider);

        assert!(registry.resolve("AWS").is_err());
    }

    #[test]
    fn test_register_rejects_unknown_id() {
        let result = DriverRegistry::new().with_driver(Arc::new(NoopDriver("heroku")));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_settings_register_nothing() {
        let registry = DriverRegistry::from_settings(&ProviderSettings::default()).unwrap();
        assert!(registry.providers().is_empty());
        assert!(!registry.contains("aws"));
    }
}
