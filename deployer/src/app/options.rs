//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::{GitSettings, ProviderSettings, Settings};
use crate::workers::{runner, sweeper};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Worker pool options
    pub worker_pool: runner::Options,

    /// Enable the periodic aggregation sweep
    pub enable_sweeper: bool,

    /// Sweeper worker options
    pub sweeper: sweeper::Options,

    /// Source checkout settings
    pub git: GitSettings,

    /// Provider driver settings
    pub providers: ProviderSettings,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            worker_pool: runner::Options::default(),
            enable_sweeper: true,
            sweeper: sweeper::Options::default(),
            git: GitSettings::default(),
            providers: ProviderSettings::default(),
        }
    }
}

impl AppOptions {
    /// Options from a settings file rooted at `layout`
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
                ..Default::default()
            },
            storage: StorageOptions {
                layout,
                workspace_dir: settings.workspace_dir.clone(),
            },
            worker_pool: runner::Options {
                concurrency: settings.worker_concurrency,
            },
            enable_sweeper: true,
            sweeper: sweeper::Options {
                interval: Duration::from_secs(settings.aggregator_interval_secs),
            },
            git: settings.git.clone(),
            providers: settings.providers.clone(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Interval between checks for a terminal deployment
    pub status_poll_interval: Duration,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            status_poll_interval: Duration::from_millis(250),
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Overrides the layout's workspace directory
    pub workspace_dir: Option<PathBuf>,
}

impl StorageOptions {
    /// Root for per-attempt working directories
    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace_dir
            .clone()
            .unwrap_or_else(|| self.layout.workspace_dir())
    }
}
