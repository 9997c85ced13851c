//! multideploy - Entry Point
//!
//! Deploys a repository to several cloud providers concurrently and prints the final
//! deployment report as JSON.
//!
//! ```text
//! multideploy --repo=https://example.com/app.git --providers=aws,oracle [--settings=path]
//! ```

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;

use multideploy::app::options::AppOptions;
use multideploy::app::run::run;
use multideploy::filesys::file::File;
use multideploy::logs::{init_logging, LogOptions};
use multideploy::models::deployment::{DeploymentRequest, DeploymentStatus};
use multideploy::storage::layout::StorageLayout;
use multideploy::storage::settings::Settings;
use multideploy::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return ExitCode::SUCCESS;
    }

    let (Some(repo_url), Some(providers)) = (cli_args.get("repo"), cli_args.get("providers")) else {
        eprintln!("Usage: multideploy --repo=<url> --providers=aws,oracle [--settings=<path>]");
        return ExitCode::from(2);
    };

    // Retrieve the settings file
    let layout = StorageLayout::default();
    let settings = match load_settings(&layout, cli_args.get("settings")).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let request = DeploymentRequest {
        repo_url: repo_url.clone(),
        providers: providers.split(',').map(str::to_string).collect(),
    };
    let options = AppOptions::from_settings(&settings, layout);

    info!("Deploying {} to {}", request.repo_url, providers);
    let report = match run(options, request, await_shutdown_signal())
        .await
        .context("Deployment run failed")
    {
        Ok(report) => report,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to render deployment report: {e}"),
    }

    if report.deployment.status == DeploymentStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Settings from `--settings`, else the layout's settings file, else defaults
async fn load_settings(layout: &StorageLayout, path: Option<&String>) -> anyhow::Result<Settings> {
    let file = match path {
        Some(path) => File::new(PathBuf::from(path)),
        None => {
            let file = layout.settings_file();
            if !file.exists().await {
                return Ok(Settings::default());
            }
            file
        }
    };
    file.read_json::<Settings>()
        .await
        .with_context(|| format!("Unable to read settings file {}", file.path().display()))
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (Ok(mut sigterm), Ok(mut sigint)) =
            (signal(SignalKind::terminate()), signal(SignalKind::interrupt()))
        else {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl+C received, shutting down...");
            return;
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
