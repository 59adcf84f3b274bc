//! Shipyard - Entry Point
//!
//! Runs the origin control plane or the edge proxy, or prints diagnostics.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use shipyard::app::options::{AppOptions, EdgeOptions};
use shipyard::app::run::{run, run_edge};
use shipyard::deploy::command::{CommandRunner, SystemRunner};
use shipyard::filesys::file::File;
use shipyard::logs::{init_logging, LogOptions};
use shipyard::providers::{ProviderCredentials, ProviderRegistry};
use shipyard::storage::layout::StorageLayout;
use shipyard::storage::settings::Settings;
use shipyard::utils::{print_diagnostic, version_info};

#[derive(Debug, Parser)]
#[command(name = "shipyard", version, about = "Deployment orchestration and subdomain routing")]
struct Cli {
    /// Path to settings.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the origin control plane (default)
    Serve,
    /// Run the edge proxy in front of the origin
    Edge,
    /// Print the provider tooling table
    Diagnostic,
    /// Print version information as JSON
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve);

    // Print version and exit
    let version = version_info();
    if let Command::Version = command {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => println!("{}: {}", version.version, e),
        }
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings file
    let settings_file = match cli.config {
        Some(path) => File::new(path),
        None => StorageLayout::default().settings_file(),
    };
    let settings = match Settings::load(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {}", settings_file.path().display(), e);
            return ExitCode::FAILURE;
        }
    };

    // Run diagnostics
    if let Command::Diagnostic = command {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let registry = match ProviderRegistry::from_settings(
            &settings.providers,
            ProviderCredentials::from_env(),
            runner,
            settings.engine.timeouts(),
        ) {
            Ok(registry) => registry,
            Err(e) => {
                eprintln!("Failed to set up providers: {}", e);
                return ExitCode::FAILURE;
            }
        };
        print_diagnostic(&registry.statuses().await);
        return ExitCode::SUCCESS;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let result = match command {
        Command::Edge => {
            let options = EdgeOptions::from_settings(&settings);
            info!("Running Shipyard edge {} with options: {:?}", version.version, options);
            run_edge(options, await_shutdown_signal()).await
        }
        _ => {
            let options = AppOptions::from_settings(&settings);
            info!("Running Shipyard {} with options: {:?}", version.version, options);
            run(options, await_shutdown_signal()).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Shipyard stopped with an error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
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
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
