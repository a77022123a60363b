//! Command-line interface

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::auth::{self, GmailAuthenticator};
use crate::classifier::HttpClassifier;
use crate::config::Config;
use crate::controller::MonitorController;
use crate::error::{LabelerError, Result};
use crate::server;

#[derive(Parser, Debug)]
#[command(name = "gmail-labeler")]
#[command(version)]
#[command(about = "Watches a Gmail inbox and labels new mail by predicted category", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also append logs to this file (e.g. gmail_logs.log)
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control server and the inbox monitor
    Serve {
        /// Do not start monitoring at boot; wait for /start-monitoring
        #[arg(long)]
        no_autostart: bool,
    },

    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the control surface until Ctrl-C, monitoring from boot when `autostart` is set
pub async fn run_serve(config: Config, autostart: bool) -> Result<()> {
    let classifier = Arc::new(HttpClassifier::new(&config.classifier)?);
    info!("Classifier endpoint: {}", classifier.url());

    let authenticator = Arc::new(GmailAuthenticator::new(config.gmail.clone()));
    let controller = Arc::new(MonitorController::new(
        authenticator,
        classifier,
        config.monitor.clone(),
    ));

    if autostart {
        // The server stays up without monitoring so /start-monitoring can be retried
        match controller.start().await {
            Ok(_) => info!("Monitoring started at boot"),
            Err(e) => error!("Failed to start monitoring at boot: {}", e),
        }
    }

    server::serve(
        Arc::clone(&controller),
        &config.server.host,
        config.server.port,
        shutdown_signal(),
    )
    .await?;

    info!("Shutting down, waiting for in-flight messages");
    controller.shutdown().await;
    Ok(())
}

/// Run the OAuth2 consent flow and cache the token for the server
///
/// Returns the address of the authorized mailbox.
pub async fn run_auth(config: &Config, force: bool) -> Result<String> {
    let token_path = &config.gmail.token_path;

    if let Some(parent) = token_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    if force && token_path.exists() {
        tokio::fs::remove_file(token_path).await?;
        info!("Removed existing token cache");
    }

    let hub = auth::initialize_gmail_hub(&config.gmail.credentials_path, token_path).await?;
    auth::secure_token_file(token_path).await?;

    // Scope must match the cached token, otherwise a second consent flow starts
    let (_, profile) = hub
        .users()
        .get_profile("me")
        .add_scope(auth::REQUIRED_SCOPES[0])
        .doit()
        .await?;

    Ok(profile.email_address.unwrap_or_default())
}

/// Write an example configuration file
pub async fn run_init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(LabelerError::ConfigError(format!(
            "Configuration file already exists at {:?}. Use --force to overwrite.",
            output
        )));
    }

    Config::create_example(output).await
}

/// Open `path` for appending log lines, creating it and its directory if needed
pub fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LabelerError::ConfigError(format!("Cannot open log file {:?}: {}", path, e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
