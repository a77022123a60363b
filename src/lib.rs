//! Gmail Labeler
//!
//! Watches a Gmail mailbox through the history API and labels every newly
//! arrived message with the category predicted by an external classifier.
//!
//! # Overview
//!
//! - **Authentication**: OAuth2 with a cached token
//! - **Change detection**: incremental polling from a stored history cursor
//! - **Dispatch**: classification and labeling on a bounded worker pool
//! - **Label Management**: find-or-create labels by exact name
//! - **Control surface**: HTTP endpoints to start, stop and inspect monitoring
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_labeler::{auth::GmailAuthenticator, classifier::HttpClassifier, config::Config};
//! use gmail_labeler::controller::MonitorController;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let controller = MonitorController::new(
//!         Arc::new(GmailAuthenticator::new(config.gmail.clone())),
//!         Arc::new(HttpClassifier::new(&config.classifier)?),
//!         config.monitor.clone(),
//!     );
//!
//!     controller.start().await?;
//!     // ...
//!     controller.shutdown().await;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Gmail gateway with timeouts and retry logic
//! - [`classifier`] - HTTP client for the category prediction endpoint
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`controller`] - Start/stop/status state machine
//! - [`dispatch`] - Classification and labeling worker pool
//! - [`error`] - Error types and result aliases
//! - [`label_manager`] - Label lookup and creation
//! - [`models`] - Core data structures
//! - [`monitor`] - History polling loop
//! - [`server`] - HTTP control surface
//! - [`state`] - In-memory monitor state and statistics

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod label_manager;
pub mod models;
pub mod monitor;
pub mod server;
pub mod state;

// Re-export commonly used types for convenience
pub use error::{LabelerError, Result};

// Core data models
pub use models::{ChangeBatch, ChangeKind, ChangeRecord, Cursor, ItemOutcome, ItemSummary, LabelInfo};

// Config types
pub use config::{ClassifierConfig, Config, GmailConfig, MonitorConfig, ServerConfig};

// Traits at the external seams
pub use auth::{Authenticator, GmailAuthenticator};
pub use classifier::{Classifier, HttpClassifier};
pub use client::{MailGateway, ProductionGmailClient};

// Monitor types
pub use controller::{MonitorController, MonitorStatus, StartOutcome};
pub use dispatch::{Dispatcher, ItemSink, WorkerPool};
pub use label_manager::LabelManager;
pub use monitor::{ChangeDetectionLoop, TickOutcome};
pub use state::{MonitorPhase, MonitorState, MonitorStats};

// CLI types (for binary usage)
pub use cli::{Cli, Commands};
