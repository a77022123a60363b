use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LabelerError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_path: default_token_path(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl GmailConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_url")]
    pub url: String,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_classifier_retries")]
    pub max_retries: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: default_classifier_url(),
            timeout_secs: default_classifier_timeout_secs(),
            max_retries: default_classifier_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How many dispatched message ids are remembered to suppress re-delivery
    #[serde(default = "default_recent_ids")]
    pub recent_ids: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            recent_ids: default_recent_ids(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_path() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_classifier_url() -> String {
    "http://localhost:8000/predict".to_string()
}

fn default_classifier_timeout_secs() -> u64 {
    30
}

fn default_classifier_retries() -> u32 {
    2
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_error_backoff_secs() -> u64 {
    30
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_recent_ids() -> usize {
    1000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                LabelerError::ConfigError(format!("Failed to read config file: {}", e))
            })?;

            let config: Self = toml::from_str(&content).map_err(|e| {
                LabelerError::ConfigError(format!("Failed to parse config file: {}", e))
            })?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    ///
    /// # Environment Variables
    /// - `EMAIL_CLASSIFIER_URL`: classifier endpoint
    /// - `POLL_INTERVAL_SECS`: seconds between history polls
    /// - `ERROR_BACKOFF_SECS`: seconds to wait after a failed poll
    /// - `GOOGLE_CLIENT_CONFIG_PATH`: OAuth2 client secret file
    /// - `GOOGLE_TOKEN_PATH`: cached token file
    /// - `PORT`: control surface port
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = env::var("EMAIL_CLASSIFIER_URL") {
            self.classifier.url = url;
        }
        if let Some(secs) = env_number::<u64>("POLL_INTERVAL_SECS")? {
            self.monitor.poll_interval_secs = secs;
        }
        if let Some(secs) = env_number::<u64>("ERROR_BACKOFF_SECS")? {
            self.monitor.error_backoff_secs = secs;
        }
        if let Ok(path) = env::var("GOOGLE_CLIENT_CONFIG_PATH") {
            self.gmail.credentials_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("GOOGLE_TOKEN_PATH") {
            self.gmail.token_path = PathBuf::from(path);
        }
        if let Some(port) = env_number::<u16>("PORT")? {
            self.server.port = port;
        }
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LabelerError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            LabelerError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        tokio::fs::write(path, content).await.map_err(|e| {
            LabelerError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(self.classifier.url.starts_with("http://")
            || self.classifier.url.starts_with("https://"))
        {
            return Err(LabelerError::ConfigError(format!(
                "classifier.url must be an http(s) URL, got '{}'",
                self.classifier.url
            )));
        }
        if self.classifier.timeout_secs == 0 {
            return Err(LabelerError::ConfigError(
                "classifier.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.gmail.request_timeout_secs == 0 {
            return Err(LabelerError::ConfigError(
                "gmail.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.monitor.poll_interval_secs == 0 {
            return Err(LabelerError::ConfigError(
                "monitor.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.monitor.error_backoff_secs < self.monitor.poll_interval_secs {
            tracing::warn!(
                "monitor.error_backoff_secs ({}) is shorter than monitor.poll_interval_secs ({}); \
                 failed polls will be retried sooner than regular ones",
                self.monitor.error_backoff_secs,
                self.monitor.poll_interval_secs
            );
        }
        if self.monitor.workers == 0 {
            return Err(LabelerError::ConfigError(
                "monitor.workers must be at least 1".to_string(),
            ));
        }
        if self.monitor.queue_capacity == 0 {
            return Err(LabelerError::ConfigError(
                "monitor.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.monitor.recent_ids == 0 {
            return Err(LabelerError::ConfigError(
                "monitor.recent_ids must be at least 1".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            LabelerError::ConfigError(format!("{} must be a number, got '{}'", name, raw))
        }),
        Err(_) => Ok(None),
    }
}
