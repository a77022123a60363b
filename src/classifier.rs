//! Client for the external category prediction endpoint

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::error::{LabelerError, Result};

/// Maps message text to a category name
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Predict the category for `text`. Empty text is sent as is.
    async fn classify(&self, text: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    prediction: String,
}

/// Classifier reached over HTTP: `POST {"text"}` answered by `{"prediction"}`
///
/// Connection failures and timeouts are retried; an answer with a non-success
/// status is final.
pub struct HttpClassifier {
    http: reqwest::Client,
    url: String,
    max_retries: u32,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                LabelerError::ConfigError(format!("Failed to build classifier HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            url: config.url.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request_once(&self, text: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.url)
            .json(&PredictRequest { text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LabelerError::ClassificationError {
                status: Some(status.as_u16()),
                message: if body.is_empty() {
                    status.canonical_reason().unwrap_or("Unknown").to_string()
                } else {
                    truncate(&body, 200)
                },
            });
        }

        let parsed: PredictResponse = response.json().await?;
        Ok(parsed.prediction)
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<String> {
        let mut delay = Duration::from_millis(500);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.request_once(text).await {
                Ok(prediction) => {
                    debug!("Classifier predicted '{}'", prediction);
                    return Ok(prediction);
                }
                Err(LabelerError::NetworkError(reason)) if attempts <= self.max_retries => {
                    warn!(
                        "Classifier request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempts,
                        self.max_retries + 1,
                        reason,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
