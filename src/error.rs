use thiserror::Error;

/// Type alias for Result with LabelerError
pub type Result<T> = std::result::Result<T, LabelerError>;

/// Error types for the mailbox monitor, its Gmail gateway and the classifier client
#[derive(Error, Debug)]
pub enum LabelerError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed or the session is no longer authorized
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The history cursor is too old for the provider to answer from
    #[error("History cursor {cursor} expired")]
    CursorExpired { cursor: String },

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Conflict (409), e.g. a label with the same name already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Label-related errors
    #[error("Label error: {0}")]
    LabelError(String),

    /// Classifier endpoint rejected the request or answered with something unusable
    #[error("Classification failed{}: {message}", http_status_suffix(.status))]
    ClassificationError { status: Option<u16>, message: String },

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl LabelerError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LabelerError::RateLimitExceeded { .. }
                | LabelerError::ServerError { .. }
                | LabelerError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Whether the error means the session can no longer talk to the mailbox
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, LabelerError::AuthError(_))
    }
}

fn http_status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// The Retry-After header can be specified in two formats:
/// 1. Delay-seconds: An integer indicating seconds to wait (e.g., "120")
/// 2. HTTP-date: An HTTP date format (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Returns the number of seconds to wait. If the header is missing or invalid,
/// returns a default of 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

impl From<google_gmail1::Error> for LabelerError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        LabelerError::RateLimitExceeded { retry_after }
                    }
                    401 => LabelerError::AuthError(message),
                    404 => LabelerError::NotFound("Resource not found".to_string()),
                    400 => LabelerError::BadRequest(message),
                    403 => LabelerError::Forbidden(message),
                    409 => LabelerError::Conflict(message),
                    500..=599 => LabelerError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => LabelerError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => {
                // Gmail reports some failures as a JSON error body instead of a bare status
                let code = err
                    .get("error")
                    .and_then(|e| e.get("code"))
                    .and_then(|c| c.as_u64());
                match code {
                    Some(404) => LabelerError::NotFound(err.to_string()),
                    Some(409) => LabelerError::Conflict(err.to_string()),
                    Some(401) => LabelerError::AuthError(err.to_string()),
                    _ => LabelerError::BadRequest(err.to_string()),
                }
            }
            google_gmail1::Error::MissingToken(ref err) => {
                LabelerError::AuthError(format!("No access token: {}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                LabelerError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => LabelerError::NetworkError(err.to_string()),
            _ => LabelerError::ApiError(error.to_string()),
        }
    }
}

impl From<reqwest::Error> for LabelerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            LabelerError::NetworkError(error.to_string())
        } else if error.is_decode() {
            LabelerError::ClassificationError {
                status: None,
                message: format!("Malformed classifier response: {}", error),
            }
        } else {
            LabelerError::ClassificationError {
                status: error.status().map(|s| s.as_u16()),
                message: error.to_string(),
            }
        }
    }
}
