//! OAuth2 authentication management for Gmail API

use async_trait::async_trait;
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::env;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::ApplicationSecret;

use crate::client::{MailGateway, ProductionGmailClient};
use crate::config::GmailConfig;
use crate::error::{LabelerError, Result};

/// Gmail API scopes needed to watch history and apply labels
///
/// - gmail.modify: read messages and history, add labels to messages
/// - gmail.labels: list and create labels
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.labels",
];

/// Environment variable holding the whole OAuth2 client secret JSON
pub const CLIENT_SECRET_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS_JSON";

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Produces an authenticated mailbox session
///
/// The monitor controller calls this when monitoring starts and no session
/// exists yet. Failures are reported to whoever asked for the start.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<Arc<dyn MailGateway>>;
}

/// Authenticates against Gmail with the client secret and the token cached by
/// `gmail-labeler auth`
pub struct GmailAuthenticator {
    config: GmailConfig,
}

impl GmailAuthenticator {
    pub fn new(config: GmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Authenticator for GmailAuthenticator {
    async fn authenticate(&self) -> Result<Arc<dyn MailGateway>> {
        let hub = connect_with_cached_token(&self.config.credentials_path, &self.config.token_path)
            .await?;
        tracing::info!("Gmail API authentication successful");

        Ok(Arc::new(ProductionGmailClient::new(
            hub,
            self.config.request_timeout(),
            self.config.max_retries,
        )))
    }
}

/// Build a Gmail hub from an already cached token
///
/// The server never starts the browser consent flow on its own: when no usable
/// token is cached the operator has to run `gmail-labeler auth` first.
pub async fn connect_with_cached_token(
    credentials_path: &Path,
    token_cache_path: &Path,
) -> Result<GmailHub> {
    if !token_cache_path.exists() {
        return Err(LabelerError::AuthError(format!(
            "No cached token at {:?}. Run `gmail-labeler auth` to authorize this mailbox",
            token_cache_path
        )));
    }

    build_gmail_hub(credentials_path, token_cache_path, ConsentFlow::Refuse).await
}

/// Initialize Gmail API hub with OAuth2 authentication
///
/// This function sets up the complete Gmail API client with:
/// - OAuth2 authentication using InstalledFlow (desktop app flow)
/// - Token persistence to disk for automatic refresh
/// - HTTP/1 client with TLS support
///
/// # Arguments
/// * `credentials_path` - Path to the OAuth2 credentials JSON file
/// * `token_cache_path` - Path where access tokens will be cached
pub async fn initialize_gmail_hub(
    credentials_path: &Path,
    token_cache_path: &Path,
) -> Result<GmailHub> {
    build_gmail_hub(credentials_path, token_cache_path, ConsentFlow::Browser).await
}

/// What to do when the token cache holds no usable token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsentFlow {
    /// Open the browser and wait for the redirect
    Browser,
    /// Fail with an authentication error
    Refuse,
}

/// Flow delegate that turns any consent prompt into an error
struct RefuseConsent;

impl InstalledFlowDelegate for RefuseConsent {
    fn present_user_url<'a>(
        &'a self,
        _url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<String, String>> + Send + 'a>> {
        Box::pin(async {
            Err("Credentials invalid or expired. Run `gmail-labeler auth` to re-authorize this mailbox"
                .to_string())
        })
    }
}

async fn build_gmail_hub(
    credentials_path: &Path,
    token_cache_path: &Path,
    consent: ConsentFlow,
) -> Result<GmailHub> {
    let secret = load_application_secret(credentials_path).await?;

    // The redirect flow ignores delegate errors, so refusing needs the interactive flow
    let builder = match consent {
        ConsentFlow::Browser => yup_oauth2::InstalledFlowAuthenticator::builder(
            secret,
            yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
        ),
        ConsentFlow::Refuse => yup_oauth2::InstalledFlowAuthenticator::builder(
            secret,
            yup_oauth2::InstalledFlowReturnMethod::Interactive,
        )
        .flow_delegate(Box::new(RefuseConsent)),
    };

    let auth = builder
        .persist_tokens_to_disk(token_cache_path)
        .build()
        .await
        .map_err(|e| LabelerError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Pre-authenticate so the cached token carries every scope used later
    let _token = auth
        .token(REQUIRED_SCOPES)
        .await
        .map_err(|e| LabelerError::AuthError(format!("Failed to obtain token: {}", e)))?;

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| {
                    LabelerError::AuthError(format!("Failed to load TLS roots: {}", e))
                })?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}

/// Load the OAuth2 client secret
///
/// `GOOGLE_APPLICATION_CREDENTIALS_JSON` wins when set, which keeps the secret
/// out of the filesystem in container deployments. Otherwise the secret is read
/// from `credentials_path`.
pub async fn load_application_secret(credentials_path: &Path) -> Result<ApplicationSecret> {
    if let Ok(json) = env::var(CLIENT_SECRET_ENV) {
        return yup_oauth2::parse_application_secret(json.as_bytes()).map_err(|e| {
            LabelerError::AuthError(format!("Invalid {}: {}", CLIENT_SECRET_ENV, e))
        });
    }

    yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| {
            LabelerError::AuthError(format!(
                "Failed to read credentials from {:?}: {}",
                credentials_path, e
            ))
        })
}

/// Secure token file permissions on Unix systems
///
/// Sets file permissions to 0600 (read/write for owner only)
/// to prevent unauthorized access to OAuth2 tokens
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Windows relies on the ACLs of the user's profile directory
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
