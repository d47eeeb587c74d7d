//! OAuth2 credential acquisition for the Gmail API
//!
//! Two installed-app flows are supported: a local HTTP redirect listener on
//! `auth.oauth_bind_port`, or an interactive flow that prints the consent URL
//! and reads the code from stdin. Either way the token is persisted to
//! `auth.token_cache` and refreshed from there on later starts.

use async_trait::async_trait;
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::Path;
use tracing::{info, warn};
use yup_oauth2::authenticator::Authenticator;
use yup_oauth2::InstalledFlowReturnMethod;

use crate::config::{AuthConfig, AuthFlow};
use crate::error::{ExporterError, Result};

/// The exporter only ever reads the mailbox
pub const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub = Gmail<HttpsConnector>;

/// Source of bearer tokens for the mail API
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A currently valid access token, or `AuthRequired` if the operator
    /// still has to authorize the exporter
    async fn token(&self) -> Result<String>;
}

/// Token provider backed by a yup-oauth2 installed-app authenticator
#[derive(Clone)]
pub struct OAuthCredentialProvider {
    authenticator: Authenticator<HttpsConnector>,
    token_cache: std::path::PathBuf,
}

impl OAuthCredentialProvider {
    /// Build the authenticator for `config`
    ///
    /// Fails with `ClientSecretMissing` if the client secret file is absent;
    /// no authorization happens until the first [`CredentialProvider::token`]
    /// call.
    pub async fn from_config(config: &AuthConfig) -> Result<Self> {
        ensure_client_secret(&config.client_secret_file)?;

        let secret = yup_oauth2::read_application_secret(&config.client_secret_file)
            .await
            .map_err(|e| ExporterError::AuthError(format!("Failed to read client secret: {}", e)))?;

        if let Some(parent) = config.token_cache.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let authenticator =
            yup_oauth2::InstalledFlowAuthenticator::builder(secret, return_method(config))
                .persist_tokens_to_disk(&config.token_cache)
                .build()
                .await
                .map_err(|e| {
                    ExporterError::AuthError(format!("Failed to build authenticator: {}", e))
                })?;

        Ok(Self {
            authenticator,
            token_cache: config.token_cache.clone(),
        })
    }
}

#[async_trait]
impl CredentialProvider for OAuthCredentialProvider {
    async fn token(&self) -> Result<String> {
        let token = self
            .authenticator
            .token(&[READONLY_SCOPE])
            .await
            .map_err(|e| ExporterError::AuthRequired(format!("Failed to obtain token: {}", e)))?;

        if self.token_cache.exists() {
            secure_token_file(&self.token_cache).await?;
        }

        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| ExporterError::AuthRequired("token response had no access token".to_string()))
    }
}

/// yup-oauth2 return method for the configured flow
pub fn return_method(config: &AuthConfig) -> InstalledFlowReturnMethod {
    match config.flow {
        AuthFlow::Redirect => InstalledFlowReturnMethod::HTTPPortRedirect(config.oauth_bind_port),
        AuthFlow::Interactive => InstalledFlowReturnMethod::Interactive,
    }
}

/// Fail fast when the client secret has not been downloaded yet
pub fn ensure_client_secret(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ExporterError::ClientSecretMissing {
            path: path.display().to_string(),
        })
    }
}

/// Authorize the exporter and build the Gmail hub
///
/// Blocks until a token is available, which on first use means until the
/// operator has completed the consent flow.
pub async fn initialize_gmail_hub(config: &AuthConfig) -> Result<GmailHub> {
    let provider = OAuthCredentialProvider::from_config(config).await?;

    if config.flow == AuthFlow::Redirect && !config.token_cache.exists() {
        info!(
            "No stored token; waiting for authorization via redirect on port {}",
            config.oauth_bind_port
        );
    }

    // Pre-authenticate so the first refresh cycle does not stall on consent
    provider.token().await?;
    info!("Got Gmail credentials, token stored at {:?}", config.token_cache);

    // HTTP/1 works better with google-gmail1 than the HTTP/2 default
    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| ExporterError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, provider.authenticator))
}

/// Run the consent flow and store the token, then exit
///
/// With `force`, any stored token is discarded first.
pub async fn authorize(config: &AuthConfig, force: bool) -> Result<()> {
    if force && config.token_cache.exists() {
        warn!("Discarding stored token at {:?}", config.token_cache);
        tokio::fs::remove_file(&config.token_cache).await?;
    }

    let provider = OAuthCredentialProvider::from_config(config).await?;
    provider.token().await?;

    info!("Authorization complete, token stored at {:?}", config.token_cache);
    Ok(())
}

/// Secure token file permissions on Unix systems
///
/// Sets file permissions to 0600 (read/write for owner only)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    if perms.mode() & 0o777 != 0o600 {
        perms.set_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }
    Ok(())
}

/// Windows uses ACLs, file modes do not apply
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
