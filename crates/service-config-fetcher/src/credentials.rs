//! Bearer token acquisition.
//!
//! Exactly one strategy is active per process and is chosen once at startup:
//!
//! - a service account key file, signed and exchanged by an embedder-supplied
//!   resolver (the signing itself lives outside this crate);
//! - the platform metadata server, which hands out tokens for the default
//!   service account over plain HTTP.
//!
//! When neither is available every acquisition fails with
//! [`TokenError::NotConfigured`], which the poll cycle reports as a
//! configuration error rather than a transient outage.

use std::fmt::Debug;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::FetcherConfig;

/// Path of the default service account token on the metadata server.
const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
/// Tokens this close to expiry are refreshed instead of reused.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// A bearer token and how long it remains valid.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_in: Duration,
}

impl Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    /// No usable credential strategy was configured.
    #[error("no credential strategy configured: {0}")]
    NotConfigured(String),
    #[error("token request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("token endpoint returned {0}")]
    Status(StatusCode),
    #[error("malformed token response: {0}")]
    Decode(#[from] serde_json::Error),
    /// The reported lifetime does not fit the monotonic clock.
    #[error("token lifetime of {0}s is out of range")]
    LifetimeOutOfRange(u64),
    /// The token cannot be carried in an `Authorization` header.
    #[error("token contains characters not allowed in a header")]
    InvalidHeaderValue,
    /// Failure reported by an embedder-supplied resolver.
    #[error("{0}")]
    Resolver(String),
}

/// Capability producing bearer tokens on demand.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire(&self) -> Result<AccessToken, TokenError>;
}

/// Resolves a token from a service account key file.
pub type KeyTokenResolverFn = Arc<
    dyn Fn(PathBuf) -> Pin<Box<dyn Future<Output = Result<AccessToken, TokenError>> + Send>>
        + Send
        + Sync,
>;

/// The credential strategy selected for this process.
#[derive(Clone)]
pub enum TokenProvider {
    ServiceAccountKey {
        key_path: PathBuf,
        resolver: KeyTokenResolverFn,
    },
    Metadata(MetadataTokenSource),
    Unconfigured(String),
}

impl TokenProvider {
    /// Picks the credential strategy from the fetcher settings.
    ///
    /// A configured key path always wins over the metadata server. The metadata
    /// server is only used when the process is not flagged as `non_gcp`.
    pub fn select(
        config: &FetcherConfig,
        key_resolver: Option<KeyTokenResolverFn>,
    ) -> Result<Self, TokenError> {
        if let Some(key_path) = &config.service_account_key {
            return Ok(match key_resolver {
                Some(resolver) => Self::ServiceAccountKey {
                    key_path: key_path.clone(),
                    resolver,
                },
                None => Self::Unconfigured(format!(
                    "service account key {} is set but no key resolver is installed",
                    key_path.display()
                )),
            });
        }
        if config.non_gcp {
            return Ok(Self::Unconfigured(
                "a service account key is required when running outside GCP".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(config.http_request_timeout)
            .build()
            .map_err(|source| TokenError::Request {
                url: config.metadata_url.clone(),
                source,
            })?;
        Ok(Self::Metadata(MetadataTokenSource::new(
            client,
            &config.metadata_url,
        )))
    }
}

impl Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceAccountKey { key_path, .. } => f
                .debug_struct("ServiceAccountKey")
                .field("key_path", key_path)
                .finish(),
            Self::Metadata(source) => f.debug_tuple("Metadata").field(source).finish(),
            Self::Unconfigured(reason) => f.debug_tuple("Unconfigured").field(reason).finish(),
        }
    }
}

#[async_trait]
impl TokenSource for TokenProvider {
    async fn acquire(&self) -> Result<AccessToken, TokenError> {
        match self {
            Self::ServiceAccountKey { key_path, resolver } => (resolver)(key_path.clone()).await,
            Self::Metadata(source) => source.acquire().await,
            Self::Unconfigured(reason) => Err(TokenError::NotConfigured(reason.clone())),
        }
    }
}

#[derive(Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Fetches tokens for the default service account from the metadata server.
///
/// Tokens are cached and reused until they come within one minute of expiry.
#[derive(Clone)]
pub struct MetadataTokenSource {
    client: Client,
    token_url: String,
    cached: Arc<Mutex<Option<(String, Instant)>>>,
}

impl MetadataTokenSource {
    pub fn new(client: Client, metadata_url: &str) -> Self {
        Self {
            client,
            token_url: format!("{}{}", metadata_url.trim_end_matches('/'), METADATA_TOKEN_PATH),
            cached: Arc::new(Mutex::new(None)),
        }
    }

    async fn fetch(&self) -> Result<MetadataTokenResponse, TokenError> {
        let request_error = |source| TokenError::Request {
            url: self.token_url.clone(),
            source,
        };
        let response = self
            .client
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(TokenError::Status(status));
        }
        let body = response.bytes().await.map_err(request_error)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

impl Debug for MetadataTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTokenSource")
            .field("token_url", &self.token_url)
            .finish()
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn acquire(&self) -> Result<AccessToken, TokenError> {
        // Held across the fetch so concurrent cycles share one refresh.
        let mut cached = self.cached.lock().await;
        let now = Instant::now();
        if let Some((token, expiry)) = cached.as_ref() {
            let remaining = expiry.saturating_duration_since(now);
            if remaining > TOKEN_REFRESH_MARGIN {
                return Ok(AccessToken {
                    token: token.clone(),
                    expires_in: remaining,
                });
            }
        }

        let fresh = self.fetch().await?;
        let expires_in = Duration::from_secs(fresh.expires_in);
        let expiry = now
            .checked_add(expires_in)
            .ok_or(TokenError::LifetimeOutOfRange(fresh.expires_in))?;
        debug!(expires_in = ?expires_in, "fetched access token from metadata server");
        *cached = Some((fresh.access_token.clone(), expiry));
        Ok(AccessToken {
            token: fresh.access_token,
            expires_in,
        })
    }
}

/// Hands out a fixed token; useful for local development and tests.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: AccessToken,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            token: AccessToken {
                token: token.into(),
                expires_in,
            },
        }
    }
}

impl Debug for StaticTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StaticTokenSource")
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn acquire(&self) -> Result<AccessToken, TokenError> {
        Ok(self.token.clone())
    }
}
