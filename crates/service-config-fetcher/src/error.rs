//! Error taxonomy shared by every stage of a poll cycle.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use crate::credentials::TokenError;

/// Failure of a single fetch, resolve or load step.
///
/// None of these are retried internally; the caller decides when to poll again.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The token source failed to produce a bearer token.
    #[error("no credential available: {0}")]
    CredentialUnavailable(#[source] TokenError),
    /// The backend answered with anything other than `200 OK`.
    #[error("http call to {url} returned {status}")]
    Status { url: String, status: StatusCode },
    /// Connection, TLS, timeout or body read failure.
    #[error("http call to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// Response payload is not a valid protobuf message of the expected type.
    #[error("failed to decode {message}: {source}")]
    Decode {
        message: &'static str,
        #[source]
        source: prost::DecodeError,
    },
    /// The rollout listing or the newest rollout's traffic split is empty.
    #[error("no active rollouts")]
    NoActiveRollouts,
    /// Local config file is missing or unreadable.
    #[error("failed to read {}: {source}", path.display())]
    LocalRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Required setup is missing or invalid (trust bundle, credential strategy).
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Coarse classification of [`FetchError`] exposed to embedders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CredentialUnavailable,
    TransportFailure,
    DeserializationFailure,
    NoActiveRollouts,
    LocalReadFailure,
    ConfigurationError,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CredentialUnavailable(_) => ErrorKind::CredentialUnavailable,
            Self::Status { .. } | Self::Transport { .. } => ErrorKind::TransportFailure,
            Self::Decode { .. } => ErrorKind::DeserializationFailure,
            Self::NoActiveRollouts => ErrorKind::NoActiveRollouts,
            Self::LocalRead { .. } => ErrorKind::LocalReadFailure,
            Self::Configuration(_) => ErrorKind::ConfigurationError,
        }
    }
}

impl From<TokenError> for FetchError {
    /// A missing credential strategy is a setup problem; everything else is
    /// treated as a transient credential outage.
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::NotConfigured(_) => Self::Configuration(err.to_string()),
            other => Self::CredentialUnavailable(other),
        }
    }
}
