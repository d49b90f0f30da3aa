//! Loads a service config document from disk or from Service Management.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use service_management_proto::Service;
use thiserror::Error;
use tracing::debug;

use crate::credentials::TokenSource;
use crate::error::{ErrorKind, FetchError};
use crate::http::{decode_service, ServiceManagementClient};

/// Where a config document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// File holding a binary-encoded `google.api.Service`.
    LocalPath(PathBuf),
    /// Config `config_id` of `service_name`, fetched with a fresh token.
    Remote {
        service_name: String,
        config_id: String,
    },
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalPath(path) => write!(f, "file {}", path.display()),
            Self::Remote {
                service_name,
                config_id,
            } => write!(f, "service {service_name} config {config_id}"),
        }
    }
}

/// Loading a config failed; the underlying cause is kept as the source.
#[derive(Debug, Error)]
#[error("failed to load service config from {source_desc}")]
pub struct LoadError {
    source_desc: String,
    #[source]
    cause: FetchError,
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }

    pub fn cause(&self) -> &FetchError {
        &self.cause
    }

    pub fn into_cause(self) -> FetchError {
        self.cause
    }
}

/// Reads config documents from either [`ConfigSource`] variant.
#[derive(Clone)]
pub struct ConfigLoader {
    client: ServiceManagementClient,
    tokens: Arc<dyn TokenSource>,
}

impl fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("client", &self.client)
            .finish()
    }
}

impl ConfigLoader {
    pub fn new(client: ServiceManagementClient, tokens: Arc<dyn TokenSource>) -> Self {
        Self { client, tokens }
    }

    pub async fn load(&self, source: &ConfigSource) -> Result<Service, LoadError> {
        let loaded = match source {
            ConfigSource::LocalPath(path) => read_local(path.clone()).await,
            ConfigSource::Remote {
                service_name,
                config_id,
            } => self.fetch_remote(service_name, config_id).await,
        };
        loaded.map_err(|cause| LoadError {
            source_desc: source.to_string(),
            cause,
        })
    }

    async fn fetch_remote(
        &self,
        service_name: &str,
        config_id: &str,
    ) -> Result<Service, FetchError> {
        let token = self.tokens.acquire().await?;
        let service = self
            .client
            .fetch_config(service_name, config_id, &token.token)
            .await?;
        debug!(service = %service_name, config_id = %config_id, "fetched service config");
        Ok(service)
    }
}

async fn read_local(path: PathBuf) -> Result<Service, FetchError> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| FetchError::LocalRead {
            path: path.clone(),
            source,
        })?;
    let service = decode_service(&bytes)?;
    debug!(path = %path.display(), "read service config from file");
    Ok(service)
}
