//! TLS-pinned HTTP client shared by every Service Management call.

use std::path::Path;
use std::time::Duration;

use reqwest::{redirect, Certificate, Client, ClientBuilder};
use tracing::debug;

use crate::error::FetchError;

/// HTTP client that trusts only the anchors from a PEM bundle.
///
/// Built once per process; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct SecuredTransport {
    client: Client,
    timeout: Duration,
}

impl SecuredTransport {
    /// Loads the trust bundle at `root_certs_path` and builds the client.
    pub fn new(root_certs_path: &Path, timeout: Duration) -> Result<Self, FetchError> {
        let pem = std::fs::read(root_certs_path).map_err(|err| {
            FetchError::Configuration(format!(
                "failed to read root certificates from {}: {err}",
                root_certs_path.display()
            ))
        })?;
        Self::from_pem(&pem, timeout)
    }

    /// Builds the client from an in-memory PEM bundle.
    pub fn from_pem(pem: &[u8], timeout: Duration) -> Result<Self, FetchError> {
        let certs = Certificate::from_pem_bundle(pem).map_err(|err| {
            FetchError::Configuration(format!("failed to parse root certificates: {err}"))
        })?;
        if certs.is_empty() {
            return Err(FetchError::Configuration(
                "root certificate bundle contains no certificates".to_string(),
            ));
        }
        debug!(anchors = certs.len(), ?timeout, "building secured transport");

        let builder = certs
            .into_iter()
            .fold(create_client_builder(timeout), |builder, cert| {
                builder.add_root_certificate(cert)
            });
        let client = builder.build().map_err(|err| {
            FetchError::Configuration(format!("failed to build http client: {err}"))
        })?;
        Ok(Self { client, timeout })
    }

    /// Returns the underlying client; clones share the connection pool.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Base builder: rustls only, no platform roots, no redirects, fixed timeout.
///
/// A redirect is reported to the caller as a non-200 status instead of being
/// followed to a host outside the pinned trust set.
fn create_client_builder(timeout: Duration) -> ClientBuilder {
    Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .redirect(redirect::Policy::none())
        .timeout(timeout)
}
