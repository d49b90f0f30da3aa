//! Authenticated calls against the Service Management API.
//!
//! [`RemoteCaller`] is the seam between the protocol logic and the network:
//! [`HttpCaller`] sends the request through the [`SecuredTransport`], while
//! tests can substitute canned responses. [`ServiceManagementClient`] builds
//! the endpoint URLs and decodes the two protobuf message kinds.

use std::sync::Arc;

use async_trait::async_trait;
use prost::Message;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use service_management_proto::{ListServiceRolloutsResponse, Service};
use tracing::debug;

use crate::credentials::TokenError;
use crate::error::FetchError;
use crate::transport::SecuredTransport;

/// Config document endpoint, relative to the Service Management base URL.
const FETCH_CONFIG_PATH: &str = "/v1/services/{service}/configs/{config_id}?view=FULL";
/// Successful rollouts endpoint, relative to the Service Management base URL.
const FETCH_ROLLOUTS_PATH: &str = "/v1/services/{service}/rollouts?filter=status=SUCCESS";

const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Issues a bearer-authenticated GET and returns the raw body of a `200 OK`.
#[async_trait]
pub trait RemoteCaller: Send + Sync {
    async fn call_authenticated(&self, url: &str, token: &str) -> Result<Vec<u8>, FetchError>;
}

/// [`RemoteCaller`] backed by the TLS-pinned reqwest client.
#[derive(Debug, Clone)]
pub struct HttpCaller {
    client: Client,
}

impl HttpCaller {
    pub fn new(transport: &SecuredTransport) -> Self {
        Self {
            client: transport.client().clone(),
        }
    }
}

#[async_trait]
impl RemoteCaller for HttpCaller {
    async fn call_authenticated(&self, url: &str, token: &str) -> Result<Vec<u8>, FetchError> {
        let transport_error = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let headers = auth_headers(token)?;
        debug!(url = %url, "service management request");

        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        debug!(url = %url, status = %status, "service management response");
        // Redirects are not followed by the transport and land here as failures.
        if status != StatusCode::OK {
            // Dropping the response releases the connection without reading the body.
            drop(response);
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.bytes().await.map_err(transport_error)?;
        Ok(body.to_vec())
    }
}

/// Builds the per-request headers; the token never outlives the request.
fn auth_headers(token: &str) -> Result<HeaderMap, FetchError> {
    let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| FetchError::CredentialUnavailable(TokenError::InvalidHeaderValue))?;
    bearer.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(PROTOBUF_CONTENT_TYPE));
    Ok(headers)
}

/// Typed access to the rollout listing and config document endpoints.
#[derive(Clone)]
pub struct ServiceManagementClient {
    caller: Arc<dyn RemoteCaller>,
    base_url: String,
}

impl std::fmt::Debug for ServiceManagementClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManagementClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ServiceManagementClient {
    pub fn new(caller: Arc<dyn RemoteCaller>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { caller, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rollouts_url(&self, service_name: &str) -> String {
        let path = FETCH_ROLLOUTS_PATH.replacen("{service}", service_name, 1);
        format!("{}{}", self.base_url, path)
    }

    pub fn config_url(&self, service_name: &str, config_id: &str) -> String {
        let path = FETCH_CONFIG_PATH
            .replacen("{service}", service_name, 1)
            .replacen("{config_id}", config_id, 1);
        format!("{}{}", self.base_url, path)
    }

    /// Lists the successful rollouts of `service_name`, newest first.
    pub async fn fetch_rollouts(
        &self,
        service_name: &str,
        token: &str,
    ) -> Result<ListServiceRolloutsResponse, FetchError> {
        let body = self
            .caller
            .call_authenticated(&self.rollouts_url(service_name), token)
            .await?;
        ListServiceRolloutsResponse::decode(body.as_slice()).map_err(|source| {
            FetchError::Decode {
                message: "ListServiceRolloutsResponse",
                source,
            }
        })
    }

    /// Fetches the full service config document `config_id`.
    pub async fn fetch_config(
        &self,
        service_name: &str,
        config_id: &str,
        token: &str,
    ) -> Result<Service, FetchError> {
        let body = self
            .caller
            .call_authenticated(&self.config_url(service_name, config_id), token)
            .await?;
        decode_service(&body)
    }
}

/// Decodes a binary `google.api.Service` document.
pub(crate) fn decode_service(bytes: &[u8]) -> Result<Service, FetchError> {
    Service::decode(bytes).map_err(|source| FetchError::Decode {
        message: "Service",
        source,
    })
}
