//! Resolves which service config should be served from Service Management
//! rollouts, and fetches it.
//!
//! The crate supplies the logic of one poll cycle; scheduling cycles is left
//! to the embedder. Building blocks, leaf first:
//!
//! - [`transport::SecuredTransport`]: reqwest client pinned to a PEM trust bundle.
//! - [`http::RemoteCaller`] / [`http::ServiceManagementClient`]: authenticated
//!   GETs and protobuf decoding of rollout listings and config documents.
//! - [`credentials::TokenSource`]: bearer token acquisition.
//! - [`rollout::RolloutResolver`]: picks the next [`ActiveSelection`].
//! - [`loader::ConfigLoader`]: reads a config from disk or from the backend.
//! - [`poller::ServiceConfigPoller`]: carries the selection between cycles.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod loader;
pub mod poller;
pub mod rollout;
#[cfg(test)]
mod test_support;
pub mod transport;

pub use config::FetcherConfig;
pub use credentials::{
    AccessToken, KeyTokenResolverFn, MetadataTokenSource, StaticTokenSource, TokenError,
    TokenProvider, TokenSource,
};
pub use error::{ErrorKind, FetchError};
pub use http::{HttpCaller, RemoteCaller, ServiceManagementClient};
pub use loader::{ConfigLoader, ConfigSource, LoadError};
pub use poller::{PollOutcome, ServiceConfigPoller};
pub use rollout::{is_partial_rollout, select_config_id, ActiveSelection, RolloutResolver};
pub use service_management_proto::Service;
pub use transport::SecuredTransport;
