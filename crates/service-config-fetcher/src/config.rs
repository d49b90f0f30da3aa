//! Environment-driven settings for the config fetcher.
//!
//! The embedder builds a [`FetcherConfig`] once at startup, either from the
//! process environment or from an explicit key/value iterator in tests, and
//! hands the relevant pieces to the transport and token provider.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Base address of the Service Management API.
const ENV_SERVICE_MANAGEMENT_URL: &str = "SERVICE_MANAGEMENT_URL";
/// PEM bundle holding the trust anchors for Service Management calls.
const ENV_ROOT_CERTS_PATH: &str = "ROOT_CERTS_PATH";
/// Optional service account key file; selects key-based credentials when set.
const ENV_SERVICE_ACCOUNT_KEY: &str = "SERVICE_ACCOUNT_KEY";
/// Declares that no metadata server is reachable.
const ENV_NON_GCP: &str = "NON_GCP";
/// Base address of the platform metadata server.
const ENV_METADATA_URL: &str = "METADATA_URL";
/// Per-request timeout in seconds.
const ENV_HTTP_REQUEST_TIMEOUT_SECS: &str = "HTTP_REQUEST_TIMEOUT_SECS";

const DEFAULT_SERVICE_MANAGEMENT_URL: &str = "https://servicemanagement.googleapis.com";
const DEFAULT_ROOT_CERTS_PATH: &str = "/etc/ssl/certs/ca-certificates.crt";
const DEFAULT_METADATA_URL: &str = "http://169.254.169.254";
const DEFAULT_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings consumed by the transport, remote caller and token provider.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Service Management base URL (scheme + host, no trailing slash).
    pub service_management_url: String,
    /// Path to the PEM trust bundle used by the secured transport.
    pub root_certs_path: PathBuf,
    /// Service account key file, when key-based credentials are used.
    pub service_account_key: Option<PathBuf>,
    /// When `true`, the metadata server is never contacted.
    pub non_gcp: bool,
    /// Metadata server base URL.
    pub metadata_url: String,
    /// Fixed timeout applied to every request.
    pub http_request_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self::from_env_iter::<Vec<(String, String)>, _, _>(Vec::new())
    }
}

impl FetcherConfig {
    /// Builds settings from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let service_management_url = map
            .get(ENV_SERVICE_MANAGEMENT_URL)
            .and_then(|value| sanitize_non_empty(value))
            .unwrap_or_else(|| DEFAULT_SERVICE_MANAGEMENT_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let root_certs_path = map
            .get(ENV_ROOT_CERTS_PATH)
            .and_then(|value| sanitize_non_empty(value))
            .map_or_else(|| PathBuf::from(DEFAULT_ROOT_CERTS_PATH), PathBuf::from);
        let service_account_key = map
            .get(ENV_SERVICE_ACCOUNT_KEY)
            .and_then(|value| sanitize_non_empty(value))
            .map(PathBuf::from);
        let non_gcp = parse_bool(map.get(ENV_NON_GCP).map(String::as_str), false);
        let metadata_url = map
            .get(ENV_METADATA_URL)
            .and_then(|value| sanitize_non_empty(value))
            .unwrap_or_else(|| DEFAULT_METADATA_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        // Unparseable or zero timeouts fall back to the default rather than disabling it.
        let http_request_timeout = map
            .get(ENV_HTTP_REQUEST_TIMEOUT_SECS)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_HTTP_REQUEST_TIMEOUT, Duration::from_secs);

        Self {
            service_management_url,
            root_certs_path,
            service_account_key,
            non_gcp,
            metadata_url,
            http_request_timeout,
        }
    }
}

/// Helper trimming whitespace and discarding empty values.
pub(crate) fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses boolean values from strings, falling back to the provided default.
pub(crate) fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}
