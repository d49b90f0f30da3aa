// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Settings that only the binary reads: which services to poll, how often,
//! and at which log level.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

const ENV_SERVICE_NAMES: &str = "SERVICE_NAMES";
const ENV_POLL_INTERVAL_SECS: &str = "POLL_INTERVAL_SECS";
const ENV_CONFIG_LOG_LEVEL: &str = "CONFIG_LOG_LEVEL";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SERVICE_NAMES must name at least one service")]
    NoServices,
    #[error("invalid POLL_INTERVAL_SECS value {0:?}")]
    InvalidPollInterval(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSettings {
    pub service_names: Vec<String>,
    pub poll_interval: Duration,
    pub log_level: String,
}

impl PollerSettings {
    pub fn from_os_env() -> Result<Self, ConfigError> {
        Self::from_env_iter(env::vars())
    }

    pub fn from_env_iter<I, K, V>(iter: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let service_names: Vec<String> = map
            .get(ENV_SERVICE_NAMES)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if service_names.is_empty() {
            return Err(ConfigError::NoServices);
        }

        let poll_interval = match map.get(ENV_POLL_INTERVAL_SECS).map(|v| v.trim()) {
            None | Some("") => DEFAULT_POLL_INTERVAL,
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(ConfigError::InvalidPollInterval(raw.to_string())),
            },
        };

        let log_level = map
            .get(ENV_CONFIG_LOG_LEVEL)
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            service_names,
            poll_interval,
            log_level,
        })
    }
}
