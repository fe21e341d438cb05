// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use batchhat::batcher_service::flush_interval_from_secs;
use batchhat::constants::{DEFAULT_API_URL, DEFAULT_FLUSH_INTERVAL, DEFAULT_TIMEOUT};
use batchhat::errors;
use std::env;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(transparent)]
    Creation(#[from] errors::Creation),
    #[error("invalid {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub flush_interval: Duration,
    pub api_url: String,
    pub timeout: Duration,
    /// Account key for stats submitted without one. Unset disables those flushes.
    pub account_key: String,
    pub https_proxy: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(port) => port.parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value: port,
            })?,
            None => DEFAULT_PORT,
        };

        let flush_interval = match lookup("BATCHHAT_FLUSH_INTERVAL") {
            Some(secs) => {
                let secs = secs.parse::<i64>().map_err(|_| ConfigError::Invalid {
                    name: "BATCHHAT_FLUSH_INTERVAL",
                    value: secs,
                })?;
                flush_interval_from_secs(secs)?
            }
            None => DEFAULT_FLUSH_INTERVAL,
        };

        let timeout = match lookup("BATCHHAT_TIMEOUT") {
            Some(secs) => match secs.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "BATCHHAT_TIMEOUT",
                        value: secs,
                    })
                }
            },
            None => DEFAULT_TIMEOUT,
        };

        Ok(Config {
            port,
            flush_interval,
            api_url: lookup("BATCHHAT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            timeout,
            account_key: lookup("BATCHHAT_EZKEY").unwrap_or_default(),
            https_proxy: lookup("BATCHHAT_PROXY_HTTPS").or_else(|| lookup("HTTPS_PROXY")),
        })
    }
}
