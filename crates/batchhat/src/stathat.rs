// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for the bulk ingestion endpoint.

use crate::constants::DEFAULT_SEND_ATTEMPTS;
use crate::errors;
use crate::reqwest_adapter::create_reqwest_client_builder;
use crate::stat::{BulkStat, Stat};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Number of attempts, sent back to back
    Immediate(u64),
    /// Number of attempts and the delay in milliseconds between them
    LinearBackoff(u64, u64),
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Immediate(DEFAULT_SEND_ATTEMPTS)
    }
}

impl RetryStrategy {
    fn attempts(&self) -> u64 {
        match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                (*attempts).max(1)
            }
        }
    }
}

#[derive(Debug)]
pub enum ShippingError {
    Payload(String),
    Destination(Option<StatusCode>, String),
}

impl std::fmt::Display for ShippingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShippingError::Payload(msg) => write!(f, "payload error: {msg}"),
            ShippingError::Destination(Some(status), msg) => {
                write!(f, "destination error ({status}): {msg}")
            }
            ShippingError::Destination(None, msg) => write!(f, "destination error: {msg}"),
        }
    }
}

/// Posts bulk stat payloads to the ingestion URL.
#[derive(Debug, Clone)]
pub struct EzApi {
    url: String,
    client: Client,
    retry_strategy: RetryStrategy,
}

impl EzApi {
    pub fn new(
        url: String,
        https_proxy: Option<String>,
        timeout: Duration,
        retry_strategy: RetryStrategy,
    ) -> Result<Self, errors::Creation> {
        let client = build_client(https_proxy, timeout)
            .map_err(|e| errors::Creation::HttpClient(e.to_string()))?;
        Ok(EzApi {
            url,
            client,
            retry_strategy,
        })
    }

    /// Ships one sub-batch for `account_key`.
    ///
    /// Only transport failures are retried. Any HTTP response ends the attempts and is returned
    /// as-is, whatever its status, so the caller decides how to report it.
    pub async fn ship(
        &self,
        account_key: &str,
        stats: &[Stat],
    ) -> Result<Response, ShippingError> {
        let body = serde_json::to_vec(&BulkStat::new(account_key, stats))
            .map_err(|e| ShippingError::Payload(e.to_string()))?;
        debug!(
            "Sending {} stats ({} bytes) to {}",
            stats.len(),
            body.len(),
            self.url
        );
        self.send_with_retry(body).await
    }

    async fn send_with_retry(&self, body: Vec<u8>) -> Result<Response, ShippingError> {
        let attempts = self.retry_strategy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!("Error posting data to stathat (attempt {attempt}/{attempts}): {e}");
                    if attempt >= attempts {
                        return Err(ShippingError::Destination(
                            e.status(),
                            format!("Failed to send request after {attempts} attempts"),
                        ));
                    }
                }
            }

            if let RetryStrategy::LinearBackoff(_, delay) = self.retry_strategy {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

fn build_client(https_proxy: Option<String>, timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut builder = create_reqwest_client_builder(timeout);
    if let Some(proxy) = https_proxy {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}
