// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::accumulator::Accumulator;
use crate::chunk::chunks;
use crate::stathat::{EzApi, ShippingError};
use reqwest::Response;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct Flusher {
    api: EzApi,
    in_flight: Arc<Semaphore>,
}

pub struct FlusherConfig {
    pub api: EzApi,
    pub max_in_flight: usize,
}

/// Result of a single flush, in chunks for shipped/rejected/failed and in stats for skipped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Chunks accepted with a success status
    pub shipped: usize,
    /// Chunks answered with a non-success status
    pub rejected: usize,
    /// Chunks that could not be serialized or delivered
    pub failed: usize,
    /// Stats dropped because no account key was set
    pub skipped: usize,
}

enum ChunkResult {
    Shipped,
    Rejected,
    Failed,
}

impl Flusher {
    pub fn new(config: FlusherConfig) -> Self {
        Flusher {
            api: config.api,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
        }
    }

    /// Ships every stat in `accumulated`, one account at a time, chunks in order.
    ///
    /// Nothing here is fatal: failed chunks are logged and dropped while the remaining chunks are
    /// still attempted.
    pub async fn flush(&self, accumulated: Accumulator) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        if accumulated.is_empty() {
            return outcome;
        }

        let _permit = match self.in_flight.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Failed to flush stats: {e}");
                outcome.skipped = accumulated.len();
                return outcome;
            }
        };

        debug!("Flushing {} stats", accumulated.len());
        for (account_key, stats) in accumulated.into_batches() {
            if stats.is_empty() {
                continue;
            }
            if account_key.is_empty() {
                warn!("Skipping flush. ez key not set. stats={}", stats.len());
                outcome.skipped += stats.len();
                continue;
            }

            for chunk in chunks(&stats) {
                match log_result(self.api.ship(account_key.as_str(), chunk).await).await {
                    ChunkResult::Shipped => outcome.shipped += 1,
                    ChunkResult::Rejected => outcome.rejected += 1,
                    ChunkResult::Failed => outcome.failed += 1,
                }
            }
        }

        debug!(
            "Flush finished: {} shipped, {} rejected, {} failed, {} stats skipped",
            outcome.shipped, outcome.rejected, outcome.failed, outcome.skipped
        );
        outcome
    }
}

async fn log_result(resp: Result<Response, ShippingError>) -> ChunkResult {
    match resp {
        Ok(resp_payload) => {
            let status = resp_payload.status();
            let body = resp_payload.text().await.unwrap_or_default();
            if status.is_success() {
                debug!("Flushed. status={status} resp={body}");
                ChunkResult::Shipped
            } else {
                error!("{status}: Stats rejected by API: {body:?}");
                ChunkResult::Rejected
            }
        }
        Err(ShippingError::Payload(msg)) => {
            error!("Failed to prepare payload. Data dropped: {msg}");
            ChunkResult::Failed
        }
        Err(ShippingError::Destination(sc, msg)) => {
            error!("Error shipping data: {sc:?} {msg}");
            ChunkResult::Failed
        }
    }
}
