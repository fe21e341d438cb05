// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Maximum number of stats the ingestion API accepts in a single bulk payload.
pub const MAX_CHUNK: usize = 1_000;

/// Capacity of the intake queue between producers and the batcher loop.
pub const QUEUE_CAPACITY: usize = 10_000;

/// Upper bound on flushes shipping at the same time.
pub const MAX_IN_FLIGHT_FLUSHES: usize = 16;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(15);

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts per chunk. Only transport failures are retried.
pub const DEFAULT_SEND_ATTEMPTS: u64 = 2;

pub const DEFAULT_API_URL: &str = "http://api.stathat.com/ez";
