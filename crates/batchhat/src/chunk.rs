// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::MAX_CHUNK;
use crate::stat::Stat;

/// Splits `stats` into ingestion-sized sub-batches of at most [`MAX_CHUNK`] entries, in order.
///
/// An empty input yields no chunks. The final chunk always ends at `stats.len()` and is never
/// empty.
pub fn chunks(stats: &[Stat]) -> impl ExactSizeIterator<Item = &[Stat]> {
    stats.chunks(MAX_CHUNK)
}

/// Number of sub-batches [`chunks`] produces for `len` stats.
#[must_use]
pub const fn chunk_count(len: usize) -> usize {
    len.div_ceil(MAX_CHUNK)
}
