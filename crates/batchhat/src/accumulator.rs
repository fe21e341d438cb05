// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::stat::Stat;
use hashbrown::HashMap;
use ustr::Ustr;

/// Stats received since the last flush, grouped by destination account key.
///
/// Owned by the batcher loop until [`Accumulator::take`] moves the contents out to a flush.
#[derive(Debug, Default)]
pub struct Accumulator {
    stats: HashMap<Ustr, Vec<Stat>>,
    len: usize,
}

impl Accumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `stat` after every stat already held for `account_key`.
    pub fn push(&mut self, account_key: Ustr, stat: Stat) {
        self.stats.entry(account_key).or_default().push(stat);
        self.len += 1;
    }

    /// Total stats across all account keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Detaches the current contents, leaving an empty accumulator behind.
    #[must_use]
    pub fn take(&mut self) -> Accumulator {
        std::mem::take(self)
    }

    #[cfg(test)]
    #[must_use]
    pub fn get(&self, account_key: &str) -> Option<&[Stat]> {
        self.stats.get(&Ustr::from(account_key)).map(Vec::as_slice)
    }

    /// Consumes the accumulator into per-account batches. Account order is unspecified, the
    /// stats of each account keep their arrival order.
    pub fn into_batches(self) -> impl Iterator<Item = (Ustr, Vec<Stat>)> {
        self.stats.into_iter()
    }
}
