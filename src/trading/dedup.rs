//! Bounded set of already-forwarded transaction hashes, plus per-trader
//! watermarks of the newest forwarded activity time.

use std::collections::{HashMap, HashSet, VecDeque};

pub const MAX_HASH_CACHE_SIZE: usize = 10_000;
pub const CLEANUP_BATCH_SIZE: usize = 1_000;

#[derive(Debug)]
pub struct DedupCache {
    seen: HashSet<String>,
    // Insertion order, oldest first.
    order: VecDeque<String>,
    max_size: usize,
    batch_size: usize,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::with_limits(MAX_HASH_CACHE_SIZE, CLEANUP_BATCH_SIZE)
    }
}

impl DedupCache {
    pub fn with_limits(max_size: usize, batch_size: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            max_size,
            batch_size: batch_size.max(1),
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.seen.contains(hash)
    }

    /// Record a hash. Returns false if it was already present.
    pub fn insert(&mut self, hash: &str) -> bool {
        if !self.seen.insert(hash.to_string()) {
            return false;
        }
        self.order.push_back(hash.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Evict the oldest entries once the cache exceeds its bound. Removes at
    /// least one batch, more if needed to get back under the bound. Returns
    /// how many entries were evicted.
    pub fn cleanup(&mut self) -> usize {
        if self.seen.len() <= self.max_size {
            return 0;
        }

        let excess = self.seen.len() - self.max_size;
        let evict = excess.max(self.batch_size).min(self.order.len());
        for hash in self.order.drain(..evict) {
            self.seen.remove(&hash);
        }
        evict
    }
}

/// Newest forwarded activity time per trader, in epoch seconds.
#[derive(Debug, Default)]
pub struct Watermarks {
    latest: HashMap<String, i64>,
}

impl Watermarks {
    /// Absent traders read as 0.
    pub fn get(&self, trader: &str) -> i64 {
        self.latest.get(trader).copied().unwrap_or(0)
    }

    pub fn is_newer(&self, trader: &str, timestamp: i64) -> bool {
        timestamp > self.get(trader)
    }

    /// Move the watermark forward. Never moves it back.
    pub fn advance(&mut self, trader: &str, timestamp: i64) {
        let entry = self.latest.entry(trader.to_string()).or_insert(0);
        *entry = (*entry).max(timestamp);
    }
}
