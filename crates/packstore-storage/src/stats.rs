//! Engine counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine statistics
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Objects stored as the first copy of their hash
    pub stores: AtomicU64,
    /// Stores that lost to an existing record
    pub duplicates: AtomicU64,
    /// Payload bytes appended, duplicates included
    pub bytes_written: AtomicU64,
    pub rollovers: AtomicU64,
    pub fetches: AtomicU64,
    pub not_found: AtomicU64,
    pub lookup_hits: AtomicU64,
    pub lookup_misses: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub stores: u64,
    pub duplicates: u64,
    pub bytes_written: u64,
    pub rollovers: u64,
    pub fetches: u64,
    pub not_found: u64,
    pub lookup_hits: u64,
    pub lookup_misses: u64,
}

impl EngineStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            stores: self.stores.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            rollovers: self.rollovers.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            lookup_hits: self.lookup_hits.load(Ordering::Relaxed),
            lookup_misses: self.lookup_misses.load(Ordering::Relaxed),
        }
    }
}
