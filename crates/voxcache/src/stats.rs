//! Read and admission counters, and the serializable cache snapshot
//!
//! Counters live outside the state lock so reads that only touch the ledger
//! briefly never contend on them.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by every handle of one cache
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    inserts: AtomicU64,
    rejections: AtomicU64,
}

/// Copy of the counters taken at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatCounters {
    /// Reads that found a loaded payload
    pub hits: u64,
    /// Reads that found nothing usable
    pub misses: u64,
    /// Images evicted to make room
    pub evictions: u64,
    /// Payloads admitted
    pub inserts: u64,
    /// Image admissions refused for lack of space
    pub rejections: u64,
}

impl CacheStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Image, volume and geometry reads that returned a payload
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Reads of absent or still in-flight entries
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Images dropped by reclaim, explicit or during admission
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Images, volumes and geometries attached to their entries
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Images refused with `CacheSizeExceeded`
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Share of reads served from the cache (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Current values of every counter
    pub fn counters(&self) -> StatCounters {
        StatCounters {
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            inserts: self.inserts(),
            rejections: self.rejections(),
        }
    }

    /// Zero every counter; cached entries are untouched
    ///
    /// Used between workload phases so each phase reports its own ratio.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.inserts,
            &self.rejections,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time view of budget, occupancy and counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheSnapshot {
    /// Configured budget in bytes
    pub max_cache_size: u64,
    /// Bytes held by loaded images
    pub cache_size: u64,
    /// Budget minus occupancy (negative after shrinking)
    pub bytes_available: i64,
    /// Bytes of images shared with volumes
    pub shared_bytes: u64,
    /// Image entries, loaded or in flight
    pub images: usize,
    /// Volume entries, loaded or in flight
    pub volumes: usize,
    /// Geometry entries, loaded or in flight
    pub geometries: usize,
    /// Counters at the time of the snapshot
    #[serde(flatten)]
    pub counters: StatCounters,
}
