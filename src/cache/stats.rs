use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct CacheStatistics {
    mem_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    mem_deletes: AtomicU64,
    spill_writes: AtomicU64,
    write_nanos: AtomicU64,
    read_nanos: AtomicU64,
    costing_nanos: AtomicU64,
    pinned: AtomicU64,
    deferred: AtomicU64,
    rollbacks: AtomicU64,
    skipped: AtomicU64,
}

impl CacheStatistics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_mem_hit(&self) {
        self.mem_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.mem_deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spill_write(&self, elapsed: Duration) {
        self.spill_writes.fetch_add(1, Ordering::Relaxed);
        self.write_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_disk_hit(&self, elapsed: Duration) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
        self.read_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_costing(&self, elapsed: Duration) {
        self.costing_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_pin(&self) {
        self.pinned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.mem_hits,
            &self.disk_hits,
            &self.misses,
            &self.mem_deletes,
            &self.spill_writes,
            &self.write_nanos,
            &self.read_nanos,
            &self.costing_nanos,
            &self.pinned,
            &self.deferred,
            &self.rollbacks,
            &self.skipped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            mem_hits: self.mem_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            mem_deletes: self.mem_deletes.load(Ordering::Relaxed),
            spill_writes: self.spill_writes.load(Ordering::Relaxed),
            write_time_ms: millis(self.write_nanos.load(Ordering::Relaxed)),
            read_time_ms: millis(self.read_nanos.load(Ordering::Relaxed)),
            costing_time_ms: millis(self.costing_nanos.load(Ordering::Relaxed)),
            pinned: self.pinned.load(Ordering::Relaxed),
            deferred_disposals: self.deferred.load(Ordering::Relaxed),
            rolled_back_groups: self.rollbacks.load(Ordering::Relaxed),
            skipped_entries: self.skipped.load(Ordering::Relaxed),
        }
    }
}

fn nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

fn millis(nanos: u64) -> f64 {
    nanos as f64 / 1_000_000.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub mem_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub mem_deletes: u64,
    pub spill_writes: u64,
    pub write_time_ms: f64,
    pub read_time_ms: f64,
    pub costing_time_ms: f64,
    pub pinned: u64,
    pub deferred_disposals: u64,
    pub rolled_back_groups: u64,
    pub skipped_entries: u64,
}
