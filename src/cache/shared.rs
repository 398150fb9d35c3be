use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use super::stats::{CacheStatistics, CacheStatsSnapshot};
use super::{CacheKey, CacheValue, Lookup, ReuseCache};
use crate::error::CacheResult;

/// A [`ReuseCache`] shared between threads.
///
/// Every operation takes one lock over the whole cache: entry map, queue,
/// size counter and spill table are only consistent together.
#[derive(Clone)]
pub struct SharedReuseCache {
    inner: Arc<Mutex<ReuseCache>>,
    stats: Arc<CacheStatistics>,
}

impl SharedReuseCache {
    pub fn new(cache: ReuseCache) -> Self {
        let stats = cache.statistics_handle();
        Self {
            inner: Arc::new(Mutex::new(cache)),
            stats,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ReuseCache> {
        self.inner.lock()
    }

    pub fn get(&self, key: &CacheKey) -> CacheResult<Lookup> {
        self.inner.lock().get(key)
    }

    pub fn put(
        &self,
        key: CacheKey,
        value: impl Into<CacheValue>,
        compute_time: Duration,
    ) -> CacheResult<u64> {
        self.inner.lock().put(key, value, compute_time)
    }

    pub fn insert_alias(
        &self,
        key: CacheKey,
        existing: &CacheKey,
        compute_time: Duration,
    ) -> CacheResult<()> {
        self.inner.lock().insert_alias(key, existing, compute_time)
    }

    pub fn make_space(&self, space_needed: u64) -> CacheResult<u64> {
        self.inner.lock().make_space(space_needed)
    }

    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    pub fn cache_size_bytes(&self) -> u64 {
        self.inner.lock().cache_size_bytes()
    }

    /// Reads the counters without taking the cache lock.
    pub fn statistics(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}
