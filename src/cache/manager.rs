use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use tracing::{debug, info, warn};

use super::alias::AliasGroup;
use super::calibration::IoThroughput;
use super::entry::{CacheEntry, CacheValue, EntryStatus, GroupId};
use super::eviction::{EvictionQueue, EvictionScorer, scorer_for};
use super::path::scratch_root;
use super::scratch::{LocalScratch, ScratchStorage};
use super::spill::{SpillRecord, SpillTable};
use super::stats::{CacheStatistics, CacheStatsSnapshot};
use super::CacheKey;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};

/// Outcome of a cache probe.
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(CacheValue),
    /// The key is reserved by a computation that has not finished.
    Pending,
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn value(self) -> Option<CacheValue> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Pending | Lookup::Miss => None,
        }
    }
}

/// Cache state for one session: entries, eviction queue, alias groups,
/// spill records and the size counter.
///
/// Call [`ReuseCache::reset`] between independent runs.
pub struct ReuseCache {
    pub(super) config: CacheConfig,
    pub(super) entries: AHashMap<CacheKey, CacheEntry>,
    pub(super) groups: AHashMap<GroupId, AliasGroup>,
    pub(super) queue: EvictionQueue,
    pub(super) scorer: Box<dyn EvictionScorer>,
    pub(super) spills: SpillTable,
    pub(super) storage: Box<dyn ScratchStorage>,
    pub(super) throughput: IoThroughput,
    pub(super) stats: Arc<CacheStatistics>,
    pub(super) cache_size_bytes: u64,
    pub(super) cache_limit_bytes: u64,
    clock: u64,
    next_group: u64,
}

impl ReuseCache {
    pub fn new(config: CacheConfig) -> Self {
        let scorer = scorer_for(&config.policy);
        let storage = LocalScratch::new(scratch_root(config.scratch_root.as_deref()));
        Self::with_parts(config, scorer, Box::new(storage))
    }

    pub fn with_parts(
        config: CacheConfig,
        scorer: Box<dyn EvictionScorer>,
        storage: Box<dyn ScratchStorage>,
    ) -> Self {
        debug!(
            limit = config.cache_limit_bytes,
            policy = scorer.name(),
            spill = config.spill_enabled,
            "reuse cache initialised"
        );
        Self {
            throughput: IoThroughput::new(&config.throughput),
            cache_limit_bytes: config.cache_limit_bytes,
            config,
            entries: AHashMap::new(),
            groups: AHashMap::new(),
            queue: EvictionQueue::new(),
            scorer,
            spills: SpillTable::default(),
            storage,
            stats: CacheStatistics::new(),
            cache_size_bytes: 0,
            clock: 0,
            next_group: 0,
        }
    }

    /// Forgets every entry, queue slot, alias group and spill record, and
    /// zeroes the size counter. Throughput estimates are kept.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.groups.clear();
        self.queue.clear();
        self.spills.clear();
        if let Err(err) = self.storage.release() {
            warn!(error = %err, "failed to remove spill directory");
        }
        self.cache_size_bytes = 0;
        self.cache_limit_bytes = self.config.cache_limit_bytes;
        self.clock = 0;
        self.next_group = 0;
        self.stats.reset();
        info!("reuse cache reset");
    }

    /// Stores a finished entry, charging its footprint and admitting it for
    /// eviction. Does not make room; see [`ReuseCache::put`].
    pub fn insert(&mut self, mut entry: CacheEntry) -> CacheResult<()> {
        let key = entry.key().clone();
        if self.entries.contains_key(&key) {
            return Err(CacheError::DuplicateKey { key });
        }
        entry.set_group(None);
        if entry.value().is_some() {
            entry.set_charged_bytes(entry.size_bytes());
            self.cache_size_bytes += entry.size_bytes();
        }
        self.entries.insert(key.clone(), entry);
        self.admit(&key)
    }

    /// Makes room for `value` and stores it. Returns the bytes freed.
    pub fn put(
        &mut self,
        key: CacheKey,
        value: impl Into<CacheValue>,
        compute_time: Duration,
    ) -> CacheResult<u64> {
        if self.entries.contains_key(&key) {
            return Err(CacheError::DuplicateKey { key });
        }
        let entry = CacheEntry::new(key, value, compute_time);
        let freed = self.make_space(entry.size_bytes())?;
        self.insert(entry)?;
        Ok(freed)
    }

    pub fn insert_placeholder(&mut self, key: CacheKey) -> CacheResult<()> {
        self.insert(CacheEntry::placeholder(key))
    }

    /// Fills a placeholder with its computed value. Does not make room.
    pub fn complete_placeholder(
        &mut self,
        key: &CacheKey,
        value: impl Into<CacheValue>,
        compute_time: Duration,
    ) -> CacheResult<()> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| CacheError::MissingEntry { key: key.clone() })?;
        if !entry.is_placeholder() {
            return Err(CacheError::DuplicateKey { key: key.clone() });
        }
        entry.set_value(value.into(), Some(compute_time));
        entry.set_charged_bytes(entry.size_bytes());
        self.cache_size_bytes += entry.size_bytes();
        self.admit(key)
    }

    /// Records that `key` produced a value equal to the one cached under
    /// `existing`. Both end up in one alias group sharing a single copy.
    pub fn insert_alias(
        &mut self,
        key: CacheKey,
        existing: &CacheKey,
        compute_time: Duration,
    ) -> CacheResult<()> {
        if self.entries.contains_key(&key) {
            return Err(CacheError::DuplicateKey { key });
        }
        let source = self
            .entries
            .get(existing)
            .ok_or_else(|| CacheError::MissingEntry {
                key: existing.clone(),
            })?;
        let value = match source.value() {
            Some(value) if !source.status().is_marked() => value.clone(),
            _ => {
                return Err(CacheError::NotAliasable {
                    key: existing.clone(),
                });
            }
        };

        let group_id = match source.group() {
            Some(group_id) => group_id,
            None => {
                let group_id = GroupId(self.next_group);
                self.next_group += 1;
                self.groups
                    .insert(group_id, AliasGroup::new(existing.clone()));
                if let Some(source) = self.entries.get_mut(existing) {
                    source.set_group(Some(group_id));
                }
                group_id
            }
        };
        self.groups
            .get_mut(&group_id)
            .ok_or_else(|| CacheError::MissingGroup {
                key: existing.clone(),
            })?
            .add_member(key.clone());

        let mut entry = CacheEntry::new(key.clone(), value, compute_time);
        entry.set_group(Some(group_id));
        self.entries.insert(key.clone(), entry);
        debug!(%key, %existing, "aliased cache entry");
        self.admit(&key)
    }

    /// Probes the cache, reloading spilled values into memory.
    pub fn get(&mut self, key: &CacheKey) -> CacheResult<Lookup> {
        let Some(entry) = self.entries.get(key) else {
            self.stats.record_miss();
            return Ok(Lookup::Miss);
        };
        if entry.is_spilled() {
            let needed = self
                .spills
                .get(key)
                .map(|record| record.size_bytes)
                .ok_or_else(|| CacheError::MissingSpillRecord { key: key.clone() })?;
            self.make_space(needed)?;
            let entry = self.reload(key)?;
            return Ok(entry.value().cloned().map_or(Lookup::Miss, Lookup::Hit));
        }
        match entry.value().cloned() {
            Some(value) => {
                self.stats.record_mem_hit();
                self.on_access(key);
                Ok(Lookup::Hit(value))
            }
            None => Ok(Lookup::Pending),
        }
    }

    pub fn entry(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_queued(&self, key: &CacheKey) -> bool {
        self.queue.contains(key)
    }

    /// Queued keys from first to last eviction candidate.
    pub fn queued_keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.queue.keys()
    }

    pub fn cache_size_bytes(&self) -> u64 {
        self.cache_size_bytes
    }

    pub fn cache_limit_bytes(&self) -> u64 {
        self.cache_limit_bytes
    }

    pub fn set_cache_limit_bytes(&mut self, limit: u64) {
        self.cache_limit_bytes = limit;
    }

    pub fn is_below_threshold(&self, space_needed: u64) -> bool {
        space_needed.saturating_add(self.cache_size_bytes) <= self.cache_limit_bytes
    }

    pub fn is_spilled(&self, key: &CacheKey) -> bool {
        self.spills.contains(key)
    }

    pub fn spill_record(&self, key: &CacheKey) -> Option<&SpillRecord> {
        self.spills.get(key)
    }

    /// Sum of the footprints charged by entries holding a value; always
    /// equal to [`ReuseCache::cache_size_bytes`].
    pub fn accounted_bytes(&self) -> u64 {
        self.entries
            .values()
            .filter(|entry| entry.value().is_some())
            .map(CacheEntry::charged_bytes)
            .sum()
    }

    pub fn throughput(&self) -> &IoThroughput {
        &self.throughput
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    pub fn statistics(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn statistics_handle(&self) -> Arc<CacheStatistics> {
        Arc::clone(&self.stats)
    }

    pub(super) fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Members of the entry's alias group, or just the key itself.
    pub(super) fn group_members(&self, key: &CacheKey) -> CacheResult<(CacheKey, Vec<CacheKey>)> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| CacheError::MissingEntry { key: key.clone() })?;
        match entry.group() {
            None => Ok((key.clone(), vec![key.clone()])),
            Some(group_id) => {
                let group = self
                    .groups
                    .get(&group_id)
                    .ok_or_else(|| CacheError::MissingGroup { key: key.clone() })?;
                Ok((group.head().clone(), group.members().to_vec()))
            }
        }
    }

    pub(super) fn status_of(&self, key: &CacheKey) -> Option<EntryStatus> {
        self.entries.get(key).map(CacheEntry::status)
    }
}
