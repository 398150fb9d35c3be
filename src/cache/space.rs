//! Admission, access tracking and the space manager.
//!
//! `make_space` pops the cheapest candidates from the eviction queue and
//! hands each to `dispose`, which either spills it to scratch storage or
//! deletes it. Aliased entries are disposed together once every alias has
//! been chosen.

use std::time::Instant;

use tracing::{debug, warn};

use super::entry::{CacheEntry, EntryStatus, GroupId};
use super::manager::ReuseCache;
use super::CacheKey;
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    Spill,
    Delete,
}

impl Disposal {
    fn marked_status(self) -> EntryStatus {
        match self {
            Disposal::Spill => EntryStatus::ToSpill,
            Disposal::Delete => EntryStatus::ToDelete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeOutcome {
    /// The value was spilled or deleted.
    Disposed,
    /// The entry was marked; other aliases of its value are still undecided.
    Deferred,
}

impl ReuseCache {
    /// Pins expensive scalars and queues everything else that holds a value.
    /// Placeholders and spilled entries are ignored.
    pub fn admit(&mut self, key: &CacheKey) -> CacheResult<()> {
        let timestamp = self.tick();
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| CacheError::MissingEntry { key: key.clone() })?;
        if entry.value().is_none() {
            return Ok(());
        }
        if entry.is_scalar_value()
            && entry.compute_time_ms() >= self.config.min_pin_compute_time_ms
        {
            entry.transition(EntryStatus::Pinned)?;
            self.stats.record_pin();
            debug!(%key, compute_ms = entry.compute_time_ms(), "pinned scalar entry");
            return Ok(());
        }
        entry.set_timestamp(timestamp);
        let score = self.scorer.score(entry);
        if !self.queue.insert(key.clone(), score) {
            return Err(CacheError::AlreadyQueued { key: key.clone() });
        }
        Ok(())
    }

    /// Refreshes the entry's recency when the scorer cares about it.
    pub fn on_access(&mut self, key: &CacheKey) {
        if !self.scorer.is_recency_based() || !self.queue.remove(key) {
            return;
        }
        let timestamp = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.set_timestamp(timestamp);
            let score = self.scorer.score(entry);
            self.queue.insert(key.clone(), score);
        }
    }

    /// Evicts queued entries until `space_needed` more bytes fit under the
    /// limit or nothing evictable is left. Returns the bytes freed.
    pub fn make_space(&mut self, space_needed: u64) -> CacheResult<u64> {
        let before = self.cache_size_bytes;
        let mut touched: Vec<GroupId> = Vec::new();

        while !self.is_below_threshold(space_needed) {
            let Some(key) = self.queue.pop_first() else {
                break;
            };
            let Some(entry) = self.entries.get(&key) else {
                warn!(%key, "queued key missing from cache, skipping");
                self.stats.record_skipped();
                continue;
            };
            if !entry.status().is_evictable() || entry.value().is_none() {
                warn!(%key, status = ?entry.status(), "non-evictable entry in eviction queue, skipping");
                self.stats.record_skipped();
                continue;
            }

            let disposal = if self.config.spill_enabled {
                self.choose_disposal(entry)
            } else {
                Disposal::Delete
            };
            if let Some(group) = entry.group() {
                touched.push(group);
            }
            if let Err(err) = self.dispose(&key, disposal) {
                self.rollback_undecided(touched)?;
                return Err(err);
            }
        }

        self.rollback_undecided(touched)?;
        let freed = before.saturating_sub(self.cache_size_bytes);
        debug!(
            space_needed,
            freed,
            size = self.cache_size_bytes,
            limit = self.cache_limit_bytes,
            "make_space finished"
        );
        Ok(freed)
    }

    /// Spill when reloading is expected to be cheaper than recomputing.
    /// Scalars are always deleted.
    fn choose_disposal(&self, entry: &CacheEntry) -> Disposal {
        let started = Instant::now();
        let disposal = match entry.matrix() {
            None => Disposal::Delete,
            Some(block) => {
                let compute_ms = entry.compute_time_ms();
                let spill_ms = self
                    .throughput
                    .round_trip_ms(block.estimate_disk_size_mb(), block.is_sparse());
                let floor = self.config.min_spill_time_estimate_ms;
                // Estimates under the floor are noise; compare against the floor.
                let spill = if spill_ms < floor {
                    compute_ms >= floor
                } else {
                    compute_ms > spill_ms
                };
                debug!(key = %entry.key(), compute_ms, spill_ms, spill, "costed eviction candidate");
                if spill {
                    Disposal::Spill
                } else {
                    Disposal::Delete
                }
            }
        };
        self.stats.record_costing(started.elapsed());
        disposal
    }

    /// Spills or deletes `key`. Aliased entries are only marked until every
    /// alias of the value has been disposed; the last one triggers a single
    /// spill (if any alias asked for it) or the removal of the whole group.
    pub fn dispose(&mut self, key: &CacheKey, disposal: Disposal) -> CacheResult<DisposeOutcome> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| CacheError::MissingEntry { key: key.clone() })?;
        if disposal == Disposal::Spill && !entry.is_matrix_value() {
            return Err(if entry.is_scalar_value() {
                CacheError::ScalarSpill { key: key.clone() }
            } else {
                CacheError::EmptySpill { key: key.clone() }
            });
        }
        entry.transition(disposal.marked_status())?;
        self.queue.remove(key);

        let Some(group_id) = entry.group() else {
            match disposal {
                Disposal::Spill => self.spill_members(key, &[key.clone()])?,
                Disposal::Delete => self.remove_entry(key),
            }
            return Ok(DisposeOutcome::Disposed);
        };

        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| CacheError::MissingGroup { key: key.clone() })?;
        if !group.mark(key, disposal == Disposal::Spill) {
            self.stats.record_deferred();
            debug!(%key, ?disposal, "deferred disposal of aliased entry");
            return Ok(DisposeOutcome::Deferred);
        }

        let head = group.head().clone();
        let members = group.members().to_vec();
        if group.wants_spill() {
            group.reset_votes();
            self.spill_members(&head, &members)?;
        } else {
            self.groups.remove(&group_id);
            for member in &members {
                self.remove_entry(member);
            }
        }
        Ok(DisposeOutcome::Disposed)
    }

    /// Writes the value once through `representative`, then drops it from
    /// every member and releases its footprint once. If the write fails the
    /// members are returned to `Normal` and queued again.
    fn spill_members(&mut self, representative: &CacheKey, members: &[CacheKey]) -> CacheResult<()> {
        if let Err(err) = self.spill(representative) {
            warn!(key = %representative, error = %err, "spill failed, keeping entry in memory");
            self.restore_marked(members)?;
            return Err(err);
        }
        let mut released = 0;
        for member in members {
            let entry = self
                .entries
                .get_mut(member)
                .ok_or_else(|| CacheError::MissingEntry { key: member.clone() })?;
            released += entry.charged_bytes();
            entry.clear_value();
            entry.transition(EntryStatus::Spilled)?;
        }
        self.release_bytes(released);
        Ok(())
    }

    fn remove_entry(&mut self, key: &CacheKey) {
        self.queue.remove(key);
        if let Some(entry) = self.entries.remove(key) {
            self.release_bytes(entry.charged_bytes());
            self.stats.record_delete();
        }
    }

    fn release_bytes(&mut self, bytes: u64) {
        debug_assert!(bytes <= self.cache_size_bytes, "cache size underflow");
        self.cache_size_bytes = self.cache_size_bytes.saturating_sub(bytes);
    }

    /// Returns marked members of groups left half-decided to `Normal` and
    /// queues them again, so no pass ends with a group partially disposed.
    fn rollback_undecided(&mut self, mut touched: Vec<GroupId>) -> CacheResult<()> {
        touched.sort_unstable();
        touched.dedup();
        for group_id in touched {
            let Some(group) = self.groups.get_mut(&group_id) else {
                continue;
            };
            if !group.is_partially_decided() {
                continue;
            }
            group.reset_votes();
            let members = group.members().to_vec();
            self.restore_marked(&members)?;
            self.stats.record_rollback();
            debug!(group = group_id.0, "rolled back partially disposed alias group");
        }
        Ok(())
    }

    /// Moves members marked for disposal back to `Normal` and queues them.
    fn restore_marked(&mut self, members: &[CacheKey]) -> CacheResult<()> {
        for member in members {
            let marked = self
                .status_of(member)
                .is_some_and(EntryStatus::is_marked);
            if !marked {
                continue;
            }
            if let Some(entry) = self.entries.get_mut(member) {
                entry.transition(EntryStatus::Normal)?;
            }
            self.admit(member)?;
        }
        Ok(())
    }
}
