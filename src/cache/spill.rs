use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use reusecache_matrix::MatrixError;
use tracing::{debug, info};

use super::calibration::IoDirection;
use super::entry::{CacheEntry, CacheValue, EntryStatus};
use super::manager::ReuseCache;
use super::path::spill_file;
use super::CacheKey;
use crate::error::{CacheError, CacheResult};

/// Where a spilled key's value lives on disk.
#[derive(Debug, Clone)]
pub struct SpillRecord {
    pub path: Arc<Path>,
    /// In-memory footprint the value will have once reloaded.
    pub size_bytes: u64,
}

/// Spill records for the current run and the lazily created directory
/// holding their files.
#[derive(Debug, Default)]
pub(crate) struct SpillTable {
    records: AHashMap<CacheKey, SpillRecord>,
    dir: Option<PathBuf>,
    files_created: u64,
}

impl SpillTable {
    pub(crate) fn get(&self, key: &CacheKey) -> Option<&SpillRecord> {
        self.records.get(key)
    }

    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.records.contains_key(key)
    }

    pub(crate) fn insert(&mut self, key: CacheKey, record: SpillRecord) {
        self.records.insert(key, record);
    }

    pub(crate) fn remove(&mut self, key: &CacheKey) -> Option<SpillRecord> {
        self.records.remove(key)
    }

    /// Fresh file for `key` inside `dir`. The sequence suffix keeps keys
    /// sharing an id apart.
    fn next_file(&mut self, dir: &Path, key: &CacheKey) -> PathBuf {
        self.files_created += 1;
        spill_file(dir, &format!("{}-{:06}", key.file_stem(), self.files_created))
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.dir = None;
    }
}

impl ReuseCache {
    /// Writes the entry's matrix to scratch storage and records the file for
    /// the entry and every alias of it. The in-memory value is left in place.
    pub(super) fn spill(&mut self, key: &CacheKey) -> CacheResult<Arc<Path>> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| CacheError::MissingEntry { key: key.clone() })?;
        let block = match entry.value() {
            None => return Err(CacheError::EmptySpill { key: key.clone() }),
            Some(CacheValue::Scalar(_)) => return Err(CacheError::ScalarSpill { key: key.clone() }),
            Some(CacheValue::Matrix(block)) => Arc::clone(block),
        };
        let size_bytes = entry.size_bytes();
        let (_, members) = self.group_members(key)?;

        let dir = self.spill_dir(key)?;
        let path = self.spills.next_file(&dir, key);
        let started = Instant::now();
        self.storage
            .write_matrix(&path, &block)
            .map_err(|source| match source {
                MatrixError::Io(err) => CacheError::io("write spill file", key, &path, err),
                source => CacheError::Codec {
                    key: key.clone(),
                    path: path.clone(),
                    source,
                },
            })?;
        let elapsed = started.elapsed();

        let path: Arc<Path> = Arc::from(path);
        for member in members {
            self.spills.insert(
                member,
                SpillRecord {
                    path: Arc::clone(&path),
                    size_bytes,
                },
            );
        }

        let size_mb = block.estimate_disk_size_mb();
        self.throughput.observe(
            IoDirection::Write,
            block.is_sparse(),
            size_mb,
            elapsed,
            self.config.min_spill_data_mb,
        );
        self.stats.record_spill_write(elapsed);
        debug!(%key, path = %path.display(), size_mb, ?elapsed, "spilled cache entry");
        Ok(path)
    }

    /// Restores a spilled value onto `key` and all of its aliases and deletes
    /// its spill file.
    pub fn reload(&mut self, key: &CacheKey) -> CacheResult<&CacheEntry> {
        let path = self
            .spills
            .get(key)
            .map(|record| Arc::clone(&record.path))
            .ok_or_else(|| CacheError::MissingSpillRecord { key: key.clone() })?;
        let (head, members) = self.group_members(key)?;

        let started = Instant::now();
        let block = self
            .storage
            .read_matrix(&path)
            .map_err(|source| match source {
                MatrixError::Io(err) => CacheError::io("read spill file", key, path.to_path_buf(), err),
                source => CacheError::Codec {
                    key: key.clone(),
                    path: path.to_path_buf(),
                    source,
                },
            })?;
        self.storage
            .delete(&path)
            .map_err(|err| CacheError::io("delete spill file", key, path.to_path_buf(), err))?;
        let elapsed = started.elapsed();

        let sparse = block.is_sparse();
        let size_mb = block.estimate_disk_size_mb();
        let value = CacheValue::matrix(block);
        let size_bytes = value.in_memory_size();
        for member in &members {
            let entry = self
                .entries
                .get_mut(member)
                .ok_or_else(|| CacheError::MissingEntry { key: member.clone() })?;
            entry.transition(EntryStatus::Normal)?;
            entry.set_value(value.clone(), None);
            entry.set_charged_bytes(if *member == head { size_bytes } else { 0 });
            self.spills.remove(member);
        }
        self.cache_size_bytes += size_bytes;
        for member in &members {
            self.admit(member)?;
        }

        self.throughput.observe(
            IoDirection::Read,
            sparse,
            size_mb,
            elapsed,
            self.config.min_spill_data_mb,
        );
        self.stats.record_disk_hit(elapsed);
        debug!(%key, aliases = members.len(), ?elapsed, "reloaded spilled entry");

        self.entries
            .get(key)
            .ok_or_else(|| CacheError::MissingEntry { key: key.clone() })
    }

    fn spill_dir(&mut self, key: &CacheKey) -> CacheResult<PathBuf> {
        if let Some(dir) = &self.spills.dir {
            return Ok(dir.clone());
        }
        let dir = self
            .storage
            .create_unique_dir()
            .map_err(|err| {
                CacheError::io("create spill directory in", key, self.storage.location(), err)
            })?;
        info!(dir = %dir.display(), "created spill directory");
        self.spills.dir = Some(dir.clone());
        Ok(dir)
    }
}
