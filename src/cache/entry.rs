use std::sync::Arc;
use std::time::Duration;

use reusecache_matrix::{MatrixBlock, ScalarValue};
use serde::Serialize;

use crate::cache::CacheKey;
use crate::error::{CacheError, CacheResult};

/// In-memory payload of a cache entry. Aliased entries share one `Arc`.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Matrix(Arc<MatrixBlock>),
    Scalar(ScalarValue),
}

impl CacheValue {
    pub fn matrix(block: MatrixBlock) -> Self {
        CacheValue::Matrix(Arc::new(block))
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, CacheValue::Matrix(_))
    }

    pub fn as_matrix(&self) -> Option<&Arc<MatrixBlock>> {
        match self {
            CacheValue::Matrix(block) => Some(block),
            CacheValue::Scalar(_) => None,
        }
    }

    pub fn in_memory_size(&self) -> u64 {
        match self {
            CacheValue::Matrix(block) => block.in_memory_size(),
            CacheValue::Scalar(scalar) => scalar.in_memory_size(),
        }
    }
}

impl From<MatrixBlock> for CacheValue {
    fn from(block: MatrixBlock) -> Self {
        CacheValue::matrix(block)
    }
}

impl From<ScalarValue> for CacheValue {
    fn from(scalar: ScalarValue) -> Self {
        CacheValue::Scalar(scalar)
    }
}

/// Residency status of an entry.
///
/// Allowed transitions:
///
/// | from       | to                                   |
/// |------------|--------------------------------------|
/// | `Normal`   | `Pinned`, `ToSpill`, `ToDelete`      |
/// | `ToSpill`  | `Spilled`, `Normal` (rollback)       |
/// | `ToDelete` | `Spilled`, `Normal` (rollback)       |
/// | `Spilled`  | `Normal` (reload)                    |
///
/// `Pinned` is terminal. Deleted entries leave the cache instead of
/// taking a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryStatus {
    Normal,
    Pinned,
    Spilled,
    ToSpill,
    ToDelete,
}

impl EntryStatus {
    pub fn can_transition(self, to: EntryStatus) -> bool {
        use EntryStatus::*;
        matches!(
            (self, to),
            (Normal, Pinned | ToSpill | ToDelete)
                | (ToSpill | ToDelete, Spilled | Normal)
                | (Spilled, Normal)
        )
    }

    pub fn is_evictable(self) -> bool {
        self == EntryStatus::Normal
    }

    /// Marked for deferred disposal, waiting on the rest of its alias group.
    pub fn is_marked(self) -> bool {
        matches!(self, EntryStatus::ToSpill | EntryStatus::ToDelete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub(crate) u64);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: CacheKey,
    value: Option<CacheValue>,
    compute_time: Duration,
    size_bytes: u64,
    // Share of the cache size counter owned by this entry. Alias members
    // are charged nothing so a group's footprint is counted once.
    charged_bytes: u64,
    timestamp: u64,
    status: EntryStatus,
    group: Option<GroupId>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, value: impl Into<CacheValue>, compute_time: Duration) -> Self {
        let value = value.into();
        Self {
            key,
            size_bytes: value.in_memory_size(),
            value: Some(value),
            compute_time,
            charged_bytes: 0,
            timestamp: 0,
            status: EntryStatus::Normal,
            group: None,
        }
    }

    /// Entry reserved for a computation that has not produced a value yet.
    pub fn placeholder(key: CacheKey) -> Self {
        Self {
            key,
            value: None,
            compute_time: Duration::ZERO,
            size_bytes: 0,
            charged_bytes: 0,
            timestamp: 0,
            status: EntryStatus::Normal,
            group: None,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn value(&self) -> Option<&CacheValue> {
        self.value.as_ref()
    }

    pub fn compute_time(&self) -> Duration {
        self.compute_time
    }

    pub fn compute_time_ms(&self) -> f64 {
        self.compute_time.as_nanos() as f64 / 1_000_000.0
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    pub fn is_placeholder(&self) -> bool {
        self.value.is_none() && self.status == EntryStatus::Normal
    }

    pub fn is_spilled(&self) -> bool {
        self.status == EntryStatus::Spilled
    }

    pub fn is_matrix_value(&self) -> bool {
        self.value.as_ref().is_some_and(CacheValue::is_matrix)
    }

    pub fn is_scalar_value(&self) -> bool {
        matches!(self.value, Some(CacheValue::Scalar(_)))
    }

    pub fn matrix(&self) -> Option<&Arc<MatrixBlock>> {
        self.value.as_ref().and_then(CacheValue::as_matrix)
    }

    pub(crate) fn charged_bytes(&self) -> u64 {
        self.charged_bytes
    }

    pub(crate) fn set_charged_bytes(&mut self, bytes: u64) {
        self.charged_bytes = bytes;
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    pub(crate) fn set_group(&mut self, group: Option<GroupId>) {
        self.group = group;
    }

    pub(crate) fn set_value(&mut self, value: CacheValue, compute_time: Option<Duration>) {
        self.size_bytes = value.in_memory_size();
        self.value = Some(value);
        if let Some(compute_time) = compute_time {
            self.compute_time = compute_time;
        }
    }

    pub(crate) fn clear_value(&mut self) {
        self.value = None;
        self.size_bytes = 0;
        self.charged_bytes = 0;
    }

    pub(crate) fn transition(&mut self, to: EntryStatus) -> CacheResult<()> {
        if !self.status.can_transition(to) {
            return Err(CacheError::InvalidTransition {
                key: self.key.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
