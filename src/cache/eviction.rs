use std::cmp::Ordering;
use std::collections::BTreeMap;

use ahash::AHashMap;

use super::{CacheEntry, CacheKey};
use crate::config::EvictionPolicyConfig;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Orders eviction candidates. Entries with the lowest score leave first.
pub trait EvictionScorer: Send + Sync {
    fn score(&self, entry: &CacheEntry) -> f64;

    /// Whether accesses refresh an entry's position in the queue.
    fn is_recency_based(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Least recently used first.
#[derive(Debug, Default, Clone, Copy)]
pub struct LruScorer;

impl EvictionScorer for LruScorer {
    fn score(&self, entry: &CacheEntry) -> f64 {
        entry.timestamp() as f64
    }

    fn is_recency_based(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "lru"
    }
}

/// Cheapest recomputation per megabyte first.
#[derive(Debug, Default, Clone, Copy)]
pub struct CostSizeScorer;

impl EvictionScorer for CostSizeScorer {
    fn score(&self, entry: &CacheEntry) -> f64 {
        cost_per_mb(entry)
    }

    fn is_recency_based(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "cost-size"
    }
}

/// Weighted sum of cost per megabyte and recency.
#[derive(Debug, Clone, Copy)]
pub struct HybridScorer {
    pub cost_weight: f64,
    pub recency_weight: f64,
}

impl EvictionScorer for HybridScorer {
    fn score(&self, entry: &CacheEntry) -> f64 {
        self.cost_weight * cost_per_mb(entry) + self.recency_weight * entry.timestamp() as f64
    }

    fn is_recency_based(&self) -> bool {
        self.recency_weight != 0.0
    }

    fn name(&self) -> &'static str {
        "hybrid"
    }
}

fn cost_per_mb(entry: &CacheEntry) -> f64 {
    let size_mb = entry.size_bytes() as f64 / BYTES_PER_MB;
    if size_mb > 0.0 {
        entry.compute_time_ms() / size_mb
    } else {
        entry.compute_time_ms()
    }
}

pub fn scorer_for(policy: &EvictionPolicyConfig) -> Box<dyn EvictionScorer> {
    match *policy {
        EvictionPolicyConfig::Lru => Box::new(LruScorer),
        EvictionPolicyConfig::CostSize => Box::new(CostSizeScorer),
        EvictionPolicyConfig::Hybrid {
            cost_weight,
            recency_weight,
        } => Box::new(HybridScorer {
            cost_weight,
            recency_weight,
        }),
    }
}

#[derive(Debug, Clone, Copy)]
struct QueueSlot {
    score: f64,
    seq: u64,
}

impl PartialEq for QueueSlot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueSlot {}

impl PartialOrd for QueueSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Evictable keys ordered by the score they had when (re)inserted.
/// Ties go to the earlier insertion.
#[derive(Debug, Default)]
pub struct EvictionQueue {
    order: BTreeMap<QueueSlot, CacheKey>,
    slots: AHashMap<CacheKey, QueueSlot>,
    next_seq: u64,
}

impl EvictionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the key is already queued.
    pub fn insert(&mut self, key: CacheKey, score: f64) -> bool {
        if self.slots.contains_key(&key) {
            return false;
        }
        let slot = QueueSlot {
            score,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.order.insert(slot, key.clone());
        self.slots.insert(key, slot);
        true
    }

    pub fn remove(&mut self, key: &CacheKey) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                self.order.remove(&slot);
                true
            }
            None => false,
        }
    }

    pub fn pop_first(&mut self) -> Option<CacheKey> {
        let (_, key) = self.order.pop_first()?;
        self.slots.remove(&key);
        Some(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.slots.clear();
        self.next_seq = 0;
    }

    /// Queued keys from first to last eviction candidate.
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.order.values()
    }
}
