mod alias;
pub mod calibration;
pub mod entry;
pub mod eviction;
pub mod key;
pub mod manager;
pub mod path;
pub mod scratch;
pub mod shared;
pub mod space;
pub mod spill;
pub mod stats;

pub use calibration::{IoDirection, IoThroughput};
pub use entry::{CacheEntry, CacheValue, EntryStatus, GroupId};
pub use eviction::{
    CostSizeScorer, EvictionQueue, EvictionScorer, HybridScorer, LruScorer, scorer_for,
};
pub use key::CacheKey;
pub use manager::{Lookup, ReuseCache};
pub use scratch::{LocalScratch, ScratchStorage};
pub use shared::SharedReuseCache;
pub use space::{Disposal, DisposeOutcome};
pub use spill::SpillRecord;
pub use stats::{CacheStatistics, CacheStatsSnapshot};
