//! Reuse cache for a data-parallel execution engine.
//!
//! Results of expensive computations are memoized under a [`CacheKey`] and
//! kept within a memory budget. When space runs out the cheapest entries are
//! either spilled to local scratch storage, to be reloaded on the next hit,
//! or deleted, depending on whether recomputing them costs more than a disk
//! round trip.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod utils;

pub use cache::{CacheKey, CacheValue, Lookup, ReuseCache, SharedReuseCache};
pub use config::{CacheConfig, EvictionPolicyConfig};
pub use error::{CacheError, CacheResult, ConfigError};
pub use reusecache_matrix::{MatrixBlock, ScalarValue};
