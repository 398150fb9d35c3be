use std::io;
use std::path::PathBuf;

use reusecache_matrix::MatrixError;
use thiserror::Error;

use crate::cache::{CacheKey, EntryStatus};

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("spilling scalar values to disk is not allowed (key {key})")]
    ScalarSpill { key: CacheKey },
    #[error("cannot spill an entry without an in-memory value (key {key})")]
    EmptySpill { key: CacheKey },
    #[error("spilled key {key} has no spill record")]
    MissingSpillRecord { key: CacheKey },
    #[error("key {key} is not present in the cache")]
    MissingEntry { key: CacheKey },
    #[error("key {key} is already cached")]
    DuplicateKey { key: CacheKey },
    #[error("key {key} is already in the eviction queue")]
    AlreadyQueued { key: CacheKey },
    #[error("key {key} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        key: CacheKey,
        from: EntryStatus,
        to: EntryStatus,
    },
    #[error("alias group of key {key} is not registered")]
    MissingGroup { key: CacheKey },
    #[error("key {key} holds no in-memory value to alias")]
    NotAliasable { key: CacheKey },
    #[error("{op} {} failed{}", path.display(), for_key(key))]
    Io {
        op: &'static str,
        key: Option<CacheKey>,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("spill file {} for key {key} is unreadable", path.display())]
    Codec {
        key: CacheKey,
        path: PathBuf,
        #[source]
        source: MatrixError,
    },
}

impl CacheError {
    pub(crate) fn io(
        op: &'static str,
        key: &CacheKey,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        CacheError::Io {
            op,
            key: Some(key.clone()),
            path: path.into(),
            source,
        }
    }

    /// Key the error refers to, when there is one.
    pub fn key(&self) -> Option<&CacheKey> {
        match self {
            CacheError::ScalarSpill { key }
            | CacheError::EmptySpill { key }
            | CacheError::MissingSpillRecord { key }
            | CacheError::MissingEntry { key }
            | CacheError::DuplicateKey { key }
            | CacheError::AlreadyQueued { key }
            | CacheError::InvalidTransition { key, .. }
            | CacheError::MissingGroup { key }
            | CacheError::NotAliasable { key }
            | CacheError::Codec { key, .. } => Some(key),
            CacheError::Io { key, .. } => key.as_ref(),
        }
    }
}

fn for_key(key: &Option<CacheKey>) -> String {
    key.as_ref()
        .map(|key| format!(" for key {key}"))
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse YAML config {}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[cfg(feature = "toml-config")]
    #[error("failed to parse TOML config {}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
}
