use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::error::ConfigError;

/// Share of physical memory given to the cache when no limit is set.
const DEFAULT_MEMORY_FRACTION: f64 = 0.05;
const MIN_DEFAULT_LIMIT_BYTES: u64 = 64 * 1024 * 1024;

pub const ENV_LIMIT_MB: &str = "REUSECACHE_LIMIT_MB";
pub const ENV_SPILL: &str = "REUSECACHE_SPILL";
pub const ENV_POLICY: &str = "REUSECACHE_POLICY";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicyConfig {
    Lru,
    #[default]
    CostSize,
    Hybrid { cost_weight: f64, recency_weight: f64 },
}

impl EvictionPolicyConfig {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lru" => Some(EvictionPolicyConfig::Lru),
            "cost-size" | "costnsize" | "cost" => Some(EvictionPolicyConfig::CostSize),
            "hybrid" => Some(EvictionPolicyConfig::Hybrid {
                cost_weight: 1.0,
                recency_weight: 1.0,
            }),
            _ => None,
        }
    }
}

/// Initial disk throughput estimates in MB/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThroughputConfig {
    pub sparse_read_mbps: f64,
    pub dense_read_mbps: f64,
    pub sparse_write_mbps: f64,
    pub dense_write_mbps: f64,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self {
            sparse_read_mbps: 400.0,
            dense_read_mbps: 500.0,
            sparse_write_mbps: 225.0,
            dense_write_mbps: 450.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub cache_limit_bytes: u64,
    pub spill_enabled: bool,
    /// Spill estimates below this many milliseconds are not trusted.
    pub min_spill_time_estimate_ms: f64,
    /// Scalars at least this expensive to compute are pinned in memory.
    pub min_pin_compute_time_ms: f64,
    /// Transfers smaller than this do not update the throughput estimates.
    pub min_spill_data_mb: f64,
    pub policy: EvictionPolicyConfig,
    pub throughput: ThroughputConfig,
    pub scratch_root: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_limit_bytes: default_cache_limit(),
            spill_enabled: true,
            min_spill_time_estimate_ms: 10.0,
            min_pin_compute_time_ms: 10.0,
            min_spill_data_mb: 2.0,
            policy: EvictionPolicyConfig::default(),
            throughput: ThroughputConfig::default(),
            scratch_root: None,
        }
    }
}

impl CacheConfig {
    pub fn with_limit(cache_limit_bytes: u64) -> Self {
        Self {
            cache_limit_bytes,
            ..Self::default()
        }
    }

    /// Loads a config file, picking the format from its extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            #[cfg(feature = "toml-config")]
            Some("toml") => Self::from_toml_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = read_config(path)?;
        let config: Self = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = read_config(path)?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = env::var(ENV_LIMIT_MB) {
            let mb: f64 = value
                .trim()
                .parse()
                .ok()
                .filter(|mb: &f64| mb.is_finite() && *mb >= 0.0)
                .ok_or(ConfigError::InvalidEnv {
                    name: ENV_LIMIT_MB,
                    value: value.clone(),
                })?;
            self.cache_limit_bytes = (mb * 1024.0 * 1024.0) as u64;
        }
        if let Ok(value) = env::var(ENV_SPILL) {
            self.spill_enabled = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: ENV_SPILL,
                        value,
                    });
                }
            };
        }
        if let Ok(value) = env::var(ENV_POLICY) {
            self.policy = EvictionPolicyConfig::parse(&value).ok_or(ConfigError::InvalidEnv {
                name: ENV_POLICY,
                value: value.clone(),
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("min_spill_time_estimate_ms", self.min_spill_time_estimate_ms),
            ("min_pin_compute_time_ms", self.min_pin_compute_time_ms),
            ("min_spill_data_mb", self.min_spill_data_mb),
        ];
        for (field, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::OutOfRange {
                    field,
                    expected: "a finite non-negative number",
                    value,
                });
            }
        }
        let speeds = [
            ("throughput.sparse_read_mbps", self.throughput.sparse_read_mbps),
            ("throughput.dense_read_mbps", self.throughput.dense_read_mbps),
            ("throughput.sparse_write_mbps", self.throughput.sparse_write_mbps),
            ("throughput.dense_write_mbps", self.throughput.dense_write_mbps),
        ];
        for (field, value) in speeds {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::OutOfRange {
                    field,
                    expected: "a positive throughput",
                    value,
                });
            }
        }
        if let EvictionPolicyConfig::Hybrid {
            cost_weight,
            recency_weight,
        } = self.policy
        {
            for (field, value) in [
                ("policy.hybrid.cost_weight", cost_weight),
                ("policy.hybrid.recency_weight", recency_weight),
            ] {
                if !value.is_finite() {
                    return Err(ConfigError::OutOfRange {
                        field,
                        expected: "a finite weight",
                        value,
                    });
                }
            }
        }
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn default_cache_limit() -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory();
    ((total as f64 * DEFAULT_MEMORY_FRACTION) as u64).max(MIN_DEFAULT_LIMIT_BYTES)
}
