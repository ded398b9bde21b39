//! Engine configuration
//!
//! Defaults can be overridden from JSON or from the environment:
//!
//! - `BLOCKRASTER_CACHE_MAX`: cache budget in bytes, or with a `KB`/`MB`/`GB` suffix
//! - `BLOCKRASTER_USE_MMAP`: map local files read-only (`1`, `true`, `yes`)

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_CACHE_MAX: &str = "BLOCKRASTER_CACHE_MAX";
pub const ENV_USE_MMAP: &str = "BLOCKRASTER_USE_MMAP";

/// Default block cache budget (64 MiB)
pub const DEFAULT_CACHE_MAX: usize = 64 * 1024 * 1024;

/// Bytes read from the head of a source for format identification
pub const DEFAULT_PROBE_BYTES: usize = 1024;

/// Block cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Memory budget for resident block buffers, in bytes
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_CACHE_MAX,
        }
    }
}

/// Virtual file access settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Memory-map local files opened read-only
    pub use_mmap: bool,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub vfs: VfsConfig,
    pub probe_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            vfs: VfsConfig::default(),
            probe_bytes: DEFAULT_PROBE_BYTES,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with the environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parses a JSON document; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides looked up through `lookup` (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CACHE_MAX) {
            self.cache.max_bytes = parse_byte_size(&value)?;
        }

        if let Some(value) = lookup(ENV_USE_MMAP) {
            self.vfs.use_mmap = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.probe_bytes == 0 {
            return Err(Error::Config("probe_bytes must be positive".to_string()));
        }
        Ok(())
    }
}

/// Parses `"1048576"`, `"512KB"`, `"64MB"`, `"2GB"` (case-insensitive)
pub fn parse_byte_size(value: &str) -> Result<usize> {
    let trimmed = value.trim().to_ascii_uppercase();
    let (digits, multiplier) = if let Some(n) = trimmed.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = trimmed.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = trimmed.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = trimmed.strip_suffix('B') {
        (n, 1)
    } else {
        (trimmed.as_str(), 1)
    };

    let amount: usize = digits
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid byte size '{}'", value)))?;

    amount
        .checked_mul(multiplier)
        .ok_or_else(|| Error::Config(format!("byte size '{}' overflows", value)))
}
