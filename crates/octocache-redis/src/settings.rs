use std::path::PathBuf;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use octocache_core::{CacheError, CacheResult, CacheSettings};
use serde::{Deserialize, Serialize};

/// Settings file read when no path is given.
pub const DEFAULT_SETTINGS_PATH: &str = "octocache.toml";

/// Prefix for environment overrides, e.g. `OCTOCACHE__POOL_SIZE=32` or
/// `OCTOCACHE__CACHE__KEY_PREFIX=tenant-a:`.
pub const ENV_PREFIX: &str = "OCTOCACHE";

/// Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Master URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size, per pool
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Wait, connect and recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Read replicas
    #[serde(default)]
    pub replicas: Vec<ReplicaSettings>,

    /// Cache behavior
    pub cache: CacheSettings,
}

/// A read replica endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaSettings {
    pub url: String,

    /// Relative share of reads
    /// Default: 1
    #[serde(default = "default_replica_weight")]
    pub weight: u32,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_replica_weight() -> u32 {
    1
}

impl RedisSettings {
    /// Settings for a single master at `url`.
    pub fn new(url: impl Into<String>, cache: CacheSettings) -> Self {
        Self {
            url: url.into(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            replicas: Vec::new(),
            cache,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_url("url", &self.url)?;
        if self.pool_size == 0 {
            return Err("pool_size must be > 0".into());
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be > 0".into());
        }
        for (i, replica) in self.replicas.iter().enumerate() {
            validate_url(&format!("replicas[{i}].url"), &replica.url)?;
            if replica.weight == 0 {
                return Err(format!("replicas[{i}].weight must be > 0"));
            }
        }
        self.cache.validate()
    }
}

fn validate_url(field: &str, url: &str) -> Result<(), String> {
    if url.is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
        return Err(format!("{field} must start with redis:// or rediss://"));
    }
    Ok(())
}

/// Load settings from a TOML file plus `OCTOCACHE__*` environment overrides.
///
/// A missing file is skipped, so environment variables alone can configure
/// the cache. Falls back to [`DEFAULT_SETTINGS_PATH`] when `path` is `None`.
pub fn load_settings(path: Option<&str>) -> CacheResult<RedisSettings> {
    let mut builder = Config::builder();
    let path = PathBuf::from(path.unwrap_or(DEFAULT_SETTINGS_PATH));
    if path.exists() {
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(env_overrides());
    build_settings(builder)
}

pub(crate) fn env_overrides() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .separator("__")
}

pub(crate) fn build_settings(builder: ConfigBuilder<DefaultState>) -> CacheResult<RedisSettings> {
    let cfg = builder
        .build()
        .map_err(|e| CacheError::configuration(format!("config build error: {e}")))?;
    let settings: RedisSettings = cfg
        .try_deserialize()
        .map_err(|e| CacheError::configuration(format!("config deserialize error: {e}")))?;
    settings.validate().map_err(CacheError::configuration)?;
    Ok(settings)
}
