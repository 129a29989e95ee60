use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::{KeyConvertorKind, ValueCodecKind};
use crate::loading::LoadingConfig;
use crate::refresh::RefreshConfig;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Namespace prepended to every store key (e.g., "users:")
    #[serde(default)]
    pub key_prefix: String,

    /// Key convertor: "identity", "json" or "none".
    /// No default: a cache without a convertor fails to build, so the choice
    /// must be explicit.
    pub key_convertor: KeyConvertorKind,

    /// Value codec: "json" or "msgpack"
    /// Default: msgpack
    #[serde(default)]
    pub value_codec: ValueCodecKind,

    /// Default entry TTL in milliseconds; unset means no expiration
    #[serde(default)]
    pub expire_after_write_ms: Option<u64>,

    /// Route reads to replica pools by weight
    /// Default: false
    #[serde(default)]
    pub read_from_replica: bool,

    /// Cache "no value" loader results as absence markers
    /// Default: false
    #[serde(default)]
    pub cache_null_value: bool,

    /// Refresh-ahead configuration; unset disables background refresh
    #[serde(default)]
    pub refresh: Option<RefreshSettings>,
}

/// The default has no key convertor and fails `validate()`; set
/// `key_convertor` before use.
impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            key_convertor: KeyConvertorKind::None,
            value_codec: ValueCodecKind::default(),
            expire_after_write_ms: None,
            read_from_replica: false,
            cache_null_value: false,
            refresh: None,
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.key_convertor == KeyConvertorKind::None {
            return Err("cache.key_convertor must be set to 'identity' or 'json'".into());
        }
        if self.expire_after_write_ms == Some(0) {
            return Err("cache.expire_after_write_ms must be > 0".into());
        }
        if let Some(ref refresh) = self.refresh {
            refresh.validate()?;
        }
        Ok(())
    }

    pub fn expire_after_write(&self) -> Option<Duration> {
        self.expire_after_write_ms.map(Duration::from_millis)
    }

    /// Settings for a [`LoadingCache`](crate::LoadingCache) over this cache.
    pub fn loading_config(&self) -> LoadingConfig {
        LoadingConfig {
            ttl: self.expire_after_write(),
            cache_null_value: self.cache_null_value,
        }
    }

    /// Settings for a [`RefreshCache`](crate::RefreshCache), if refresh is enabled.
    pub fn refresh_config(&self) -> Option<RefreshConfig> {
        self.refresh.as_ref().map(|r| RefreshConfig {
            refresh_interval: Duration::from_millis(r.refresh_interval_ms),
            tick: Duration::from_millis(r.tick_ms),
            stop_refresh_after_last_access: r
                .stop_refresh_after_last_access_ms
                .map(Duration::from_millis),
            ttl: self.expire_after_write(),
            cache_null_value: self.cache_null_value,
        })
    }
}

/// Refresh-ahead configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSettings {
    /// Minimum time between two refreshes of the same key, in milliseconds
    pub refresh_interval_ms: u64,

    /// How often the scheduler checks for due keys, in milliseconds
    /// Default: 1000
    #[serde(default = "default_refresh_tick_ms")]
    pub tick_ms: u64,

    /// Stop refreshing a key that has not been read for this long, in milliseconds
    /// Default: unset (never stop)
    #[serde(default)]
    pub stop_refresh_after_last_access_ms: Option<u64>,
}

fn default_refresh_tick_ms() -> u64 {
    1000
}

impl RefreshSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.refresh_interval_ms == 0 {
            return Err("cache.refresh.refresh_interval_ms must be > 0".into());
        }
        if self.tick_ms == 0 {
            return Err("cache.refresh.tick_ms must be > 0".into());
        }
        if self.stop_refresh_after_last_access_ms == Some(0) {
            return Err("cache.refresh.stop_refresh_after_last_access_ms must be > 0".into());
        }
        Ok(())
    }
}
