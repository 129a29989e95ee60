//! Error types for cache operations.
//!
//! Absence of a key is never an error: every read operation reports it as
//! `Ok(None)` (or [`Lookup::Miss`](crate::Lookup::Miss)).

use std::fmt;

/// Errors that can occur while building or operating a cache.
///
/// The type is `Clone` because a single load failure is delivered to every
/// caller waiting on the same in-flight load.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The cache was assembled with an invalid or incomplete configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The remote store, the pool, or a connection failed.
    #[error("Store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the store failure.
        message: String,
    },

    /// A key or value could not be serialized.
    #[error("Encode error: {message}")]
    Encode {
        /// Description of the encoding failure.
        message: String,
    },

    /// Stored bytes could not be decoded with the configured value codec.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decoding failure.
        message: String,
    },

    /// The loader function failed for a key.
    #[error("Load failed for key {key}: {message}")]
    Load {
        /// Printable form of the key whose load failed.
        key: String,
        /// Description of the loader failure.
        message: String,
    },

    /// The escape hatch was asked for a pool type the cache was not built with.
    #[error("Type mismatch: cache pool is not a {expected}")]
    TypeMismatch {
        /// Name of the requested type.
        expected: &'static str,
    },
}

impl CacheError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `StoreUnavailable` error.
    #[must_use]
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Encode` error.
    #[must_use]
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates a new `Decode` error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a new `Load` error.
    #[must_use]
    pub fn load(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a new `TypeMismatch` error for the requested type.
    #[must_use]
    pub fn type_mismatch<T: ?Sized>() -> Self {
        Self::TypeMismatch {
            expected: std::any::type_name::<T>(),
        }
    }

    /// Returns `true` if this is a configuration error.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Returns `true` if this is a store failure.
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Returns `true` if this is a decode error.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Returns `true` if this is a loader failure.
    #[must_use]
    pub fn is_load(&self) -> bool {
        matches!(self, Self::Load { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } | Self::TypeMismatch { .. } => ErrorCategory::Configuration,
            Self::StoreUnavailable { .. } => ErrorCategory::Infrastructure,
            Self::Encode { .. } | Self::Decode { .. } => ErrorCategory::Codec,
            Self::Load { .. } => ErrorCategory::Loader,
        }
    }
}

/// Categories of cache errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Build-time or usage misconfiguration.
    Configuration,
    /// Store, pool or network failure.
    Infrastructure,
    /// Serialization failure in either direction.
    Codec,
    /// User-supplied loader failure.
    Loader,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Codec => write!(f, "codec"),
            Self::Loader => write!(f, "loader"),
        }
    }
}
