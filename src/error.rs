//! Error types for the lazy cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// The type is `Clone` because a single failed production is reported to
/// every caller that was waiting on it.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Key is empty or consists only of whitespace
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Item rejected by `add` (the type's default value)
    #[error("Invalid item for key '{0}': default values cannot be cached")]
    InvalidItem(String),

    /// The value factory returned an error
    #[error("Value factory failed: {0}")]
    Factory(Arc<anyhow::Error>),

    /// The asynchronous production task was aborted or panicked
    #[error("Value production cancelled: {0}")]
    Cancelled(String),

    /// A factory read the entry it is producing
    #[error("Value factory re-entered its own entry")]
    Reentrant,

    /// A foreign value was still present after the evict-and-retry cycle
    #[error("Type mismatch for key '{0}'")]
    TypeMismatch(String),

    /// Invalid cache configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Wraps a factory error so it can be shared between waiters.
    pub fn factory(err: anyhow::Error) -> Self {
        CacheError::Factory(Arc::new(err))
    }

    /// Returns true if this error came out of value production.
    pub fn is_production_failure(&self) -> bool {
        matches!(self, CacheError::Factory(_) | CacheError::Cancelled(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
