//! Configuration Module
//!
//! Handles loading and validating cache configuration from environment variables.

use std::env;
use std::str::FromStr;

use crate::error::{CacheError, Result};

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Lifetime in seconds of entries cached without an explicit policy
    pub default_cache_duration: u64,
    /// Maximum number of entries the store can hold, None = unbounded
    pub max_entries: Option<usize>,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Number of key-lock stripes, None = sized from available parallelism
    pub key_locks: Option<usize>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DEFAULT_DURATION` - Default entry lifetime in seconds (default: 1200)
    /// - `CACHE_MAX_ENTRIES` - Maximum entries, 0 for unbounded (default: unbounded)
    /// - `CACHE_CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 60)
    /// - `CACHE_KEY_LOCKS` - Key-lock stripes (default: max(cpus * 8, 32))
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_cache_duration: env_var("CACHE_DEFAULT_DURATION")
                .unwrap_or(defaults.default_cache_duration),
            max_entries: env_var("CACHE_MAX_ENTRIES").filter(|max| *max > 0),
            cleanup_interval: env_var("CACHE_CLEANUP_INTERVAL")
                .unwrap_or(defaults.cleanup_interval),
            key_locks: env_var("CACHE_KEY_LOCKS"),
        }
    }

    /// Checks that every duration and count is usable.
    ///
    /// # Returns
    /// - `Ok(())` if the configuration is valid
    /// - `Err(CacheError::Configuration)` naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.default_cache_duration == 0 {
            return Err(CacheError::Configuration(
                "default_cache_duration must be greater than zero".to_string(),
            ));
        }
        if self.cleanup_interval == 0 {
            return Err(CacheError::Configuration(
                "cleanup_interval must be greater than zero".to_string(),
            ));
        }
        if self.key_locks == Some(0) {
            return Err(CacheError::Configuration(
                "key_locks must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_cache_duration: 1200,
            max_entries: None,
            cleanup_interval: 60,
            key_locks: None,
        }
    }
}

fn env_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
