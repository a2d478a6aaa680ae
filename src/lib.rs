//! Lazy Memory Cache - An in-process cache with single-flight value production
//!
//! Concurrent requests for the same missing key run the value factory once
//! and all callers share its result. Built on an expiring in-memory store
//! with absolute, relative and sliding expiration.

pub mod cache;
pub mod config;
pub mod error;
pub mod lazy;
pub mod service;
pub mod tasks;

pub use cache::{
    CacheDefaults, CacheProvider, CacheProviderExt, CacheStats, EntryHandle, EntryOptions,
    EvictedEntry, EvictionReason, ExpirationMode, MemoryCacheProvider,
};
pub use config::Config;
pub use error::{CacheError, Result};
pub use service::{LazyCache, RemoveMode};
pub use tasks::spawn_cleanup_task;
