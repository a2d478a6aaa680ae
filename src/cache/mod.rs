//! Cache Module
//!
//! The cache store: an expiring in-memory map with absolute and sliding
//! expiration, eviction callbacks and an optional capacity bound, behind a
//! thread-safe create-if-absent provider.

mod entry;
mod memory;
mod options;
mod provider;
mod stats;


// Re-export public types
pub use entry::{CacheEntry, EntryHandle, PendingEviction, StoredValue};
pub use memory::{Inserted, MemoryCache};
pub use options::{
    CacheDefaults, EntryOptions, EvictedEntry, EvictionCallback, EvictionReason, ExpirationMode,
    DEFAULT_CACHE_DURATION,
};
pub use provider::{CacheProvider, CacheProviderExt, MemoryCacheProvider, ValueFactory};
pub use stats::{CacheStats, StatsRecorder};

pub(crate) use provider::StoreShared;
