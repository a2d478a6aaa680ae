//! Cache Entry Module
//!
//! Defines the structure for individual cache entries and the handle a value
//! factory uses to adjust its entry's policy.

use std::any::Any;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::cache::options::{
    EntryOptions, EvictedEntry, EvictionReason, ExpirationMode, PostEvictionCallback,
};

/// Type-erased value held by the store.
pub type StoredValue = Arc<dyn Any + Send + Sync>;

// == Entry Handle ==
/// Shared view of one entry's options.
///
/// The store keeps one clone and hands another to the value factory, so a
/// factory that runs after installation can still change its own
/// expiration or register eviction callbacks.
#[derive(Clone)]
pub struct EntryHandle {
    key: Arc<str>,
    options: Arc<Mutex<EntryOptions>>,
}

impl EntryHandle {
    pub(crate) fn new(key: &str, options: EntryOptions) -> Self {
        Self {
            key: Arc::from(key),
            options: Arc::new(Mutex::new(options)),
        }
    }

    /// Key of the entry being produced.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Snapshot of the current options.
    pub fn options(&self) -> EntryOptions {
        self.options.lock().clone()
    }

    /// Sets an absolute deadline with its enforcement mode.
    pub fn set_absolute_expiration(&self, deadline: DateTime<Utc>, mode: ExpirationMode) {
        self.options.lock().set_absolute_expiration(deadline, mode);
    }

    /// Sets a lifetime relative to the end of production.
    pub fn set_relative_expiration(&self, duration: Duration, mode: ExpirationMode) {
        self.options.lock().set_relative_expiration(duration, mode);
    }

    /// Sets the sliding window.
    pub fn set_sliding_expiration(&self, window: Duration) {
        self.options.lock().set_sliding_expiration(window);
    }

    /// Registers a callback fired after the entry is evicted.
    pub fn register_post_eviction_callback<F>(&self, callback: F)
    where
        F: Fn(&EvictedEntry) + Send + Sync + 'static,
    {
        self.options.lock().register_post_eviction_callback(callback);
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut EntryOptions) -> R) -> R {
        f(&mut self.options.lock())
    }
}

// == Cache Entry ==
/// A single stored value with its expiration metadata.
pub struct CacheEntry {
    /// Store-unique id, distinguishes an entry from a later one under the same key
    pub id: u64,
    /// The stored value
    pub value: StoredValue,
    /// Insertion timestamp
    pub created_at: DateTime<Utc>,
    handle: EntryHandle,
    /// Last read (Unix milliseconds), drives sliding expiration
    last_accessed_ms: AtomicI64,
    /// Logical access clock, drives capacity eviction
    recency: AtomicU64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry.
    ///
    /// # Arguments
    /// * `id` - Store-unique entry id
    /// * `value` - The value to store
    /// * `handle` - Options shared with the value factory
    /// * `now` - Insertion time
    /// * `tick` - Current value of the store's access clock
    pub fn new(
        id: u64,
        value: StoredValue,
        handle: EntryHandle,
        now: DateTime<Utc>,
        tick: u64,
    ) -> Self {
        Self {
            id,
            value,
            created_at: now,
            handle,
            last_accessed_ms: AtomicI64::new(now.timestamp_millis()),
            recency: AtomicU64::new(tick),
        }
    }

    pub fn key(&self) -> &str {
        self.handle.key()
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is expired once `now` is greater than or
    /// equal to its deadline, or once it has been idle for at least its
    /// sliding window.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let options = self.handle.options.lock();

        let past_deadline = options
            .effective_deadline(self.created_at)
            .is_some_and(|deadline| now >= deadline);

        let idle_too_long = options.sliding_expiration.is_some_and(|window| {
            let idle_ms = now.timestamp_millis() - self.last_accessed_ms.load(Ordering::Acquire);
            idle_ms >= i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
        });

        past_deadline || idle_too_long
    }

    // == Touch ==
    /// Records a read for sliding expiration and capacity ordering.
    pub fn touch(&self, now: DateTime<Utc>, tick: u64) {
        self.last_accessed_ms
            .store(now.timestamp_millis(), Ordering::Release);
        self.recency.store(tick, Ordering::Relaxed);
    }

    pub fn recency(&self) -> u64 {
        self.recency.load(Ordering::Relaxed)
    }

    /// Turns a removed entry into a notification for its callbacks.
    pub(crate) fn into_eviction(self, reason: EvictionReason) -> PendingEviction {
        let callbacks = self.handle.options.lock().callbacks().to_vec();
        PendingEviction {
            evicted: EvictedEntry {
                key: self.handle.key().to_string(),
                value: Some(self.value),
                reason,
            },
            callbacks,
        }
    }
}

// == Pending Eviction ==
/// An evicted entry whose callbacks have not yet run.
///
/// Produced while the store lock is held; `notify` must run after the lock
/// is released so callbacks may call back into the cache.
pub struct PendingEviction {
    evicted: EvictedEntry,
    callbacks: Vec<PostEvictionCallback>,
}

impl PendingEviction {
    pub fn key(&self) -> &str {
        &self.evicted.key
    }

    pub fn reason(&self) -> EvictionReason {
        self.evicted.reason
    }

    /// Runs every callback in registration order.
    pub fn notify(self) {
        for callback in &self.callbacks {
            callback.invoke(&self.evicted);
        }
    }
}
