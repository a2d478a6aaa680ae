//! Entry Options Module
//!
//! Expiration policy and eviction callbacks attached to a cache entry.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::StoredValue;

/// Default lifetime applied when no explicit policy is supplied.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(20 * 60);

// == Expiration Mode ==
/// How strictly an entry's deadline is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExpirationMode {
    /// Expired entries are dropped when next observed or swept
    #[default]
    LazyExpiration,
    /// A timer evicts the entry as soon as its delay elapses
    ImmediateEviction,
}

// == Eviction Reason ==
/// Why an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvictionReason {
    /// Explicit removal
    Removed,
    /// Overwritten by a newer value under the same key
    Replaced,
    /// Absolute deadline or sliding window elapsed
    Expired,
    /// Dropped to make room under a capacity bound
    Capacity,
}

// == Evicted Entry ==
/// Notification handed to post-eviction callbacks.
#[derive(Clone)]
pub struct EvictedEntry {
    /// Key of the evicted entry
    pub key: String,
    /// The value, or `None` when it was never produced
    pub value: Option<StoredValue>,
    /// Why the entry was evicted
    pub reason: EvictionReason,
}

impl EvictedEntry {
    /// Returns the evicted value if it holds a `T`.
    pub fn value<T: Any>(&self) -> Option<&T> {
        self.value.as_ref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for EvictedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictedEntry")
            .field("key", &self.key)
            .field("has_value", &self.value.is_some())
            .field("reason", &self.reason)
            .finish()
    }
}

/// Callback invoked after an entry has been evicted.
pub type EvictionCallback = Arc<dyn Fn(&EvictedEntry) + Send + Sync>;

/// A registered callback plus whether it already receives unwrapped values.
#[derive(Clone)]
pub(crate) struct PostEvictionCallback {
    callback: EvictionCallback,
    unwrapped: bool,
}

impl PostEvictionCallback {
    pub(crate) fn invoke(&self, evicted: &EvictedEntry) {
        (self.callback)(evicted);
    }
}

// == Entry Options ==
/// Expiration policy for a single entry.
///
/// An entry expires at the earliest of its absolute deadline and, when a
/// relative duration is set, the moment of insertion plus that duration.
/// A sliding window additionally expires the entry once it has gone
/// unread for the window's length.
#[derive(Clone, Default)]
pub struct EntryOptions {
    /// Fixed point in time after which the entry is expired
    pub absolute_expiration: Option<DateTime<Utc>>,
    /// Lifetime measured from insertion (folded into the deadline on insert)
    pub absolute_expiration_relative_to_now: Option<Duration>,
    /// Maximum idle time between reads
    pub sliding_expiration: Option<Duration>,
    /// How the deadline is enforced
    pub expiration_mode: ExpirationMode,
    /// Delay before a timer-driven eviction, used by `ImmediateEviction`
    pub immediate_expiration_delay: Option<Duration>,
    callbacks: Vec<PostEvictionCallback>,
}

impl EntryOptions {
    /// Creates options with no expiration at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that expire at `deadline` and are evicted by a timer.
    pub fn with_immediate_absolute_expiration(deadline: DateTime<Utc>) -> Self {
        let mut options = Self::new();
        options.set_absolute_expiration(deadline, ExpirationMode::ImmediateEviction);
        options
    }

    /// Options that expire `duration` after insertion and are evicted by a timer.
    pub fn with_immediate_relative_expiration(duration: Duration) -> Self {
        let mut options = Self::new();
        options.set_relative_expiration(duration, ExpirationMode::ImmediateEviction);
        options
    }

    // == Builders ==
    /// Expires the entry at a fixed point in time.
    pub fn with_absolute_expiration(mut self, deadline: DateTime<Utc>) -> Self {
        self.absolute_expiration = Some(deadline);
        self
    }

    /// Expires the entry a fixed duration after insertion.
    pub fn with_relative_expiration(mut self, duration: Duration) -> Self {
        self.absolute_expiration_relative_to_now = Some(duration);
        self
    }

    /// Expires the entry once it has not been read for `window`.
    pub fn with_sliding_expiration(mut self, window: Duration) -> Self {
        self.sliding_expiration = Some(window);
        self
    }

    /// Adds a post-eviction callback.
    pub fn with_post_eviction_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&EvictedEntry) + Send + Sync + 'static,
    {
        self.register_post_eviction_callback(callback);
        self
    }

    // == Setters ==
    /// Sets an absolute deadline together with its enforcement mode.
    ///
    /// With `ImmediateEviction` the delay until the deadline is recorded
    /// now, so the timer fires relative to when the policy was built.
    pub fn set_absolute_expiration(
        &mut self,
        deadline: DateTime<Utc>,
        mode: ExpirationMode,
    ) -> &mut Self {
        self.absolute_expiration = Some(deadline);
        self.expiration_mode = mode;
        self.immediate_expiration_delay = match mode {
            ExpirationMode::ImmediateEviction => {
                Some((deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            }
            ExpirationMode::LazyExpiration => None,
        };
        self
    }

    /// Sets a lifetime relative to insertion together with its enforcement mode.
    pub fn set_relative_expiration(&mut self, duration: Duration, mode: ExpirationMode) -> &mut Self {
        self.absolute_expiration_relative_to_now = Some(duration);
        self.expiration_mode = mode;
        self.immediate_expiration_delay = match mode {
            ExpirationMode::ImmediateEviction => Some(duration),
            ExpirationMode::LazyExpiration => None,
        };
        self
    }

    /// Sets the sliding window.
    pub fn set_sliding_expiration(&mut self, window: Duration) -> &mut Self {
        self.sliding_expiration = Some(window);
        self
    }

    /// Registers a callback fired after the entry is evicted.
    pub fn register_post_eviction_callback<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&EvictedEntry) + Send + Sync + 'static,
    {
        self.callbacks.push(PostEvictionCallback {
            callback: Arc::new(callback),
            unwrapped: false,
        });
        self
    }

    // == Deadlines ==
    /// Returns the deadline in force for an entry inserted at `inserted_at`.
    ///
    /// The earlier of the explicit deadline and `inserted_at + relative` wins.
    pub fn effective_deadline(&self, inserted_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let relative = self
            .absolute_expiration_relative_to_now
            .map(|duration| deadline_after(inserted_at, duration));

        match (self.absolute_expiration, relative) {
            (Some(absolute), Some(relative)) => Some(absolute.min(relative)),
            (absolute, relative) => absolute.or(relative),
        }
    }

    /// Folds a relative lifetime into the absolute deadline as of `now`.
    ///
    /// The deadline only ever moves earlier.
    pub(crate) fn normalize_relative_expiration(&mut self, now: DateTime<Utc>) {
        if self.absolute_expiration_relative_to_now.is_some() {
            self.absolute_expiration = self.effective_deadline(now);
            self.absolute_expiration_relative_to_now = None;
        }
    }

    /// Timer delay for `ImmediateEviction` entries.
    pub(crate) fn immediate_eviction_delay(&self) -> Option<Duration> {
        match self.expiration_mode {
            ExpirationMode::ImmediateEviction => self.immediate_expiration_delay,
            ExpirationMode::LazyExpiration => None,
        }
    }

    // == Callbacks ==
    /// Wraps every callback not yet wrapped, marking it as unwrapped.
    pub(crate) fn rewrap_callbacks<W>(&mut self, wrap: W)
    where
        W: Fn(EvictionCallback) -> EvictionCallback,
    {
        for registration in self.callbacks.iter_mut().filter(|r| !r.unwrapped) {
            registration.callback = wrap(Arc::clone(&registration.callback));
            registration.unwrapped = true;
        }
    }

    pub(crate) fn callbacks(&self) -> &[PostEvictionCallback] {
        &self.callbacks
    }
}

impl fmt::Debug for EntryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryOptions")
            .field("absolute_expiration", &self.absolute_expiration)
            .field(
                "absolute_expiration_relative_to_now",
                &self.absolute_expiration_relative_to_now,
            )
            .field("sliding_expiration", &self.sliding_expiration)
            .field("expiration_mode", &self.expiration_mode)
            .field("immediate_expiration_delay", &self.immediate_expiration_delay)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

// == Cache Defaults ==
/// Policy applied when a caller supplies none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDefaults {
    /// Lifetime of entries created without an explicit policy
    pub default_cache_duration: Duration,
}

impl CacheDefaults {
    pub fn new(default_cache_duration: Duration) -> Self {
        Self {
            default_cache_duration,
        }
    }

    /// Builds options expiring `default_cache_duration` after insertion.
    pub fn build_cache_options(&self) -> EntryOptions {
        EntryOptions::new().with_relative_expiration(self.default_cache_duration)
    }
}

impl Default for CacheDefaults {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DURATION)
    }
}

// == Utility Functions ==
/// `start + duration`, saturating at the latest representable instant.
pub(crate) fn deadline_after(start: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
