//! Cache Provider Module
//!
//! The thread-safe cache store: a `MemoryCache` behind a single
//! read/write lock with an atomic create-if-absent primitive.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, trace};

use crate::cache::entry::{EntryHandle, PendingEviction, StoredValue};
use crate::cache::memory::MemoryCache;
use crate::cache::options::{EntryOptions, EvictionReason};
use crate::cache::stats::CacheStats;
use crate::tasks::schedule_eviction;

/// Factory invoked by `get_or_create_value` to build a missing value.
pub type ValueFactory<'a> = Box<dyn FnOnce(&EntryHandle) -> StoredValue + 'a>;

// == Cache Provider ==
/// Thread-safe key/value store with create-if-absent.
///
/// Values are type-erased; the typed helpers live on [`CacheProviderExt`].
pub trait CacheProvider: Send + Sync {
    /// Returns the live value under `key`.
    fn get_value(&self, key: &str) -> Option<StoredValue>;

    /// Stores `value`, always overwriting. `None` means no expiration.
    fn set_value(&self, key: &str, value: StoredValue, policy: Option<&EntryOptions>);

    /// Returns the live value under `key`, or stores and returns the value
    /// built by `factory`. `factory` runs at most once, while the store's
    /// exclusive lock is held, so it must be cheap.
    fn get_or_create_value(
        &self,
        key: &str,
        factory: ValueFactory<'_>,
        policy: Option<&EntryOptions>,
    ) -> StoredValue {
        let (value, evicted) = self.get_or_create_value_deferred(key, factory, policy);
        notify_all(evicted);
        value
    }

    /// Like [`CacheProvider::get_or_create_value`], but returns the evictions
    /// caused by the insert instead of running their callbacks. The caller
    /// must `notify` them once it holds no lock a callback could need.
    fn get_or_create_value_deferred(
        &self,
        key: &str,
        factory: ValueFactory<'_>,
        policy: Option<&EntryOptions>,
    ) -> (StoredValue, Vec<PendingEviction>);

    /// Removes `key`. Absent keys are ignored.
    fn remove(&self, key: &str);

    /// Removes `key` only while it still holds exactly `expected`.
    fn remove_if_same(&self, key: &str, expected: &StoredValue) -> bool;

    /// Keys of all live entries.
    fn keys(&self) -> Vec<String>;

    /// Keys of live entries whose value passes `filter`.
    fn keys_where(&self, filter: &dyn Fn(&StoredValue) -> bool) -> Vec<String>;

    /// Sweeps expired entries, returning how many were removed.
    fn cleanup_expired(&self) -> usize;

    fn stats(&self) -> CacheStats;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// == Typed Helpers ==
/// Typed access on top of any [`CacheProvider`], including `dyn CacheProvider`.
pub trait CacheProviderExt: CacheProvider {
    /// Returns the value under `key` if it is a `T`.
    fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.get_value(key)?.downcast_ref::<T>().cloned()
    }

    fn set<T: Any + Send + Sync>(&self, key: &str, value: T, policy: Option<&EntryOptions>) {
        self.set_value(key, Arc::new(value), policy);
    }

    /// Typed create-if-absent. Returns None if the key already holds a
    /// value of another type.
    fn get_or_create<T, F>(&self, key: &str, factory: F, policy: Option<&EntryOptions>) -> Option<T>
    where
        T: Any + Send + Sync + Clone,
        F: FnOnce(&EntryHandle) -> T,
    {
        let stored = self.get_or_create_value(
            key,
            Box::new(move |handle: &EntryHandle| Arc::new(factory(handle)) as StoredValue),
            policy,
        );
        stored.downcast_ref::<T>().cloned()
    }

    /// Keys of live entries holding a `T`.
    fn keys_of<T: Any>(&self) -> Vec<String> {
        self.keys_where(&|value| value.is::<T>())
    }
}

impl<P: CacheProvider + ?Sized> CacheProviderExt for P {}

// == Memory Cache Provider ==
/// [`CacheProvider`] over a [`MemoryCache`].
///
/// Reads take the shared lock. `get_or_create_value` checks under an
/// upgradable read, upgrades to the exclusive lock only on a miss and checks
/// again before invoking the factory. Eviction callbacks run after the lock
/// is released.
#[derive(Clone)]
pub struct MemoryCacheProvider {
    shared: Arc<StoreShared>,
}

pub(crate) struct StoreShared {
    map: RwLock<MemoryCache>,
}

impl StoreShared {
    /// Evicts the entry under `key` if it is still entry `id`.
    pub(crate) fn expire_entry(&self, key: &str, id: u64) -> bool {
        let evicted = self
            .map
            .write()
            .remove_if(key, |entry| entry.id == id, EvictionReason::Expired);

        match evicted {
            Some(pending) => {
                pending.notify();
                true
            }
            None => false,
        }
    }
}

impl MemoryCacheProvider {
    // == Constructor ==
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self::bounded(None)
    }

    /// Creates a store that holds at most `max_entries` entries.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self::bounded(Some(max_entries))
    }

    /// Creates a store with an optional capacity bound.
    pub fn bounded(max_entries: Option<usize>) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                map: RwLock::new(MemoryCache::new(max_entries)),
            }),
        }
    }

    fn schedule_expiration(&self, key: &str, id: u64, handle: &EntryHandle) {
        if let Some(delay) = handle.update(|options| options.immediate_eviction_delay()) {
            if schedule_eviction(Arc::downgrade(&self.shared), key.to_string(), id, delay).is_none()
            {
                trace!(
                    "No runtime to schedule eviction of '{}', relying on lazy expiration",
                    key
                );
            }
        }
    }
}

impl Default for MemoryCacheProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCacheProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCacheProvider")
            .field("len", &self.len())
            .finish()
    }
}

impl CacheProvider for MemoryCacheProvider {
    fn get_value(&self, key: &str) -> Option<StoredValue> {
        self.shared.map.read().lookup(key, Utc::now())
    }

    fn set_value(&self, key: &str, value: StoredValue, policy: Option<&EntryOptions>) {
        let handle = EntryHandle::new(key, policy.cloned().unwrap_or_default());
        let inserted = self
            .shared
            .map
            .write()
            .insert(key, value, handle.clone(), Utc::now());

        self.schedule_expiration(key, inserted.id, &handle);
        notify_all(inserted.evicted);
    }

    fn get_or_create_value_deferred(
        &self,
        key: &str,
        factory: ValueFactory<'_>,
        policy: Option<&EntryOptions>,
    ) -> (StoredValue, Vec<PendingEviction>) {
        let guard = self.shared.map.upgradable_read();
        if let Some(value) = guard.lookup(key, Utc::now()) {
            return (value, Vec::new());
        }

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        let now = Utc::now();
        if let Some(entry) = guard.peek(key, now) {
            return (entry.value.clone(), Vec::new());
        }

        let handle = EntryHandle::new(key, policy.cloned().unwrap_or_default());
        let value = factory(&handle);
        let inserted = guard.insert(key, value.clone(), handle.clone(), now);
        drop(guard);

        debug!("Created entry '{}'", key);
        self.schedule_expiration(key, inserted.id, &handle);
        (value, inserted.evicted)
    }

    fn remove(&self, key: &str) {
        let evicted = self.shared.map.write().remove(key, EvictionReason::Removed);
        if let Some(pending) = evicted {
            trace!("Removed entry '{}'", key);
            pending.notify();
        }
    }

    fn remove_if_same(&self, key: &str, expected: &StoredValue) -> bool {
        let evicted = self.shared.map.write().remove_if(
            key,
            |entry| Arc::ptr_eq(&entry.value, expected),
            EvictionReason::Removed,
        );

        match evicted {
            Some(pending) => {
                pending.notify();
                true
            }
            None => false,
        }
    }

    fn keys(&self) -> Vec<String> {
        self.shared.map.read().keys(Utc::now())
    }

    fn keys_where(&self, filter: &dyn Fn(&StoredValue) -> bool) -> Vec<String> {
        self.shared.map.read().keys_where(Utc::now(), filter)
    }

    fn cleanup_expired(&self) -> usize {
        let evicted = self.shared.map.write().cleanup_expired(Utc::now());
        let count = evicted.len();
        notify_all(evicted);
        count
    }

    fn stats(&self) -> CacheStats {
        self.shared.map.read().stats()
    }

    fn len(&self) -> usize {
        self.shared.map.read().len()
    }
}

fn notify_all(evicted: Vec<PendingEviction>) {
    for pending in evicted {
        pending.notify();
    }
}
