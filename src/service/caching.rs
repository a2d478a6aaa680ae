//! Lazy Cache Service
//!
//! Single-flight `get_or_add` on top of a [`CacheProvider`]: on a miss the
//! factory is wrapped in a deferred container, the container is installed
//! under a striped key lock, and every caller resolves that one container.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{
    CacheDefaults, CacheProvider, CacheStats, EntryHandle, EntryOptions, MemoryCacheProvider,
    StoredValue,
};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::lazy::{unwrapping_callback, AsyncLazy, CacheValue, Lazy, Slot};
use crate::service::{KeyLocks, RemoveMode};

// == Lazy Cache ==
/// Cache coordinator with single-flight value production.
///
/// Concurrent `get_or_add` calls for the same missing key run the factory
/// once and all return its value, or all return its error. Failed entries
/// are evicted so the next call retries.
pub struct LazyCache {
    provider: Arc<dyn CacheProvider>,
    locks: KeyLocks,
    defaults: CacheDefaults,
}

impl LazyCache {
    // == Constructor ==
    /// Creates a cache over a new unbounded [`MemoryCacheProvider`].
    pub fn new() -> Self {
        Self::with_provider(Arc::new(MemoryCacheProvider::new()))
    }

    /// Creates a cache over an existing store.
    pub fn with_provider(provider: Arc<dyn CacheProvider>) -> Self {
        Self {
            provider,
            locks: KeyLocks::new(),
            defaults: CacheDefaults::default(),
        }
    }

    /// Creates a cache over an existing store with `stripes` key locks.
    pub fn with_provider_and_locks(provider: Arc<dyn CacheProvider>, stripes: usize) -> Self {
        Self {
            provider,
            locks: KeyLocks::with_stripes(stripes),
            defaults: CacheDefaults::default(),
        }
    }

    /// Creates a cache from validated configuration.
    ///
    /// # Returns
    /// - `Ok(LazyCache)` with a store bounded by `max_entries`
    /// - `Err(CacheError::Configuration)` if the configuration is invalid
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let provider = Arc::new(MemoryCacheProvider::bounded(config.max_entries));
        let locks = config
            .key_locks
            .map_or_else(KeyLocks::new, KeyLocks::with_stripes);

        Ok(Self {
            provider,
            locks,
            defaults: CacheDefaults::new(Duration::from_secs(config.default_cache_duration)),
        })
    }

    /// Replaces the policy used when callers supply none.
    pub fn with_defaults(mut self, defaults: CacheDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn provider(&self) -> &Arc<dyn CacheProvider> {
        &self.provider
    }

    pub fn defaults(&self) -> CacheDefaults {
        self.defaults
    }

    // == Add ==
    /// Stores `item` under `key`, replacing any previous value.
    ///
    /// # Arguments
    /// * `key` - Non-blank cache key
    /// * `item` - Value to store, must differ from `T::default()`
    /// * `policy` - Expiration policy, or None for the default duration
    pub fn add<T>(&self, key: &str, item: T, policy: Option<&EntryOptions>) -> Result<()>
    where
        T: CacheValue + Default + PartialEq,
    {
        validate_key(key)?;
        if item == T::default() {
            return Err(CacheError::InvalidItem(key.to_string()));
        }

        let policy = self.prepare_policy::<T>(policy);
        self.provider
            .set_value(key, Arc::new(Slot::Ready(item)), Some(&policy));
        Ok(())
    }

    // == Get ==
    /// Returns the value under `key`, producing it if it is still deferred.
    ///
    /// A value installed by `get_or_add_async` and still in flight is waited
    /// for with a blocking call, see [`AsyncLazy::resolve_blocking`].
    ///
    /// # Returns
    /// - `Ok(Some(value))` if a `T` is cached under `key`
    /// - `Ok(None)` if nothing, or a value of another type, is cached
    /// - `Err(_)` if production failed; the entry is evicted
    pub fn get<T: CacheValue>(&self, key: &str) -> Result<Option<T>> {
        validate_key(key)?;
        let Some(stored) = self.provider.get_value(key) else {
            return Ok(None);
        };
        let Some(slot) = stored.downcast_ref::<Slot<T>>() else {
            return Ok(None);
        };

        match slot.resolve() {
            Ok(value) => Ok(Some(value)),
            Err(err) => Err(self.evict_failed(key, &stored, err)),
        }
    }

    /// Async variant of [`LazyCache::get`].
    pub async fn get_async<T: CacheValue>(&self, key: &str) -> Result<Option<T>> {
        validate_key(key)?;
        let Some(stored) = self.provider.get_value(key) else {
            return Ok(None);
        };
        let resolving = match stored.downcast_ref::<Slot<T>>() {
            Some(slot) => slot.resolve_async(),
            None => return Ok(None),
        };

        match resolving.await {
            Ok(value) => Ok(Some(value)),
            Err(err) => Err(self.evict_failed(key, &stored, err)),
        }
    }

    /// Returns the value under `key` only if it is already produced.
    pub fn try_get<T: CacheValue>(&self, key: &str) -> Result<Option<T>> {
        validate_key(key)?;
        Ok(self
            .provider
            .get_value(key)
            .and_then(|stored| stored.downcast_ref::<Slot<T>>()?.peek())
            .and_then(|outcome| outcome.ok()))
    }

    // == Get Or Add ==
    /// Returns the cached value, or produces it with `factory` using the
    /// default policy.
    ///
    /// `factory` receives the entry's handle and may change its expiration
    /// or register eviction callbacks. Blocks if another caller's async
    /// production for the same key is in flight.
    ///
    /// `factory` must not read its own key: such a call returns
    /// `CacheError::Reentrant` instead of the value. Other keys are fine.
    pub fn get_or_add<T, F>(&self, key: &str, factory: F) -> Result<T>
    where
        T: CacheValue,
        F: FnOnce(&EntryHandle) -> anyhow::Result<T> + Send + 'static,
    {
        self.get_or_add_inner(key, factory, None)
    }

    /// Like [`LazyCache::get_or_add`] with an explicit policy.
    pub fn get_or_add_with_policy<T, F>(
        &self,
        key: &str,
        factory: F,
        policy: &EntryOptions,
    ) -> Result<T>
    where
        T: CacheValue,
        F: FnOnce(&EntryHandle) -> anyhow::Result<T> + Send + 'static,
    {
        self.get_or_add_inner(key, factory, Some(policy))
    }

    fn get_or_add_inner<T, F>(&self, key: &str, factory: F, policy: Option<&EntryOptions>) -> Result<T>
    where
        T: CacheValue,
        F: FnOnce(&EntryHandle) -> anyhow::Result<T> + Send + 'static,
    {
        validate_key(key)?;
        let policy = self.prepare_policy::<T>(policy);

        let mut factory = Some(factory);
        let stored = self.install(key, &policy, |handle| match factory.take() {
            Some(factory) => Slot::deferred(handle, factory),
            None => Slot::Deferred(Arc::new(consumed_lazy())),
        })?;

        let slot = stored
            .downcast_ref::<Slot<T>>()
            .ok_or_else(|| CacheError::TypeMismatch(key.to_string()))?;

        slot.resolve()
            .map_err(|err| self.evict_failed(key, &stored, err))
    }

    /// Async single-flight `get_or_add` using the default policy.
    ///
    /// The factory receives an owned handle to its entry. Inside a
    /// multi-threaded runtime production runs as a separate task and
    /// finishes even if this future is dropped. The factory must not await
    /// its own key; that future would wait on itself and never complete.
    pub async fn get_or_add_async<T, F, Fut>(&self, key: &str, factory: F) -> Result<T>
    where
        T: CacheValue,
        F: FnOnce(EntryHandle) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.get_or_add_async_inner(key, factory, None).await
    }

    /// Like [`LazyCache::get_or_add_async`] with an explicit policy.
    pub async fn get_or_add_async_with_policy<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        policy: &EntryOptions,
    ) -> Result<T>
    where
        T: CacheValue,
        F: FnOnce(EntryHandle) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.get_or_add_async_inner(key, factory, Some(policy)).await
    }

    async fn get_or_add_async_inner<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        policy: Option<&EntryOptions>,
    ) -> Result<T>
    where
        T: CacheValue,
        F: FnOnce(EntryHandle) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        validate_key(key)?;
        let policy = self.prepare_policy::<T>(policy);

        let stored = {
            let mut factory = Some(factory);
            self.install(key, &policy, |handle| match factory.take() {
                Some(factory) => Slot::pending(handle, factory),
                None => Slot::Pending(Arc::new(consumed_async_lazy())),
            })?
        };

        let resolving = {
            let slot = stored
                .downcast_ref::<Slot<T>>()
                .ok_or_else(|| CacheError::TypeMismatch(key.to_string()))?;
            if slot.has_faulted() {
                debug!("Evicting faulted entry '{}' before awaiting it", key);
                self.provider.remove_if_same(key, &stored);
            }
            slot.resolve_async()
        };

        resolving
            .await
            .map_err(|err| self.evict_failed(key, &stored, err))
    }

    // == Install ==
    /// Installs a slot built by `make` unless `key` already holds one.
    ///
    /// A value of another type is evicted and the install retried once.
    /// Callbacks of entries displaced by the install run after the stripe
    /// is released.
    fn install<T, M>(&self, key: &str, policy: &EntryOptions, mut make: M) -> Result<StoredValue>
    where
        T: CacheValue,
        M: FnMut(&EntryHandle) -> Slot<T>,
    {
        for attempt in 0..2 {
            let (stored, evicted) = {
                let _stripe = self.locks.lock(key);
                self.provider.get_or_create_value_deferred(
                    key,
                    Box::new(|handle: &EntryHandle| Arc::new(make(handle)) as StoredValue),
                    Some(policy),
                )
            };
            for pending in evicted {
                pending.notify();
            }

            if stored.is::<Slot<T>>() {
                return Ok(stored);
            }

            if attempt == 0 {
                debug!(
                    "Key '{}' holds a value of another type, replacing it",
                    key
                );
                self.provider.remove_if_same(key, &stored);
            }
        }

        warn!("Key '{}' still holds a value of another type", key);
        Err(CacheError::TypeMismatch(key.to_string()))
    }

    fn prepare_policy<T: CacheValue>(&self, policy: Option<&EntryOptions>) -> EntryOptions {
        let mut policy = policy
            .cloned()
            .unwrap_or_else(|| self.defaults.build_cache_options());
        policy.rewrap_callbacks(unwrapping_callback::<T>);
        policy
    }

    fn evict_failed(&self, key: &str, stored: &StoredValue, err: CacheError) -> CacheError {
        if matches!(err, CacheError::Reentrant) {
            return err;
        }
        if self.provider.remove_if_same(key, stored) {
            warn!("Production for '{}' failed, entry evicted: {}", key, err);
        }
        err
    }

    // == Remove ==
    /// Removes `key`. Absent keys are ignored.
    pub fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.provider.remove(key);
        Ok(())
    }

    /// Removes every key matching `pattern` under `mode`.
    ///
    /// # Returns
    /// The number of entries removed.
    pub fn remove_matching(&self, pattern: &str, mode: RemoveMode) -> Result<usize> {
        validate_key(pattern)?;
        Ok(self.remove_keys(|candidate| mode.matches(candidate, pattern)))
    }

    /// Removes every key for which `predicate` holds.
    ///
    /// `key` is validated like every other entry point but does not take
    /// part in matching.
    pub fn remove_where<P>(&self, key: &str, predicate: P) -> Result<usize>
    where
        P: Fn(&str) -> bool,
    {
        validate_key(key)?;
        Ok(self.remove_keys(predicate))
    }

    fn remove_keys<P: Fn(&str) -> bool>(&self, predicate: P) -> usize {
        let matched: Vec<String> = self
            .provider
            .keys()
            .into_iter()
            .filter(|candidate| predicate(candidate))
            .collect();

        for key in &matched {
            self.provider.remove(key);
        }

        debug!("Removed {} matching entries", matched.len());
        matched.len()
    }

    // == Keys ==
    /// Keys of all live entries.
    pub fn keys(&self) -> Vec<String> {
        self.provider.keys()
    }

    /// Keys of live entries holding a `T`, produced or not.
    pub fn keys_of<T: CacheValue>(&self) -> Vec<String> {
        self.provider.keys_where(&|stored| stored.is::<Slot<T>>())
    }

    pub fn stats(&self) -> CacheStats {
        self.provider.stats()
    }
}

impl Default for LazyCache {
    fn default() -> Self {
        Self::new()
    }
}

// == Utility Functions ==
fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(CacheError::InvalidKey(
            "key must not be empty or whitespace".to_string(),
        ));
    }
    Ok(())
}

fn consumed_lazy<T: CacheValue>() -> Lazy<T> {
    Lazy::new(|| Err(anyhow::anyhow!("factory already consumed")))
}

fn consumed_async_lazy<T: CacheValue>() -> AsyncLazy<T> {
    AsyncLazy::new(|| async { Err(anyhow::anyhow!("factory already consumed")) })
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheProviderExt, EvictionReason};
    use chrono::{TimeDelta, Utc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Arc::clone(&calls), calls)
    }

    #[test]
    fn test_blank_keys_rejected() {
        let cache = LazyCache::new();

        for key in ["", "   ", "\t\n"] {
            assert!(matches!(
                cache.get_or_add(key, |_| Ok(1)),
                Err(CacheError::InvalidKey(_))
            ));
            assert!(matches!(cache.get::<i32>(key), Err(CacheError::InvalidKey(_))));
            assert!(matches!(cache.remove(key), Err(CacheError::InvalidKey(_))));
            assert!(matches!(
                cache.remove_matching(key, RemoveMode::Contains),
                Err(CacheError::InvalidKey(_))
            ));
        }
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn test_add_rejects_default_value() {
        let cache = LazyCache::new();

        assert!(matches!(
            cache.add("zero", 0i32, None),
            Err(CacheError::InvalidItem(_))
        ));
        assert!(matches!(
            cache.add("empty", String::new(), None),
            Err(CacheError::InvalidItem(_))
        ));
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn test_add_then_try_get_round_trip() {
        let cache = LazyCache::new();

        cache.add("key", "value".to_string(), None).unwrap();
        assert_eq!(cache.try_get::<String>("key").unwrap().as_deref(), Some("value"));

        cache.remove("key").unwrap();
        assert_eq!(cache.try_get::<String>("key").unwrap(), None);
    }

    #[test]
    fn test_get_or_add_runs_factory_once() {
        let cache = LazyCache::new();
        let (calls, seen) = counter();

        let first = cache
            .get_or_add("key", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(10)
            })
            .unwrap();
        let second = cache.get_or_add("key", |_| Ok(20)).unwrap();

        assert_eq!((first, second), (10, 10));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_or_add_single_flight_across_threads() {
        let cache = Arc::new(LazyCache::new());
        let (calls, seen) = counter();
        let barrier = Arc::new(Barrier::new(12));

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_add("shared", move |_| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(30));
                            Ok(format!("value-{i}"))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &results[0]));
    }

    #[test]
    fn test_try_get_never_forces_production() {
        let cache = LazyCache::new();
        let (calls, seen) = counter();
        let handle = EntryHandle::new("key", EntryOptions::new());
        let slot = Slot::deferred(&handle, move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });
        cache.provider().set_value("key", Arc::new(slot), None);

        assert_eq!(cache.try_get::<i32>("key").unwrap(), None);
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        assert_eq!(cache.get::<i32>("key").unwrap(), Some(1));
        assert_eq!(cache.try_get::<i32>("key").unwrap(), Some(1));
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache = LazyCache::new();

        let failed = cache.get_or_add::<i32, _>("key", |_| Err(anyhow::anyhow!("db down")));
        assert!(matches!(failed, Err(CacheError::Factory(_))));
        assert!(cache.keys().is_empty(), "failed entry must be evicted");

        assert_eq!(cache.get_or_add("key", |_| Ok(5)).unwrap(), 5);
    }

    #[test]
    fn test_type_mismatch_self_heals() {
        let cache = LazyCache::new();
        cache.add("key", "x".to_string(), None).unwrap();

        let value = cache.get_or_add("key", |_| Ok(7i32)).unwrap();

        assert_eq!(value, 7);
        assert_eq!(cache.get::<String>("key").unwrap(), None);
        assert_eq!(cache.get::<i32>("key").unwrap(), Some(7));
    }

    #[test]
    fn test_type_mismatch_replaces_foreign_provider_value() {
        let cache = LazyCache::new();
        cache.provider().set("key", 3.5f64, None);

        assert_eq!(cache.get_or_add("key", |_| Ok(1u8)).unwrap(), 1);
        assert_eq!(cache.keys_of::<u8>(), vec!["key".to_string()]);
    }

    #[test]
    fn test_factory_can_adjust_expiration() {
        let cache = LazyCache::new();

        cache
            .get_or_add("short", |handle| {
                handle.set_absolute_expiration(
                    Utc::now() - TimeDelta::seconds(1),
                    Default::default(),
                );
                Ok(1)
            })
            .unwrap();

        assert_eq!(cache.get::<i32>("short").unwrap(), None);
    }

    #[test]
    fn test_policy_relative_and_absolute_take_earliest() {
        let cache = LazyCache::new();
        let policy = EntryOptions::new()
            .with_absolute_expiration(Utc::now() + TimeDelta::hours(1))
            .with_relative_expiration(Duration::from_millis(40));

        cache.get_or_add_with_policy("key", |_| Ok(1), &policy).unwrap();
        assert_eq!(cache.get::<i32>("key").unwrap(), Some(1));

        thread::sleep(Duration::from_millis(70));
        assert_eq!(cache.get::<i32>("key").unwrap(), None);
    }

    #[test]
    fn test_eviction_callback_sees_unwrapped_value() {
        let cache = LazyCache::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let policy = EntryOptions::new().with_post_eviction_callback(move |evicted| {
            sink.lock()
                .push((evicted.value::<String>().cloned(), evicted.reason));
        });

        cache
            .get_or_add_with_policy("key", |_| Ok("produced".to_string()), &policy)
            .unwrap();
        cache.remove("key").unwrap();

        assert_eq!(
            *seen.lock(),
            vec![(Some("produced".to_string()), EvictionReason::Removed)]
        );
    }

    #[test]
    fn test_callback_registered_by_factory_is_unwrapped() {
        let cache = LazyCache::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        cache
            .get_or_add("key", move |handle| {
                handle.register_post_eviction_callback(move |evicted| {
                    *sink.lock() = evicted.value::<u32>().copied();
                });
                Ok(99u32)
            })
            .unwrap();
        cache.remove("key").unwrap();

        assert_eq!(*seen.lock(), Some(99));
    }

    #[test]
    fn test_failed_production_callback_gets_no_value() {
        let cache = LazyCache::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let policy = EntryOptions::new().with_post_eviction_callback(move |evicted| {
            sink.lock().push(evicted.value.is_some());
        });

        let _ = cache.get_or_add_with_policy::<i32, _>(
            "key",
            |_| Err(anyhow::anyhow!("nope")),
            &policy,
        );

        assert_eq!(*seen.lock(), vec![false]);
    }

    #[test]
    fn test_eviction_callback_may_reenter_get_or_add() {
        let cache = Arc::new(LazyCache::new());
        let weak = Arc::downgrade(&cache);
        let reentered = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&reentered);
        let policy = EntryOptions::new()
            .with_absolute_expiration(Utc::now() + TimeDelta::milliseconds(20))
            .with_post_eviction_callback(move |evicted| {
                if let Some(cache) = weak.upgrade() {
                    *sink.lock() = Some(cache.get_or_add::<i32, _>(&evicted.key, |_| Ok(2)));
                }
            });

        cache.get_or_add_with_policy("k", |_| Ok(1), &policy).unwrap();
        thread::sleep(Duration::from_millis(50));

        let (done, finished) = std::sync::mpsc::channel();
        let worker = Arc::clone(&cache);
        thread::spawn(move || {
            let _ = done.send(worker.get_or_add("k", |_| Ok(3)));
        });
        let value = finished
            .recv_timeout(Duration::from_secs(3))
            .expect("get_or_add blocked on its own eviction callback")
            .unwrap();

        assert_eq!(value, 3);
        assert!(matches!(*reentered.lock(), Some(Ok(3))));
    }

    #[test]
    fn test_factory_reading_own_key_gets_reentrant_error() {
        let cache = Arc::new(LazyCache::new());
        let weak = Arc::downgrade(&cache);

        let value = cache
            .get_or_add("key", move |_| {
                let cache = weak.upgrade().ok_or_else(|| anyhow::anyhow!("cache dropped"))?;
                match cache.get_or_add::<i32, _>("key", |_| Ok(0)) {
                    Err(CacheError::Reentrant) => Ok(1),
                    other => Err(anyhow::anyhow!("unexpected nested outcome: {:?}", other)),
                }
            })
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(cache.get::<i32>("key").unwrap(), Some(1));
    }

    #[test]
    fn test_remove_matching_modes() {
        let cache = LazyCache::new();
        let load = |cache: &LazyCache| {
            for key in ["abc", "ABC", "xbc", "abcd"] {
                cache.add(key, key.to_string(), None).unwrap();
            }
        };

        load(&cache);
        assert_eq!(cache.remove_matching("abc", RemoveMode::EqualIgnoreCase).unwrap(), 2);
        let mut left = cache.keys();
        left.sort();
        assert_eq!(left, vec!["abcd", "xbc"]);

        cache.remove_matching("x", RemoveMode::Contains).unwrap();
        cache.remove_matching("a", RemoveMode::Contains).unwrap();
        load(&cache);
        assert_eq!(cache.remove_matching("abc", RemoveMode::Contains).unwrap(), 2);
        let mut left = cache.keys();
        left.sort();
        assert_eq!(left, vec!["ABC", "xbc"]);
    }

    #[test]
    fn test_remove_where_predicate() {
        let cache = LazyCache::new();
        for key in ["user:1", "user:2", "order:1"] {
            cache.add(key, 1u8, None).unwrap();
        }

        let removed = cache
            .remove_where("user", |key| key.starts_with("user:"))
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(cache.keys(), vec!["order:1".to_string()]);
    }

    #[test]
    fn test_keys_of_filters_by_value_type() {
        let cache = LazyCache::new();
        cache.add("text", "t".to_string(), None).unwrap();
        cache.get_or_add("number", |_| Ok(1i64)).unwrap();

        assert_eq!(cache.keys_of::<i64>(), vec!["number".to_string()]);
        assert_eq!(cache.keys_of::<String>(), vec!["text".to_string()]);
        assert!(cache.keys_of::<u8>().is_empty());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let config = Config {
            default_cache_duration: 0,
            ..Config::default()
        };
        assert!(matches!(
            LazyCache::from_config(&config),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_config_applies_defaults() {
        let config = Config {
            default_cache_duration: 90,
            key_locks: Some(4),
            ..Config::default()
        };

        let cache = LazyCache::from_config(&config).unwrap();

        assert_eq!(cache.defaults().default_cache_duration, Duration::from_secs(90));
        assert_eq!(cache.locks.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_get_or_add_async_single_flight() {
        let cache = Arc::new(LazyCache::new());
        let (calls, seen) = counter();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_add_async("shared", move |_| async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            Ok(i)
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == results[0]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_get_or_add_async_failure_is_not_cached() {
        let cache = LazyCache::new();

        let failed = cache
            .get_or_add_async::<i32, _, _>("key", |_| async { Err(anyhow::anyhow!("timeout")) })
            .await;
        assert!(matches!(failed, Err(CacheError::Factory(_))));
        assert!(cache.keys().is_empty());

        let value = cache
            .get_or_add_async("key", |_| async { Ok(3) })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_get_or_add_async_replaces_foreign_type() {
        let cache = LazyCache::new();
        cache.add("key", "x".to_string(), None).unwrap();

        let value = cache
            .get_or_add_async("key", |_| async { Ok(9i32) })
            .await
            .unwrap();

        assert_eq!(value, 9);
        assert_eq!(cache.try_get::<String>("key").unwrap(), None);
        assert_eq!(cache.keys_of::<i32>(), vec!["key".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_get_or_add_async_evicts_faulted_container() {
        let cache = LazyCache::new();
        let faulted = Arc::new(AsyncLazy::<i32>::new(|| async {
            Err(anyhow::anyhow!("stale failure"))
        }));
        assert!(faulted.resolve().await.is_err());
        cache
            .provider()
            .set_value("key", Arc::new(Slot::Pending(faulted)), None);
        let (calls, seen) = counter();

        let first = cache
            .get_or_add_async("key", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(5)
            })
            .await;

        assert!(first.unwrap_err().to_string().contains("stale failure"));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert!(cache.keys().is_empty(), "faulted entry must be evicted");

        let second = cache
            .get_or_add_async("key", |_| async { Ok(6) })
            .await
            .unwrap();
        assert_eq!(second, 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sync_and_async_access_share_one_value() {
        let cache = LazyCache::new();

        let produced = cache
            .get_or_add_async("key", |_| async { Ok("async".to_string()) })
            .await
            .unwrap();

        assert_eq!(cache.get::<String>("key").unwrap().as_deref(), Some("async"));
        assert_eq!(cache.get_or_add("key", |_| Ok("sync".to_string())).unwrap(), produced);

        cache.add("other", "direct".to_string(), None).unwrap();
        assert_eq!(
            cache.get_async::<String>("other").await.unwrap().as_deref(),
            Some("direct")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_eviction_callback_sees_value() {
        let cache = LazyCache::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let policy = EntryOptions::new().with_post_eviction_callback(move |evicted| {
            *sink.lock() = evicted.value::<i32>().copied();
        });

        cache
            .get_or_add_async_with_policy("key", |_| async { Ok(64) }, &policy)
            .await
            .unwrap();
        cache.remove("key").unwrap();

        assert_eq!(*seen.lock(), Some(64));
    }
}
