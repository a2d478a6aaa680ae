//! Memory Cache Module
//!
//! The expiring map behind the cache store: a HashMap of entries with
//! absolute and sliding expiration, optional capacity bound with
//! least-recently-used eviction, and eviction notifications.
//!
//! `MemoryCache` is not synchronized itself. Lookups take `&self` so they
//! can run under a shared lock; mutations take `&mut self`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::cache::entry::{CacheEntry, EntryHandle, PendingEviction, StoredValue};
use crate::cache::options::EvictionReason;
use crate::cache::stats::{CacheStats, StatsRecorder};

// == Memory Cache ==
/// Expiring key/value map.
#[derive(Default)]
pub struct MemoryCache {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// Maximum number of entries, None = unbounded
    max_entries: Option<usize>,
    /// Next entry id
    next_id: u64,
    /// Logical clock for access ordering
    clock: AtomicU64,
    /// Performance statistics
    stats: StatsRecorder,
}

/// Result of an insert.
pub struct Inserted {
    /// Id assigned to the new entry
    pub id: u64,
    /// Entries displaced by the insert
    pub evicted: Vec<PendingEviction>,
}

impl MemoryCache {
    // == Constructor ==
    /// Creates a new MemoryCache.
    ///
    /// # Arguments
    /// * `max_entries` - Capacity bound, or None for an unbounded map
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            max_entries: max_entries.filter(|max| *max > 0),
            ..Self::default()
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    // == Lookup ==
    /// Retrieves a live value by key, recording a hit or miss.
    ///
    /// Expired entries are treated as absent; they are dropped by the next
    /// insert under their key or by `cleanup_expired`.
    pub fn lookup(&self, key: &str, now: DateTime<Utc>) -> Option<StoredValue> {
        match self.peek(key, now) {
            Some(entry) => {
                entry.touch(now, self.tick());
                self.stats.record_hit();
                Some(entry.value.clone())
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Peek ==
    /// Returns the live entry for `key` without touching it.
    pub fn peek(&self, key: &str, now: DateTime<Utc>) -> Option<&CacheEntry> {
        self.entries.get(key).filter(|entry| !entry.is_expired(now))
    }

    // == Insert ==
    /// Stores a value, replacing any previous entry under the key.
    ///
    /// A relative lifetime in the handle's options is folded into an
    /// absolute deadline as of `now`. If the map is at capacity and the key
    /// is new, an expired entry or else the least recently used one is
    /// evicted first.
    pub fn insert(
        &mut self,
        key: &str,
        value: StoredValue,
        handle: EntryHandle,
        now: DateTime<Utc>,
    ) -> Inserted {
        handle.update(|options| options.normalize_relative_expiration(now));

        let mut evicted = Vec::new();

        if let Some(previous) = self.entries.remove(key) {
            let reason = if previous.is_expired(now) {
                self.stats.record_eviction();
                EvictionReason::Expired
            } else {
                EvictionReason::Replaced
            };
            evicted.push(previous.into_eviction(reason));
        } else if let Some(max) = self.max_entries {
            if self.entries.len() >= max {
                if let Some(victim) = self.evict_for_capacity(now) {
                    evicted.push(victim);
                }
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let tick = self.tick();
        self.entries
            .insert(key.to_string(), CacheEntry::new(id, value, handle, now, tick));

        trace!("Inserted entry '{}' (id {})", key, id);
        Inserted { id, evicted }
    }

    fn evict_for_capacity(&mut self, now: DateTime<Utc>) -> Option<PendingEviction> {
        let expired = self
            .entries
            .iter()
            .find(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone());

        let (victim, reason) = match expired {
            Some(key) => (key, EvictionReason::Expired),
            None => {
                let oldest = self
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.recency())
                    .map(|(key, _)| key.clone())?;
                (oldest, EvictionReason::Capacity)
            }
        };

        self.stats.record_eviction();
        trace!("Evicting '{}' to stay within capacity", victim);
        self.entries
            .remove(&victim)
            .map(|entry| entry.into_eviction(reason))
    }

    // == Remove ==
    /// Removes an entry by key.
    ///
    /// # Arguments
    /// * `key` - The key to remove
    /// * `reason` - Reason reported to eviction callbacks
    ///
    /// Removals for `Expired` count as evictions in the statistics.
    pub fn remove(&mut self, key: &str, reason: EvictionReason) -> Option<PendingEviction> {
        let entry = self.entries.remove(key)?;
        if reason == EvictionReason::Expired {
            self.stats.record_eviction();
        }
        Some(entry.into_eviction(reason))
    }

    /// Removes the entry under `key` only if `predicate` accepts it.
    pub fn remove_if<P>(
        &mut self,
        key: &str,
        predicate: P,
        reason: EvictionReason,
    ) -> Option<PendingEviction>
    where
        P: FnOnce(&CacheEntry) -> bool,
    {
        if !self.entries.get(key).is_some_and(predicate) {
            return None;
        }
        self.remove(key, reason)
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the map.
    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) -> Vec<PendingEviction> {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        expired_keys
            .iter()
            .filter_map(|key| self.remove(key, EvictionReason::Expired))
            .collect()
    }

    // == Keys ==
    /// Returns the keys of all live entries.
    pub fn keys(&self, now: DateTime<Utc>) -> Vec<String> {
        self.keys_where(now, |_| true)
    }

    /// Returns the keys of live entries whose value passes `filter`.
    pub fn keys_where<F>(&self, now: DateTime<Utc>, filter: F) -> Vec<String>
    where
        F: Fn(&StoredValue) -> bool,
    {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now) && filter(&entry.value))
            .map(|(key, _)| key.clone())
            .collect()
    }

    // == Stats ==
    /// Returns current statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.entries.len())
    }

    // == Length ==
    /// Returns the number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
