//! Key Lock Module
//!
//! Striped mutexes that serialize value installation per key.

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::BuildHasher;
use std::thread;

use parking_lot::{Mutex, MutexGuard};

/// Lower bound on the number of stripes.
pub const MIN_KEY_LOCKS: usize = 32;

/// Stripes per available CPU.
const LOCKS_PER_CPU: usize = 8;

// == Key Locks ==
/// Fixed-size table of mutexes, a key maps to one by hash.
///
/// Distinct keys hashing to the same stripe serialize against each other
/// while installing. The guard is only held around the store's
/// create-if-absent, never while a value is produced.
pub struct KeyLocks {
    stripes: Box<[Mutex<()>]>,
    hasher: RandomState,
}

impl KeyLocks {
    /// Creates a table sized for this machine.
    pub fn new() -> Self {
        Self::with_stripes(default_stripe_count())
    }

    /// Creates a table with `count` stripes (at least one).
    pub fn with_stripes(count: usize) -> Self {
        Self {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    /// Index of the stripe guarding `key`.
    pub fn stripe_of(&self, key: &str) -> usize {
        (self.hasher.hash_one(key) % self.stripes.len() as u64) as usize
    }

    /// Locks the stripe guarding `key`.
    pub fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(key)].lock()
    }

    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLocks")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}

/// `max(available_parallelism * 8, 32)`.
pub fn default_stripe_count() -> usize {
    let cpus = thread::available_parallelism().map_or(1, |n| n.get());
    (cpus * LOCKS_PER_CPU).max(MIN_KEY_LOCKS)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_has_minimum_size() {
        let locks = KeyLocks::new();
        assert!(locks.len() >= MIN_KEY_LOCKS);
        assert_eq!(locks.len(), default_stripe_count());
    }

    #[test]
    fn test_zero_stripes_clamped_to_one() {
        let locks = KeyLocks::with_stripes(0);
        assert_eq!(locks.len(), 1);
        assert_eq!(locks.stripe_of("anything"), 0);
    }

    #[test]
    fn test_same_key_same_stripe() {
        let locks = KeyLocks::with_stripes(64);
        assert_eq!(locks.stripe_of("user:1"), locks.stripe_of("user:1"));
        assert!(locks.stripe_of("user:2") < 64);
    }

    #[test]
    fn test_lock_excludes_same_stripe() {
        let locks = KeyLocks::with_stripes(1);
        let _guard = locks.lock("a");
        assert!(locks.stripes[locks.stripe_of("b")].try_lock().is_none());
    }
}
