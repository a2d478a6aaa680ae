//! Lazy Cache Service Module
//!
//! The coordinator that turns a plain cache store into a single-flight
//! get-or-add cache.

mod caching;
mod key_locks;
mod remove_mode;

pub use caching::LazyCache;
pub use key_locks::{default_stripe_count, KeyLocks, MIN_KEY_LOCKS};
pub use remove_mode::RemoveMode;
