//! Deferred Value Module
//!
//! Single-assignment containers that compute their value once on first
//! access, and the `Slot` the coordinator stores them in.

mod async_lazy;
mod slot;
mod sync_lazy;

pub use async_lazy::AsyncLazy;
pub use slot::Slot;
pub use sync_lazy::Lazy;

pub(crate) use slot::unwrapping_callback;

/// Bound shared by every value the coordinator can cache.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CacheValue for T {}
