//! The value the coordinator stores under a key.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::future::{self, BoxFuture, FutureExt};

use crate::cache::{EntryHandle, EvictedEntry, EvictionCallback, StoredValue};
use crate::error::Result;
use crate::lazy::{AsyncLazy, CacheValue, Lazy};

// == Slot ==
/// A cached value in one of its three shapes.
///
/// Anything the coordinator reads back that is not a `Slot<T>` for the
/// requested `T` belongs to another type.
#[derive(Debug)]
pub enum Slot<T: CacheValue> {
    /// Stored directly with `add`
    Ready(T),
    /// Installed by a synchronous `get_or_add`
    Deferred(Arc<Lazy<T>>),
    /// Installed by `get_or_add_async`
    Pending(Arc<AsyncLazy<T>>),
}

impl<T: CacheValue> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Slot::Ready(value) => Slot::Ready(value.clone()),
            Slot::Deferred(lazy) => Slot::Deferred(Arc::clone(lazy)),
            Slot::Pending(lazy) => Slot::Pending(Arc::clone(lazy)),
        }
    }
}

impl<T: CacheValue> Slot<T> {
    /// Wraps a synchronous factory bound to its entry.
    pub(crate) fn deferred<F>(handle: &EntryHandle, factory: F) -> Self
    where
        F: FnOnce(&EntryHandle) -> anyhow::Result<T> + Send + 'static,
    {
        let handle = handle.clone();
        Slot::Deferred(Arc::new(Lazy::new(move || {
            let value = factory(&handle)?;
            finish_production::<T>(&handle);
            Ok(value)
        })))
    }

    /// Wraps an async factory bound to its entry.
    pub(crate) fn pending<F, Fut>(handle: &EntryHandle, factory: F) -> Self
    where
        F: FnOnce(EntryHandle) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let handle = handle.clone();
        Slot::Pending(Arc::new(AsyncLazy::new(move || async move {
            let value = factory(handle.clone()).await?;
            finish_production::<T>(&handle);
            Ok(value)
        })))
    }

    // == Resolve ==
    /// Returns the value, producing it if needed.
    ///
    /// A `Pending` slot is resolved with [`AsyncLazy::resolve_blocking`],
    /// which blocks the calling thread.
    pub fn resolve(&self) -> Result<T> {
        match self {
            Slot::Ready(value) => Ok(value.clone()),
            Slot::Deferred(lazy) => lazy.resolve(),
            Slot::Pending(lazy) => lazy.resolve_blocking(),
        }
    }

    /// Returns a future of the value.
    ///
    /// A `Deferred` slot is resolved before returning, so its future is
    /// immediately ready.
    pub fn resolve_async(&self) -> BoxFuture<'static, Result<T>> {
        match self {
            Slot::Ready(value) => future::ready(Ok(value.clone())).boxed(),
            Slot::Deferred(lazy) => future::ready(lazy.resolve()).boxed(),
            Slot::Pending(lazy) => lazy.resolve().boxed(),
        }
    }

    /// Returns the outcome if it is already known, never producing.
    pub fn peek(&self) -> Option<Result<T>> {
        match self {
            Slot::Ready(value) => Some(Ok(value.clone())),
            Slot::Deferred(lazy) => lazy.peek(),
            Slot::Pending(lazy) => lazy.peek(),
        }
    }

    pub fn has_faulted(&self) -> bool {
        match self {
            Slot::Ready(_) => false,
            Slot::Deferred(lazy) => lazy.has_faulted(),
            Slot::Pending(lazy) => lazy.has_faulted(),
        }
    }
}

// == Eviction Callbacks ==
/// Wraps `callback` so it sees the produced `T` rather than the slot.
///
/// A slot whose production never succeeded is reported with no value.
/// Values that are not a `Slot<T>` pass through untouched.
pub(crate) fn unwrapping_callback<T: CacheValue>(callback: EvictionCallback) -> EvictionCallback {
    Arc::new(move |evicted: &EvictedEntry| match evicted.value::<Slot<T>>() {
        Some(slot) => {
            let unwrapped = EvictedEntry {
                key: evicted.key.clone(),
                value: match slot.peek() {
                    Some(Ok(value)) => Some(Arc::new(value) as StoredValue),
                    _ => None,
                },
                reason: evicted.reason,
            };
            callback(&unwrapped);
        }
        None => callback(evicted),
    })
}

/// Applies what the factory set on its handle once production succeeded.
pub(crate) fn finish_production<T: CacheValue>(handle: &EntryHandle) {
    handle.update(|options| {
        options.normalize_relative_expiration(Utc::now());
        options.rewrap_callbacks(unwrapping_callback::<T>);
    });
}
