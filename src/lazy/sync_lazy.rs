//! Synchronous deferred value.

use std::fmt;
use std::sync::OnceLock;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::error::{CacheError, Result};
use crate::lazy::CacheValue;

type Producer<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send>;

// == Lazy ==
/// A value computed by its producer on first `resolve`.
///
/// Concurrent callers block until the single production finishes and all
/// observe the same outcome. A failure is kept as well, so every caller of
/// a faulted container sees the same shared error. A producer that resolves
/// its own container gets `CacheError::Reentrant` instead of deadlocking.
pub struct Lazy<T> {
    outcome: OnceLock<Result<T>>,
    producer: Mutex<Option<Producer<T>>>,
    producing_on: Mutex<Option<ThreadId>>,
}

/// Marks the current thread as the producer until dropped, panics included.
struct ProducingGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> ProducingGuard<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *slot.lock() = Some(thread::current().id());
        Self(slot)
    }
}

impl Drop for ProducingGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

impl<T: CacheValue> Lazy<T> {
    /// Creates an unresolved container.
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            outcome: OnceLock::new(),
            producer: Mutex::new(Some(Box::new(producer))),
            producing_on: Mutex::new(None),
        }
    }

    // == Resolve ==
    /// Runs the producer on first call and returns the outcome.
    ///
    /// # Returns
    /// - `Ok(value)` once production succeeded
    /// - `Err(CacheError::Factory)` if the producer failed
    /// - `Err(CacheError::Cancelled)` if the producer panicked on an earlier call
    /// - `Err(CacheError::Reentrant)` if called from inside the producer
    pub fn resolve(&self) -> Result<T> {
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }
        if *self.producing_on.lock() == Some(thread::current().id()) {
            return Err(CacheError::Reentrant);
        }

        self.outcome
            .get_or_init(|| {
                let producer = self.producer.lock().take();
                let _producing = ProducingGuard::enter(&self.producing_on);
                match producer {
                    Some(producer) => producer().map_err(CacheError::factory),
                    None => Err(CacheError::Cancelled(
                        "producer already consumed".to_string(),
                    )),
                }
            })
            .clone()
    }

    /// Returns the outcome without running the producer.
    pub fn peek(&self) -> Option<Result<T>> {
        self.outcome.get().cloned()
    }

    pub fn is_value_created(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(_)))
    }

    pub fn has_faulted(&self) -> bool {
        matches!(self.outcome.get(), Some(Err(_)))
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.outcome.get() {
            None => "unresolved",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "faulted",
        };
        f.debug_struct("Lazy").field("state", &state).finish()
    }
}
