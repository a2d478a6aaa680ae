//! Asynchronous deferred value.
//!
//! The production future is started once and shared with every awaiter
//! through `futures::future::Shared`.

use std::fmt;
use std::future::Future;
use std::sync::OnceLock;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::error::{CacheError, Result};
use crate::lazy::CacheValue;

type Production<T> = Shared<BoxFuture<'static, Result<T>>>;
type Producer<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

// == Async Lazy ==
/// A value computed by an async producer on first `resolve`.
///
/// Inside a multi-threaded tokio runtime the production runs as its own
/// task, so it completes even if the first awaiter is dropped and a caller
/// blocked in `resolve_blocking` cannot starve it. Elsewhere it is driven in
/// place by whoever awaits it.
pub struct AsyncLazy<T: CacheValue> {
    production: OnceLock<Production<T>>,
    producer: Mutex<Option<Producer<T>>>,
}

impl<T: CacheValue> AsyncLazy<T> {
    /// Creates an unstarted container.
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            production: OnceLock::new(),
            producer: Mutex::new(Some(Box::new(move || producer().boxed()))),
        }
    }

    fn production(&self) -> Production<T> {
        self.production.get_or_init(|| self.launch()).clone()
    }

    fn launch(&self) -> Production<T> {
        let Some(producer) = self.producer.lock().take() else {
            return future::ready(Err(CacheError::Cancelled(
                "producer already consumed".to_string(),
            )))
            .boxed()
            .shared();
        };

        let produce = async move { producer().await.map_err(CacheError::factory) };

        match Handle::try_current() {
            Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
                let task = runtime.spawn(produce);
                async move {
                    task.await
                        .unwrap_or_else(|err| Err(CacheError::Cancelled(err.to_string())))
                }
                .boxed()
                .shared()
            }
            _ => produce.boxed().shared(),
        }
    }

    // == Resolve ==
    /// Starts production on first call and returns a future of the outcome.
    ///
    /// The returned future owns its state, so it may outlive `self`.
    pub fn resolve(&self) -> impl Future<Output = Result<T>> + Send + 'static {
        self.production()
    }

    /// Resolves from synchronous code, blocking the current thread.
    ///
    /// Inside a multi-threaded runtime the worker is handed off with
    /// `block_in_place` first. Calling this from a current-thread runtime
    /// while the producer needs that runtime (timers, I/O) deadlocks.
    pub fn resolve_blocking(&self) -> Result<T> {
        if let Some(outcome) = self.peek() {
            return outcome;
        }

        let production = self.production();
        match Handle::try_current() {
            Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| futures::executor::block_on(production))
            }
            _ => futures::executor::block_on(production),
        }
    }

    /// Returns the outcome if production has already finished.
    pub fn peek(&self) -> Option<Result<T>> {
        self.production.get()?.peek().cloned()
    }

    /// True once production has been started.
    pub fn is_started(&self) -> bool {
        self.production.get().is_some()
    }

    pub fn is_value_created(&self) -> bool {
        matches!(self.peek(), Some(Ok(_)))
    }

    pub fn has_faulted(&self) -> bool {
        matches!(self.peek(), Some(Err(_)))
    }
}

impl<T: CacheValue> fmt::Debug for AsyncLazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.peek() {
            None if self.is_started() => "pending",
            None => "unstarted",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "faulted",
        };
        f.debug_struct("AsyncLazy").field("state", &state).finish()
    }
}
