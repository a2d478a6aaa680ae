//! Immediate Eviction Timers
//!
//! One tokio timer per `ImmediateEviction` entry.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::StoreShared;

/// Schedules eviction of entry `id` under `key` after `delay`.
///
/// The timer only evicts that exact entry: if the key was overwritten in
/// the meantime, the newer entry is left alone. The timer holds a weak
/// reference, so it does not keep a dropped store alive.
///
/// # Returns
/// - `Some(JoinHandle)` if a tokio runtime is available
/// - `None` otherwise; the entry then expires lazily at its deadline
pub(crate) fn schedule_eviction(
    store: Weak<StoreShared>,
    key: String,
    id: u64,
    delay: Duration,
) -> Option<JoinHandle<()>> {
    let runtime = Handle::try_current().ok()?;

    Some(runtime.spawn(async move {
        tokio::time::sleep(delay).await;

        let Some(store) = store.upgrade() else {
            return;
        };
        if store.expire_entry(&key, id) {
            debug!("Evicted '{}' after {:?}", key, delay);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_without_runtime_is_none() {
        let handle = schedule_eviction(Weak::new(), "key".to_string(), 0, Duration::ZERO);
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_timer_ignores_dropped_store() {
        let handle = schedule_eviction(Weak::new(), "key".to_string(), 0, Duration::from_millis(5))
            .unwrap();

        handle.await.unwrap();
    }
}
