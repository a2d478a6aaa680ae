//! Expiration Cleanup Task
//!
//! Background task that periodically removes expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheProvider;

/// Spawns a background task that periodically sweeps expired entries.
///
/// Lazily expired entries are invisible to readers but keep their memory
/// until they are overwritten or swept; this task reclaims them.
///
/// # Arguments
/// * `provider` - The store to sweep
/// * `cleanup_interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let cache = LazyCache::new();
/// let cleanup_handle = spawn_cleanup_task(cache.provider().clone(), 60);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(
    provider: Arc<dyn CacheProvider>,
    cleanup_interval_secs: u64,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs);

    tokio::spawn(async move {
        info!(
            "Starting expiration cleanup task with interval of {} seconds",
            cleanup_interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = provider.cleanup_expired();

            if removed > 0 {
                info!("Expiration cleanup: removed {} expired entries", removed);
            } else {
                debug!("Expiration cleanup: no expired entries found");
            }
        }
    })
}
