//! Lazy Memory Cache demo
//!
//! Fires concurrent lookups for one missing key and shows that the value
//! factory ran once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lazy_memory_cache::{spawn_cleanup_task, Config, LazyCache};

const CONCURRENT_CALLERS: usize = 16;

/// Entry point for the demo.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache and start the background cleanup task
/// 4. Race concurrent `get_or_add_async` calls for one key
/// 5. Print statistics as JSON and stop the cleanup task
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lazy_memory_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: default_duration={}s, max_entries={:?}, cleanup_interval={}s",
        config.default_cache_duration, config.max_entries, config.cleanup_interval
    );

    let cache = Arc::new(LazyCache::from_config(&config)?);
    let cleanup_handle = spawn_cleanup_task(cache.provider().clone(), config.cleanup_interval);

    let factory_runs = Arc::new(AtomicUsize::new(0));
    let callers: Vec<_> = (0..CONCURRENT_CALLERS)
        .map(|caller| {
            let cache = Arc::clone(&cache);
            let factory_runs = Arc::clone(&factory_runs);
            tokio::spawn(async move {
                cache
                    .get_or_add_async("report:daily", move |_| async move {
                        factory_runs.fetch_add(1, Ordering::SeqCst);
                        info!("Caller {} is building the report", caller);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(format!("report built by caller {caller}"))
                    })
                    .await
            })
        })
        .collect();

    for caller in callers {
        match caller.await? {
            Ok(report) => info!("Received '{}'", report),
            Err(err) => warn!("Lookup failed: {}", err),
        }
    }

    info!(
        "{} callers, factory ran {} time(s)",
        CONCURRENT_CALLERS,
        factory_runs.load(Ordering::SeqCst)
    );
    println!("{}", serde_json::to_string_pretty(&cache.stats())?);

    cleanup_handle.abort();
    info!("Cleanup task stopped");
    Ok(())
}
