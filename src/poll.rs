//! Background source refreshing.
//!
//! Runs as a Tokio task that wakes up on a fixed tick, asks the cache which
//! auto-refreshing sources have expired, and spawns one refresh task per
//! expired source.  A slow upstream therefore never delays the others, nor the
//! next tick.
//!
//! ## For contributors
//!
//! The loop holds only a [`Weak`] reference to the cache, so dropping the last
//! [`Arc`] also ends the loop.  [`SourceCache::shutdown`] ends it explicitly.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::source::SourceCache;

/// Spawn the refresh loop for `cache`.
pub fn spawn(cache: &Arc<SourceCache>) -> JoinHandle<()> {
    let weak: Weak<SourceCache> = Arc::downgrade(cache);
    let shutdown = cache.shutdown_token();
    let tick = cache.policy().tick;

    tokio::spawn(async move {
        let mut ticker = time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; sources are fetched on first
        // use, so there is nothing to do yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(cache) = weak.upgrade() else {
                break;
            };
            let due = cache.due_for_refresh().await;
            if !due.is_empty() {
                debug!(count = due.len(), "refreshing expired sources");
            }
            for name in due {
                cache.refresh_in_background(name);
            }
        }

        debug!("source refresh loop stopped");
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::source::testing::StaticLoader;
    use crate::source::{CachePolicy, Loader, SourceDescriptor, SourceKind};

    const URI: &str = "https://example.com/repo.json";

    const TICK: Duration = Duration::from_millis(20);

    fn make_cache(loader: &Arc<StaticLoader>) -> Arc<SourceCache> {
        Arc::new(SourceCache::new(
            [SourceDescriptor::new("main", URI, SourceKind::Single, 3600)],
            Arc::clone(loader) as Arc<dyn Loader>,
            CachePolicy {
                tick: TICK,
                max_stale: None,
            },
        ))
    }

    #[tokio::test]
    async fn tick_fetches_expired_sources_once() {
        let loader = Arc::new(StaticLoader::new().serve(URI, "{}"));
        let cache = make_cache(&loader);
        let handle = spawn(&cache);

        // Several ticks pass, but the payload stays fresh for an hour.
        time::sleep(TICK * 10).await;
        assert_eq!(loader.calls(), 1);
        assert!(cache.get_bytes("main").await.is_ok());
        assert_eq!(loader.calls(), 1);

        cache.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let loader = Arc::new(StaticLoader::new().serve(URI, "{}"));
        let cache = make_cache(&loader);
        let handle = spawn(&cache);

        cache.shutdown();
        handle.await.unwrap();

        time::sleep(TICK * 5).await;
        assert_eq!(loader.calls(), 0);
    }

    #[tokio::test]
    async fn dropping_the_cache_ends_the_loop() {
        let loader = Arc::new(StaticLoader::new());
        let cache = make_cache(&loader);
        let handle = spawn(&cache);

        drop(cache);
        time::timeout(TICK * 10, handle)
            .await
            .expect("loop should exit after the cache is dropped")
            .unwrap();
    }
}
