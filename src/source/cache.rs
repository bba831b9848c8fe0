//! The source cache.
//!
//! [`SourceCache`] owns one [`Source`] per configured descriptor and hands out
//! the latest good payload by name.  Callers never see a half-written entry:
//! state changes happen under the cache-wide write lock, and the lock is never
//! held across I/O.
//!
//! ## Refresh rules
//!
//! * `get_bytes` fetches synchronously when nothing is cached yet or the
//!   payload is older than the source's interval.
//! * After `n` consecutive failures a source is not fetched again until
//!   `2^n` seconds have passed since the last failure.
//! * A failed refresh falls back to the last good payload, unless
//!   [`CachePolicy::max_stale`] says it has become too old.
//! * A per-source gate serialises refreshes, so concurrent callers racing the
//!   same stale source cause a single fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entry::Source;
use super::{
    strip_comments, Clock, Loader, SourceDescriptor, SourceError, SourceKind, SystemClock,
};
use crate::poll;

/// Tunables for the cache and its refresh loop.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// How often the background loop looks for stale sources.
    pub tick: Duration,
    /// How long past its interval a payload may still be served after a
    /// failed refresh.  `None` serves the last good payload forever.
    pub max_stale: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            max_stale: None,
        }
    }
}

/// Point-in-time view of one source, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub uri: String,
    pub kind: SourceKind,
    pub refresh_interval_secs: u64,
    pub cached_bytes: Option<usize>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
}

pub struct SourceCache {
    sources: RwLock<HashMap<String, Source>>,
    loader: Arc<dyn Loader>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
    shutdown: CancellationToken,
}

impl SourceCache {
    pub fn new(
        descriptors: impl IntoIterator<Item = SourceDescriptor>,
        loader: Arc<dyn Loader>,
        policy: CachePolicy,
    ) -> Self {
        Self::with_clock(descriptors, loader, Arc::new(SystemClock), policy)
    }

    pub fn with_clock(
        descriptors: impl IntoIterator<Item = SourceDescriptor>,
        loader: Arc<dyn Loader>,
        clock: Arc<dyn Clock>,
        policy: CachePolicy,
    ) -> Self {
        let sources = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), Source::new(d)))
            .collect();

        Self {
            sources: RwLock::new(sources),
            loader,
            clock,
            policy,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wrap the cache in an [`Arc`] and start its background refresh loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Arc<Self> {
        let cache = Arc::new(self);
        poll::spawn(&cache);
        cache
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the background refresh loop.
    ///
    /// Refreshes already in flight still complete.  `get_bytes` keeps working
    /// afterwards; only automatic refreshing stops.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("stopping source refresh loop");
            self.shutdown.cancel();
        }
    }

    pub async fn descriptor(&self, name: &str) -> Result<SourceDescriptor, SourceError> {
        let sources = self.sources.read().await;
        sources
            .get(name)
            .map(|s| s.descriptor().clone())
            .ok_or_else(|| SourceError::NotFound(name.to_string()))
    }

    /// Return the current payload of `name`, fetching first if needed.
    pub async fn get_bytes(&self, name: &str) -> Result<Bytes, SourceError> {
        let gate = {
            let sources = self.sources.read().await;
            let source = sources
                .get(name)
                .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
            match source.data() {
                Some(data) if !source.needs_refresh(self.clock.now()) => return Ok(data.clone()),
                _ => source.gate(),
            }
        };

        let _guard = gate.lock().await;
        match self.refresh(name).await {
            Ok(data) => Ok(data),
            Err(err) => self.serve_stale(name, err).await,
        }
    }

    pub async fn status(&self) -> Vec<SourceStatus> {
        let sources = self.sources.read().await;
        let mut status: Vec<_> = sources.values().map(Source::status).collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    /// Names of auto-refreshing sources whose payload is missing or expired.
    pub(crate) async fn due_for_refresh(&self) -> Vec<String> {
        let now = self.clock.now();
        let sources = self.sources.read().await;
        sources
            .values()
            .filter(|s| s.descriptor().refresh_interval().is_some() && s.needs_refresh(now))
            .map(|s| s.descriptor().name.clone())
            .collect()
    }

    /// Refresh `name` on its own task.  Skips silently if another refresh of
    /// the same source is already running.
    pub(crate) fn refresh_in_background(self: &Arc<Self>, name: String) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let Some(gate) = cache.gate(&name).await else {
                return;
            };
            let Ok(_guard) = gate.try_lock_owned() else {
                debug!(source = %name, "refresh already in flight, skipping");
                return;
            };
            if let Err(SourceError::BackoffActive { retry_in, .. }) = cache.refresh(&name).await {
                debug!(source = %name, ?retry_in, "background refresh suppressed by backoff");
            }
        })
    }

    async fn gate(&self, name: &str) -> Option<Arc<Mutex<()>>> {
        self.sources.read().await.get(name).map(Source::gate)
    }

    /// Fetch `name` unless it became fresh while we waited for the gate.
    /// The caller must hold the source's gate.
    async fn refresh(&self, name: &str) -> Result<Bytes, SourceError> {
        let uri = {
            let sources = self.sources.read().await;
            let source = sources
                .get(name)
                .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
            let now = self.clock.now();

            if let Some(data) = source.data().filter(|_| !source.needs_refresh(now)) {
                return Ok(data.clone());
            }
            if let Some(retry_in) = source.backoff_remaining(now) {
                return Err(SourceError::BackoffActive {
                    name: name.to_string(),
                    failures: source.consecutive_errors(),
                    retry_in,
                });
            }
            source.descriptor().uri.clone()
        };

        debug!(source = %name, %uri, "fetching source");
        let fetched = self.loader.load(&uri).await.map(|raw| strip_comments(&raw));

        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(name)
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        let now = self.clock.now();

        match fetched {
            Ok(data) => {
                source.record_success(data.clone(), now);
                info!(source = %name, bytes = data.len(), "source refreshed");
                Ok(data)
            }
            Err(err) => {
                source.record_failure(now);
                warn!(
                    source = %name,
                    failures = source.consecutive_errors(),
                    error = %err,
                    "source refresh failed"
                );
                Err(SourceError::FetchFailed {
                    name: name.to_string(),
                    source: err,
                })
            }
        }
    }

    /// After a failed refresh, fall back to the last good payload if allowed.
    async fn serve_stale(&self, name: &str, err: SourceError) -> Result<Bytes, SourceError> {
        let sources = self.sources.read().await;
        let Some(source) = sources.get(name) else {
            return Err(err);
        };
        let Some(data) = source.data() else {
            return Err(err);
        };

        if let Some(bound) = self.policy.max_stale {
            if source.exceeds_stale_bound(self.clock.now(), bound) {
                return Err(SourceError::StaleExpired {
                    name: name.to_string(),
                    cause: Box::new(err),
                });
            }
        }

        debug!(source = %name, error = %err, "serving last good payload");
        Ok(data.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
