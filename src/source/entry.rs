//! The per-source cache entry.
//!
//! `Source` pairs a [`SourceDescriptor`] with the mutable fetch state the
//! cache keeps for it.  All the freshness and backoff arithmetic lives here as
//! pure functions of "now" so it can be tested without a runtime.
//!
//! ## Invariant
//!
//! `raw_data` is either `None` or a complete, successfully fetched payload.
//! A failed fetch never touches it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::cache::SourceStatus;
use super::SourceDescriptor;

/// A single cached upstream document.
#[derive(Debug)]
pub struct Source {
    descriptor: SourceDescriptor,

    /// Last good payload, with comments already stripped.
    raw_data: Option<Bytes>,

    last_fetched_at: Option<DateTime<Utc>>,
    last_error_at: Option<DateTime<Utc>>,
    consecutive_errors: u32,

    /// Held for the duration of a refresh so one source is never fetched
    /// twice at the same time.
    gate: Arc<Mutex<()>>,
}

impl Source {
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self {
            descriptor,
            raw_data: None,
            last_fetched_at: None,
            last_error_at: None,
            consecutive_errors: 0,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn data(&self) -> Option<&Bytes> {
        self.raw_data.as_ref()
    }

    pub fn gate(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.gate)
    }

    /// Whether a caller must fetch before trusting the cached payload.
    ///
    /// A source that was never fetched always needs a refresh.  A source with
    /// no refresh interval is fetched once and then kept forever.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        let Some(fetched_at) = self.last_fetched_at.filter(|_| self.raw_data.is_some()) else {
            return true;
        };
        match self.descriptor.refresh_interval() {
            Some(interval) => elapsed(fetched_at, now) > interval,
            None => false,
        }
    }

    /// Time left before another fetch may be attempted, if backoff applies.
    ///
    /// After `n` consecutive failures the source waits `2^n` seconds counted
    /// from the most recent failure.
    pub fn backoff_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last_error = self.last_error_at?;
        let window = backoff_window(self.consecutive_errors);
        let since = elapsed(last_error, now);
        (since < window).then(|| window - since)
    }

    /// Whether the cached payload is older than `interval + bound`.
    pub fn exceeds_stale_bound(&self, now: DateTime<Utc>, bound: Duration) -> bool {
        let Some(fetched_at) = self.last_fetched_at else {
            return true;
        };
        let interval = self.descriptor.refresh_interval().unwrap_or_default();
        elapsed(fetched_at, now) > interval.saturating_add(bound)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn record_success(&mut self, data: Bytes, now: DateTime<Utc>) {
        self.raw_data = Some(data);
        self.last_fetched_at = Some(now);
        self.last_error_at = None;
        self.consecutive_errors = 0;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.last_error_at = Some(now);
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    pub fn status(&self) -> SourceStatus {
        SourceStatus {
            name: self.descriptor.name.clone(),
            uri: self.descriptor.uri.clone(),
            kind: self.descriptor.kind,
            refresh_interval_secs: self.descriptor.refresh_interval_secs,
            cached_bytes: self.raw_data.as_ref().map(Bytes::len),
            last_fetched_at: self.last_fetched_at,
            last_error_at: self.last_error_at,
            consecutive_errors: self.consecutive_errors,
        }
    }
}

/// `2^failures` seconds, saturating instead of overflowing.
fn backoff_window(failures: u32) -> Duration {
    Duration::from_secs(1u64.checked_shl(failures).unwrap_or(u64::MAX))
}

/// Non-negative time between `earlier` and `now`.  Clock skew that would make
/// it negative is treated as zero.
fn elapsed(earlier: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(earlier)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
