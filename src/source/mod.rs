//! Source abstraction layer.
//!
//! A *source* is one upstream repo manifest, addressed by a logical name and
//! an origin URI.  This module defines the static [`SourceDescriptor`], the
//! [`Loader`] trait that turns a URI into raw bytes, and the [`SourceCache`]
//! that keeps the latest good payload of every configured source.
//!
//! ## For contributors: adding a new URI scheme
//!
//! 1. Teach [`UriLoader::load`] the new scheme (or write a new type that
//!    implements [`Loader`]).
//! 2. Return [`LoadError::UnsupportedScheme`] for anything you do not handle.
//!
//! The cache, the refresh loop and the mixer are all scheme-agnostic.

mod cache;
mod clock;
mod entry;
mod loader;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::{CachePolicy, SourceCache, SourceStatus};
pub use clock::{Clock, SystemClock};
pub use loader::{strip_comments, LoadError, Loader, UriLoader};

/// How a consumer is expected to interpret a source's payload.
///
/// The kind never changes how a source is fetched; the mixer only uses it to
/// reject specs that point at the wrong sort of document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A single repo manifest (`spider`, `sites`, `lives`, ...).
    #[default]
    Single,
    /// A multi-repo index (`urls[]`).
    Multi,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Single => f.write_str("single"),
            SourceKind::Multi => f.write_str("multi"),
        }
    }
}

/// Static description of one upstream document, supplied at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Unique key that mixing specs refer to.
    pub name: String,
    /// Origin location: `file://`, `http://` or `https://`.
    #[serde(rename = "url")]
    pub uri: String,
    #[serde(rename = "type", default)]
    pub kind: SourceKind,
    /// Refresh interval in seconds.  `0` means "fetch lazily once".
    #[serde(rename = "interval", default)]
    pub refresh_interval_secs: u64,
}

impl SourceDescriptor {
    #[cfg(test)]
    pub fn new(
        name: impl Into<String>,
        uri: impl Into<String>,
        kind: SourceKind,
        refresh_interval_secs: u64,
    ) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            kind,
            refresh_interval_secs,
        }
    }

    /// The refresh interval, or `None` when the source never auto-refreshes.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

/// Errors surfaced by [`SourceCache::get_bytes`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("fetching source {name}: {source}")]
    FetchFailed {
        name: String,
        #[source]
        source: LoadError,
    },

    #[error("source {name} failed {failures} times in a row, next attempt allowed in {retry_in:?}")]
    BackoffActive {
        name: String,
        failures: u32,
        retry_in: Duration,
    },

    #[error("source {name} is stale beyond the configured bound")]
    StaleExpired {
        name: String,
        #[source]
        cause: Box<SourceError>,
    },
}
