//! Fetching raw source payloads.
//!
//! [`Loader`] is the seam between the cache and the outside world.  The
//! production implementation, [`UriLoader`], reads `file://` paths from disk
//! and performs a GET for `http://` and `https://` URLs.  Tests substitute an
//! in-memory loader.
//!
//! Loaders return bytes exactly as they were read.  Comment stripping is the
//! cache's job (see [`strip_comments`]).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use thiserror::Error;

/// Anything that can turn a source URI into bytes.
///
/// Called from request handlers and from background refresh tasks, so
/// implementations must be `Send + Sync`.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, uri: &str) -> Result<Bytes, LoadError>;
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("requesting {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("requesting {url}: upstream answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Loads `file://`, `http://` and `https://` URIs.
#[derive(Debug, Clone)]
pub struct UriLoader {
    client: reqwest::Client,
}

impl UriLoader {
    /// Build a loader whose HTTP requests give up after `timeout`.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The underlying client, shared with the spider proxy.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn load_file(&self, path: &str) -> Result<Bytes, LoadError> {
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|source| LoadError::Io {
                path: PathBuf::from(path),
                source,
            })
    }

    async fn load_http(&self, url: &str) -> Result<Bytes, LoadError> {
        let http_err = |source| LoadError::Http {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status {
                url: url.to_string(),
                status,
            });
        }
        response.bytes().await.map_err(http_err)
    }
}

#[async_trait]
impl Loader for UriLoader {
    async fn load(&self, uri: &str) -> Result<Bytes, LoadError> {
        if let Some(path) = uri.strip_prefix("file://") {
            self.load_file(path).await
        } else if uri.starts_with("http://") || uri.starts_with("https://") {
            self.load_http(uri).await
        } else {
            Err(LoadError::UnsupportedScheme(uri.to_string()))
        }
    }
}

lazy_static! {
    // Whole-line `//` comments and `/* ... */` blocks.  A `//` inside a value
    // such as "https://..." is left alone because it is not at line start.
    static ref COMMENTS: Regex =
        Regex::new(r"(?m)^\s*//.*$|/\*[\s\S]*?\*/").expect("comment pattern is valid");
}

/// Remove `//` line comments and `/* */` block comments so that commented
/// manifests still parse as JSON.
pub fn strip_comments(raw: &[u8]) -> Bytes {
    Bytes::from(COMMENTS.replace_all(raw, &b""[..]).into_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
