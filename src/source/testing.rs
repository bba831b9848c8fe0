//! In-memory loader and clock used by tests across the crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use super::{Clock, LoadError, Loader};

/// Serves fixed payloads by URI and counts every call.
///
/// A URI mapped to `None` fails with an I/O error, which lets tests flip a
/// source between healthy and broken.
#[derive(Default)]
pub struct StaticLoader {
    payloads: Mutex<HashMap<String, Option<Bytes>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn serve(self, uri: &str, body: &str) -> Self {
        self.set(uri, Some(body));
        self
    }

    pub fn set(&self, uri: &str, body: Option<&str>) {
        self.payloads
            .lock()
            .unwrap()
            .insert(uri.to_string(), body.map(|b| Bytes::copy_from_slice(b.as_bytes())));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Loader for StaticLoader {
    async fn load(&self, uri: &str) -> Result<Bytes, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let payload = self.payloads.lock().unwrap().get(uri).cloned();
        match payload {
            Some(Some(bytes)) => Ok(bytes),
            _ => Err(LoadError::Io {
                path: uri.into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no payload"),
            }),
        }
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
