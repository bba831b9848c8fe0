//! tvbox-mixproxy: caches TVBox repo manifests from many upstreams and serves
//! documents mixed from them.
//!
//! ## Architecture overview
//!
//! ```text
//!                 ┌───────────────┐  get_bytes()  ┌────────────────┐  load()  ┌──────────┐
//!  HTTP ────────► │   server/     │ ────────────► │ source::cache  │ ───────► │  Loader  │
//!  request        │  (axum routes)│    mixer      │ (per-source    │          │ file/http│
//!                 └───────────────┘               │  TTL + backoff)│          └──────────┘
//!                                                 └────────────────┘
//!                                                         ▲
//!                                                         │ refresh_in_background()
//!                                                   ┌──────────┐
//!                                                   │ poll.rs  │
//!                                                   │ (ticker) │
//!                                                   └──────────┘
//! ```
//!
//! * **`source/`**: descriptors, the `Loader` trait and the cache that keeps
//!   the last good payload of every upstream.
//! * **`poll`**: background task that refreshes expired sources on a tick.
//! * **`mixer/`**: extracts, filters and rebases fields from cached sources
//!   into TVBox documents.
//! * **`manifest`**: the TVBox JSON schema.
//! * **`config`**: file settings, environment overrides and validation.
//! * **`server/`**: HTTP routes.
//! * **`main`**: wires everything together: parse args, load settings, set
//!   up logging, build the cache and serve.

mod config;
mod logging;
mod manifest;
mod mixer;
mod poll;
mod server;
mod source;
mod wallpaper;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use config::Settings;
use server::AppState;
use source::{SourceCache, UriLoader};

#[derive(Debug, Parser)]
#[command(name = "tvbox-mixproxy", version, about)]
struct Cli {
    /// Config file (TOML, YAML or JSON).  Defaults to `.tvbox_mixproxy.toml`
    /// (or `.yaml`, `.yml`, `.json`) in the working directory, then in `$HOME`.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen port, overriding the config file and environment.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let mut settings = Settings::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        settings.server_port = port;
    }

    // Held until exit so a file appender flushes.
    let _log_guard = logging::init_tracing(&settings.log).context("setting up logging")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        sources = settings.sources.len(),
        "starting"
    );

    let loader = UriLoader::new(settings.cache.fetch_timeout()).context("building HTTP client")?;
    let client = loader.client().clone();
    let cache = SourceCache::new(
        settings.sources.clone(),
        Arc::new(loader),
        settings.cache.policy(),
    )
    .start();

    let state = AppState {
        settings: Arc::new(settings),
        cache,
        client,
    };
    server::run(state).await
}
