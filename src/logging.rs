use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, LogSettings};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `log.level`.  When `log.output` is a file
/// path, output goes to a daily-rolling file next to it; the returned guard
/// must be held until exit so buffered lines get flushed.
pub fn init_tracing(settings: &LogSettings) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::try_new(directive),
        _ => EnvFilter::try_new(settings.level.trim()),
    }
    .map_err(|e| ConfigError::Invalid(format!("invalid log.level: {e}")))?;

    let output = settings.output.trim();
    if output.is_empty() || output.eq_ignore_ascii_case("stdout") {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    }

    let path = Path::new(output);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| ConfigError::Invalid(format!("log.output `{output}` is not a file path")))?;

    std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, file_name));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}
