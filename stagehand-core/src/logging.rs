//! Logging infrastructure for stagehand
//!
//! Each CLI invocation writes one log file,
//! `~/.local/state/stagehand/session-<YYYYmmdd-HHMMSS>-<id8>.log`, following XDG standards.

use crate::config::{Config, LoggingConfig};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use uuid::Uuid;

const LOG_PREFIX: &str = "session-";
const LOG_SUFFIX: &str = ".log";

/// Initialize the logging system for one session
///
/// Sets up tracing with:
/// - One file per session in the XDG state directory
/// - Pruning of old session logs beyond `max_files`
/// - Configurable log level via config or RUST_LOG env var
pub fn init(
    config: &LoggingConfig,
    session_id: Uuid,
    started_at: DateTime<Local>,
) -> crate::error::Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_name = session_log_name(session_id, started_at);
    let pruned = prune_session_logs(&log_dir, config.max_files.saturating_sub(1))?;

    let file_appender = tracing_appender::rolling::never(&log_dir, &file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    let path = log_dir.join(&file_name);
    tracing::info!(
        session = %session_id,
        log_file = %path.display(),
        level = %config.level,
        pruned,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard, path })
}

/// Initialize logging for tests (logs to stdout)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
    path: PathBuf,
}

impl LoggingGuard {
    /// The session's log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// File name for a session log
pub fn session_log_name(session_id: Uuid, started_at: DateTime<Local>) -> String {
    let id = session_id.simple().to_string();
    format!(
        "{}{}-{}{}",
        LOG_PREFIX,
        started_at.format("%Y%m%d-%H%M%S"),
        &id[..8],
        LOG_SUFFIX
    )
}

/// Delete the oldest session logs so at most `keep` remain. Returns how many were removed.
///
/// Names sort chronologically, so lexical order is age order.
pub fn prune_session_logs(dir: &Path, keep: usize) -> crate::error::Result<usize> {
    let mut logs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(LOG_PREFIX) && n.ends_with(LOG_SUFFIX))
                .unwrap_or(false)
        })
        .collect();

    if logs.len() <= keep {
        return Ok(0);
    }

    logs.sort();
    let excess = logs.len() - keep;
    for path in &logs[..excess] {
        std::fs::remove_file(path)?;
    }
    Ok(excess)
}
