//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! The daemon ([`init_production`]) writes flattened JSON events to a daily
//! file and readable lines to stderr. One-shot subcommands ([`init_cli`]) log
//! to stderr only, leaving stdout to their own output.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix of the daily log files.
pub const LOG_FILE_PREFIX: &str = "mcrelay.log";

/// Filter used when `RUST_LOG` is unset or invalid. The bot library and the
/// file watcher are chatty at `info`.
pub const DEFAULT_DIRECTIVES: &str = "info,teloxide=warn,notify=warn";

/// Keeps the file writer flushing. Drop it last.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Initialise logging for the `start` subcommand.
///
/// Events go to `{logs_dir}/mcrelay.log.YYYY-MM-DD` as JSON with their fields
/// at the top level (so `player` or `command` can be grepped directly), and
/// to stderr as text.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_writer(non_blocking);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(console_layer)
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise stderr-only logging for `check` and `classify`.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn env_filter() -> EnvFilter {
    filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
}

/// Parse `directives`, falling back to [`DEFAULT_DIRECTIVES`].
fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}
