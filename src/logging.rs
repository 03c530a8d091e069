//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! The worker (`start`) writes machine-readable JSON with daily rotation next
//! to a human console layer; one-shot subcommands log to stderr only. The
//! `RUST_LOG` environment variable filters both (default: `info`).

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the non-blocking file writer alive.
///
/// Dropping the guard flushes pending entries, so the worker holds it for
/// the whole process lifetime.
pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise logging for the long-running worker.
///
/// JSON events go to `{logs_dir}/fathom.jsonl.YYYY-MM-DD`; a compact console
/// layer mirrors them to stderr.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_worker(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!("failed to create logs directory {}: {e}", logs_dir.display())
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "fathom.jsonl");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();

    Ok(LoggingGuard {
        _guard: Some(guard),
    })
}

/// Initialise stderr-only logging for one-shot subcommands.
pub fn init_cli() -> LoggingGuard {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
    LoggingGuard { _guard: None }
}
