use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

/// Keeps the non-blocking file writer alive. Dropping it flushes the log.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    pub log_path: PathBuf,
    _file_guard: WorkerGuard,
}

/// `RUST_LOG` wins over the configured filter; an unparsable configured
/// filter falls back to `info`.
fn env_filter(config: &DiagnosticsConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.rust_log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn log_file_name(config: &DiagnosticsConfig) -> String {
    let prefix = config.trace_file_prefix.trim();
    let prefix = if prefix.is_empty() { "mixlane" } else { prefix };
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    format!("{prefix}-{timestamp}.log")
}

/// Install the stdout and JSON file layers described by `config`, writing
/// the session log under `log_dir`.
pub fn init_tracing(
    log_dir: impl AsRef<Path>,
    config: &DiagnosticsConfig,
) -> anyhow::Result<TelemetryGuard> {
    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let session_id = Uuid::new_v4();
    let file_name = log_file_name(config);
    let log_path = log_dir.join(&file_name);
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_thread_ids(true)
        .with_target(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(file_writer);

    if let Err(error) = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
    {
        warn!(?error, "global tracing subscriber already initialized");
    } else {
        info!(%session_id, log_path = %log_path.display(), "tracing initialized");
    }

    Ok(TelemetryGuard {
        session_id,
        log_path,
        _file_guard: file_guard,
    })
}
