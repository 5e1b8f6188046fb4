//! Three tracing layers: compact stdout, daily-rotated text file and
//! daily-rotated JSON file, all under `<data-dir>/logs/`.

use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const TEXT_LOG_FILE: &str = "app.log";
pub const JSON_LOG_FILE: &str = "app.json.log";

/// `RUST_LOG` if set, otherwise `default_level`.
pub fn env_filter(default_level: &str) -> Result<EnvFilter, Box<dyn std::error::Error>> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(default_level)?),
    }
}

/// Install the global subscriber writing to `log_dir`.
///
/// The appender guards are leaked so buffered lines are written for the
/// whole life of the process. Fails if a subscriber is already installed.
pub fn init_logging<P: AsRef<Path>>(log_dir: P, default_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;
    // one filter per layer
    let (text_filter, json_filter, stdout_filter) = (
        env_filter(default_level)?,
        env_filter(default_level)?,
        env_filter(default_level)?,
    );

    let (text_writer, text_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_path, TEXT_LOG_FILE));
    let (json_writer, json_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_path, JSON_LOG_FILE));

    let text_layer = fmt::layer()
        .with_writer(text_writer)
        .with_target(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_filter(text_filter);

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_writer)
        .with_target(true)
        .with_line_number(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(json_filter);

    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(stdout_filter);

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(stdout_layer)
        .try_init()?;

    Box::leak(Box::new(text_guard));
    Box::leak(Box::new(json_guard));

    tracing::debug!(dir = %log_path.display(), "logging initialized");
    Ok(())
}

pub fn log_dir_in(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Logs go to `<data_dir>/logs/`, next to the crawl targets.
pub fn init_logging_in_data_dir<P: AsRef<Path>>(data_dir: P, default_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(log_dir_in(data_dir.as_ref()), default_level)
}
