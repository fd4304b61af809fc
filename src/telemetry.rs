//! Subscriber setup for the `agentboard` binary.
//!
//! Human-readable or JSON output on stderr, plus an optional daily-rolling
//! file. `RUST_LOG` takes precedence over the configured level.

use std::path::Path;

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LoggingSection;

const LOG_FILE_PREFIX: &str = "agentboard.log";

/// Keeps the file writer flushing. Hold it until the process exits.
pub struct TelemetryGuard {
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(logging: &LoggingSection) -> TelemetryGuard {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(stderr_layer(logging.json));

    let mut file_guard = None;
    let mut setup_error = None;
    if let Some(dir) = &logging.log_dir {
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let (layer, guard) = file_layer(dir, logging.json);
                layers.push(layer);
                file_guard = Some(guard);
            }
            Err(e) => setup_error = Some(format!("log dir init failed for {}: {}", dir.display(), e)),
        }
    }

    layers.push(Box::new(env_filter(&logging.level)));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = Registry::default().with(layers).try_init();

    if let Some(error) = setup_error {
        tracing::warn!("{}", error);
    }
    TelemetryGuard { _file: file_guard }
}

fn stderr_layer(json: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
    if json {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
    }
}

fn file_layer(
    dir: &Path,
    json: bool,
) -> (
    Box<dyn Layer<Registry> + Send + Sync>,
    tracing_appender::non_blocking::WorkerGuard,
) {
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
    };
    (layer, guard)
}
