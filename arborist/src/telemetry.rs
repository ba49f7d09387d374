use std::{
    path::{Path, PathBuf},
    sync::Once,
};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::cli::Cli;

static INIT: Once = Once::new();

/// Verbosity of the file logs. Stdout follows `RUST_LOG`.
const FILE_FILTER: &str = "info,arborist=debug";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_dir: Option<PathBuf>,
    pub json: bool,
}

impl From<&Cli> for TelemetryConfig {
    fn from(cli: &Cli) -> Self {
        let log_dir = cli.log_dir.trim();
        Self {
            log_dir: (!log_dir.is_empty()).then(|| PathBuf::from(log_dir)),
            json: cli.log_json,
        }
    }
}

pub fn setup_telemetry(config: &TelemetryConfig) {
    INIT.call_once(|| {
        let stdout_layer = fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_filter(env_filter());

        let Some(file_appender) = config.log_dir.as_deref().and_then(file_appender) else {
            tracing_subscriber::registry().with(stdout_layer).init();
            return;
        };

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let json_layer = config.json.then(|| {
            fmt::Layer::new()
                .json()
                .with_writer(non_blocking.clone())
                .with_filter(EnvFilter::new(FILE_FILTER))
        });
        let text_layer = (!config.json).then(|| {
            fmt::Layer::new()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(EnvFilter::new(FILE_FILTER))
        });

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(json_layer)
            .with(text_layer)
            .init();

        // The writer must outlive every log call for the rest of the process.
        std::mem::forget(guard);
    });
}

fn file_appender(dir: &Path) -> Option<RollingFileAppender> {
    match RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix("arborist")
        .filename_suffix("log")
        .max_log_files(48)
        .build(dir)
    {
        Ok(appender) => Some(appender),
        Err(e) => {
            eprintln!(
                "Warning: Failed to create log file appender in {:?}: {}. Logging to stdout only.",
                dir, e
            );
            None
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
