use crate::config::LoggingConfig;
use sentry::ClientInitGuard;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

// Crates whose verbosity follows `libs_debug_level`.
const LIBS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

#[derive(thiserror::Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] tracing_subscriber::filter::ParseError),
    #[error("could not open log file: {0}")]
    LogFile(#[from] std::io::Error),
    #[error("invalid sentry dsn: {0}")]
    InvalidSentryDsn(String),
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = vec![config.debug_level.clone()];
    directives.extend(
        LIBS.iter()
            .map(|lib| format!("{lib}={}", config.libs_debug_level)),
    );
    directives.join(",")
}

/// Installs the global tracing subscriber.
///
/// The returned guard flushes pending Sentry events on drop, keep it alive until exit.
pub fn init(config: &LoggingConfig) -> Result<Option<ClientInitGuard>, LoggingError> {
    let filter = EnvFilter::try_new(filter_directives(config))?;

    let writer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let sentry_guard = match &config.sentry_dsn {
        Some(dsn) => {
            let dsn: sentry::types::Dsn = dsn
                .parse()
                .map_err(|e| LoggingError::InvalidSentryDsn(format!("{e}")))?;
            Some(sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            )))
        }
        None => None,
    };
    let sentry_layer = sentry_guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(config.log_file.is_none()),
        )
        .with(sentry_layer)
        .try_init()?;

    Ok(sentry_guard)
}
