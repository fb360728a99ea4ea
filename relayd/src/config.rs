use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::LevelFilter;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/relay/relay.yaml";

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Appended to instead of logging to stderr
    pub log_file: Option<PathBuf>,
    pub debug_level: String,
    /// Level for the HTTP client libraries
    pub libs_debug_level: String,
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_file: None,
            debug_level: "info".into(),
            libs_debug_level: "warn".into(),
            sentry_dsn: None,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for level in [&self.debug_level, &self.libs_debug_level] {
            level
                .parse::<LevelFilter>()
                .map_err(|_| ConfigError::InvalidLogLevel(level.clone()))?;
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub logging: Option<LoggingConfig>,
    pub metrics: Option<MetricsConfig>,
    pub relay: relay::config::Config,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(logging) = &self.logging {
            logging.validate()?;
        }
        self.relay.validate()?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid relay config: {0}")]
    InvalidRelayConfig(#[from] relay::config::ValidationError),
    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),
}
