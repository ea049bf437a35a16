use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::errors::types::{Error, Result};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log spans
    pub log_spans: bool,
    /// Application name to include in logs
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "wephone".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span logging
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Set up the logging system with the provided configuration.
///
/// `RUST_LOG` still wins over the configured level when set.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let mut subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events);

    if config.file_info {
        subscriber = subscriber.with_file(true).with_line_number(true);
    }

    if config.json {
        subscriber
            .with_writer(std::io::stdout)
            .json()
            .try_init()
            .map_err(|e| Error::Logging(e.to_string()))?;
    } else {
        subscriber
            .try_init()
            .map_err(|e| Error::Logging(e.to_string()))?;
    }

    tracing::info!("Logging initialized for {}", config.app_name);
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::Config(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level_accepts_any_case() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("Trace").unwrap(), Level::TRACE);
    }

    #[test]
    fn test_parse_log_level_rejects_garbage() {
        assert!(matches!(parse_log_level("shouting"), Err(Error::Config(_))));
        assert!(matches!(parse_log_level(""), Err(Error::Config(_))));
    }

    #[test]
    fn test_init_logging_claims_the_global_subscriber_once() {
        assert!(init_logging(LoggingConfig::default()).is_ok());

        // The global default is already taken; a second init reports a
        // logging error instead of panicking, json path included.
        let second = init_logging(LoggingConfig::new(Level::DEBUG, "wephone-test").with_json());
        assert!(matches!(second, Err(Error::Logging(_))));
    }
}
