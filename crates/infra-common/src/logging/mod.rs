//! Logging setup shared by wephone binaries and test harnesses.

pub mod setup;

pub use setup::{init_logging, parse_log_level, LoggingConfig};
