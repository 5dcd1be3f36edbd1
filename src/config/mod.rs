//! Environment-driven configuration.

pub mod database;
pub mod logging;

pub use database::{DatabaseSettings, PostgresSettings};
pub use logging::{LogFormat, LoggingConfig};
