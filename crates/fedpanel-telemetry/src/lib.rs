//! # Fedpanel Telemetry
//!
//! Logging bootstrap shared by every Fedpanel front end.
//!
//! ## Features
//!
//! - **Structured Logging**: JSON and human-readable formats with `tracing`
//! - **File Output**: daily rolling log files written through a non-blocking appender
//! - **Configurable**: TOML configuration with environment overrides and `RUST_LOG`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedpanel_telemetry::{TelemetryConfig, TelemetrySystem};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fedpanel_telemetry::Error> {
//!     let config = TelemetryConfig::default();
//!     let _guard = TelemetrySystem::init(config).await?;
//!
//!     tracing::info!("Application started");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod system;

pub use config::{LogFormat, LogLevel, LoggingConfig, TelemetryConfig};
pub use system::{TelemetryGuard, TelemetrySystem};

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Telemetry-specific errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Telemetry system error: {message}")]
    System { message: String },
}
