//! Telemetry configuration and management

use crate::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::Level;

/// Main telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Global enable/disable toggle
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_enabled() -> bool {
    true
}

/// Logging-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: LogLevel,

    /// Output format (JSON, Pretty, Compact)
    pub format: LogFormat,

    /// Enable console logging
    pub console_enabled: bool,

    /// Enable file logging
    pub file_enabled: bool,

    /// Directory for log files
    pub log_dir: PathBuf,

    /// Base filename for logs
    pub log_file_name: String,

    /// Include source location in logs
    pub include_location: bool,

    /// Include thread names/IDs
    pub include_thread_info: bool,
}

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl LogLevel {
    /// Parse a level name case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "TRACE" => Some(LogLevel::Trace),
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Structured JSON format
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            console_enabled: true,
            file_enabled: false,
            log_dir: TelemetryConfig::default_log_dir().unwrap_or_else(|_| PathBuf::from("./logs")),
            log_file_name: "fedpanel".to_string(),
            include_location: false,
            include_thread_info: false,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from file or create default
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        let mut config = if config_file.exists() {
            let content = tokio::fs::read_to_string(&config_file).await?;
            toml::from_str(&content).map_err(|e| Error::Config {
                message: format!("Failed to parse telemetry config: {}", e),
            })?
        } else {
            Self::default()
        };

        config.load_env_overrides();
        Ok(config)
    }

    /// Load environment variable overrides
    pub fn load_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("FEDPANEL_TELEMETRY_ENABLED") {
            self.enabled = enabled.parse().unwrap_or(self.enabled);
        }

        if let Ok(level) = std::env::var("FEDPANEL_LOG_LEVEL") {
            self.logging.level = LogLevel::parse(&level).unwrap_or(self.logging.level);
        }

        if let Ok(format) = std::env::var("FEDPANEL_LOG_FORMAT") {
            self.logging.format = LogFormat::parse(&format).unwrap_or(self.logging.format);
        }

        if let Ok(enabled) = std::env::var("FEDPANEL_FILE_LOGGING") {
            self.logging.file_enabled = enabled.parse().unwrap_or(self.logging.file_enabled);
        }

        if let Ok(dir) = std::env::var("FEDPANEL_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }
    }

    /// Get default configuration file path
    fn default_config_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("org", "fedpanel", "fedpanel").ok_or_else(|| Error::Config {
                message: "Could not determine config directory".to_string(),
            })?;

        Ok(project_dirs.config_dir().join("telemetry.toml"))
    }

    /// Get default log directory
    fn default_log_dir() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("org", "fedpanel", "fedpanel").ok_or_else(|| Error::Config {
                message: "Could not determine log directory".to_string(),
            })?;

        Ok(project_dirs.data_dir().join("logs"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.logging.file_enabled {
            if !self.logging.log_dir.exists() {
                std::fs::create_dir_all(&self.logging.log_dir)?;
            }

            // Test write permissions
            let test_file = self.logging.log_dir.join(".fedpanel_test");
            std::fs::write(&test_file, "test")?;
            std::fs::remove_file(&test_file)?;
        }

        if self.logging.log_file_name.trim().is_empty() {
            return Err(Error::Config {
                message: "log_file_name must not be empty".to_string(),
            });
        }

        Ok(())
    }
}
