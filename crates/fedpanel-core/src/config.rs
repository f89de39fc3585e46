use crate::{FedpanelError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub escalation: EscalationConfig,
    pub audit: AuditConfig,
    pub history: HistoryConfig,
    pub safety: SafetyConfig,
    pub paths: PathsConfig,
    pub telemetry: TelemetryConfigRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfigRef {
    pub config_path: Option<PathBuf>,
    pub enabled: bool,
}

impl Default for TelemetryConfigRef {
    fn default() -> Self {
        Self {
            config_path: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Used by actions that do not declare their own timeout
    pub default_timeout_seconds: u64,
    /// Time between the terminate signal and the forced kill
    pub grace_period_seconds: u64,
    /// Retained output per stream; older output is dropped first
    pub max_output_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 300,
            grace_period_seconds: 5,
            max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub broker: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            broker: "/usr/bin/pkexec".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub log_path: Option<PathBuf>,
    pub max_file_size_bytes: u64,
    pub max_generations: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            max_file_size_bytes: 5 * 1024 * 1024,
            max_generations: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub store_path: Option<PathBuf>,
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            capacity: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub require_checkpoint_for_high_risk: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            require_checkpoint_for_high_risk: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Base directory that user-supplied path parameters must stay under
    pub user_config_dir: Option<PathBuf>,
}

impl Config {
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        let mut config = if config_file.exists() {
            info!("Loading config from: {}", config_file.display());
            let content = tokio::fs::read_to_string(&config_file)
                .await
                .map_err(|e| FedpanelError::FileRead {
                    path: config_file.display().to_string(),
                    source: e,
                })?;
            toml::from_str::<Config>(&content).map_err(|e| FedpanelError::ConfigLoadFailed {
                path: config_file.display().to_string(),
                source: Box::new(e),
            })?
        } else {
            info!("No config file found, using defaults");
            Self::default()
        };

        config.load_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("org", "fedpanel", "fedpanel").ok_or_else(|| {
            FedpanelError::ConfigInvalid {
                issue: "Could not determine config directory".to_string(),
                suggestion: "Ensure your system has proper home directory permissions".to_string(),
            }
        })
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    pub fn audit_log_path(&self) -> Result<PathBuf> {
        match &self.audit.log_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.data_local_dir().join("audit.jsonl")),
        }
    }

    pub fn history_store_path(&self) -> Result<PathBuf> {
        match &self.history.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.data_local_dir().join("history.json")),
        }
    }

    pub fn user_config_dir(&self) -> Result<PathBuf> {
        match &self.paths.user_config_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.config_dir().to_path_buf()),
        }
    }

    fn load_env_overrides(&mut self) {
        if let Ok(broker) = std::env::var("FEDPANEL_BROKER") {
            self.escalation.broker = broker;
        }
        if let Ok(path) = std::env::var("FEDPANEL_AUDIT_LOG") {
            self.audit.log_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("FEDPANEL_HISTORY_PATH") {
            self.history.store_path = Some(PathBuf::from(path));
        }
        if let Some(timeout) = parse_env_u64("FEDPANEL_DEFAULT_TIMEOUT") {
            self.executor.default_timeout_seconds = timeout;
        }
        if let Some(grace) = parse_env_u64("FEDPANEL_GRACE_PERIOD") {
            self.executor.grace_period_seconds = grace;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |issue: &str, suggestion: &str| {
            Err(FedpanelError::ConfigInvalid {
                issue: issue.to_string(),
                suggestion: suggestion.to_string(),
            })
        };

        if self.executor.default_timeout_seconds == 0 {
            return invalid(
                "executor.default_timeout_seconds is 0",
                "Every command needs a finite positive timeout",
            );
        }
        if self.executor.grace_period_seconds == 0 {
            return invalid(
                "executor.grace_period_seconds is 0",
                "Use a grace period of at least 1 second",
            );
        }
        if self.executor.max_output_bytes == 0 {
            return invalid(
                "executor.max_output_bytes is 0",
                "Retain at least a few kilobytes of output",
            );
        }
        if !Path::new(&self.escalation.broker).is_absolute() {
            return invalid(
                "escalation.broker is not an absolute path",
                "Set it to the full path of the broker, e.g. /usr/bin/pkexec",
            );
        }
        if self.audit.max_generations == 0 {
            return invalid(
                "audit.max_generations is 0",
                "Keep at least one rotated generation",
            );
        }
        if self.audit.max_file_size_bytes == 0 {
            return invalid(
                "audit.max_file_size_bytes is 0",
                "Use a positive rotation threshold",
            );
        }
        if self.history.capacity == 0 {
            return invalid("history.capacity is 0", "Keep at least one history entry");
        }
        Ok(())
    }
}

fn parse_env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring non-numeric override");
            None
        }
    }
}
