use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FedpanelError>;

/// Infrastructure failures: configuration loading, filesystem access
#[derive(Error, Debug)]
pub enum FedpanelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load configuration from '{path}': {source}")]
    ConfigLoadFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid configuration: {issue}. {suggestion}")]
    ConfigInvalid { issue: String, suggestion: String },
}

/// Classification of every failure a consumer may observe.
///
/// Consumers branch on the kind only, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotSupported,
    AuthorizationDenied,
    Unconfirmed,
    Timeout,
    Cancelled,
    CommandFailed,
    NotReversible,
    IoFailure,
}

impl ErrorKind {
    /// Recoverability assumed when the producer has no better information
    pub fn default_recoverable(self) -> bool {
        !matches!(self, ErrorKind::Timeout | ErrorKind::CommandFailed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotSupported => "not-supported",
            ErrorKind::AuthorizationDenied => "authorization-denied",
            ErrorKind::Unconfirmed => "unconfirmed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::CommandFailed => "command-failed",
            ErrorKind::NotReversible => "not-reversible",
            ErrorKind::IoFailure => "io-failure",
        };
        f.write_str(name)
    }
}

/// Underlying reason attached to an [`ActionError`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCause {
    Nested(Box<ActionError>),
    Message(String),
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::Nested(inner) => write!(f, "{}", inner),
            ErrorCause::Message(message) => f.write_str(message),
        }
    }
}

/// The uniform failure value produced by every layer of the action core.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("[{code}] {hint}")]
pub struct ActionError {
    pub kind: ErrorKind,
    /// Stable machine-readable identifier, e.g. `validation.path_traversal`
    pub code: String,
    /// Remediation text intended for direct display
    pub hint: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorCause>,
}

impl ActionError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            hint: hint.into(),
            recoverable: kind.default_recoverable(),
            cause: None,
        }
    }

    pub fn validation(code: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, hint)
    }

    pub fn not_supported(code: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSupported, code, hint)
    }

    pub fn authorization_denied(code: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthorizationDenied, code, hint)
    }

    pub fn unconfirmed(code: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unconfirmed, code, hint)
    }

    pub fn timeout(code: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, code, hint)
    }

    pub fn cancelled(code: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, code, hint)
    }

    pub fn command_failed(code: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::CommandFailed, code, hint)
    }

    pub fn not_reversible(code: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotReversible, code, hint)
    }

    pub fn io_failure(code: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoFailure, code, hint)
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.cause = Some(ErrorCause::Message(message.into()));
        self
    }

    pub fn with_source(mut self, inner: ActionError) -> Self {
        self.cause = Some(ErrorCause::Nested(Box::new(inner)));
        self
    }

    /// Hint followed by the cause chain, for "show details" views
    pub fn detailed(&self) -> String {
        match &self.cause {
            Some(cause) => format!("{}\n  caused by: {}", self, cause),
            None => self.to_string(),
        }
    }
}

impl From<FedpanelError> for ActionError {
    fn from(err: FedpanelError) -> Self {
        ActionError::io_failure("io.internal", "A local storage operation failed")
            .with_message(err.to_string())
    }
}
