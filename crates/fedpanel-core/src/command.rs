use crate::error::{ActionError, ErrorKind};
use crate::operation::CapabilityCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const MASK: &str = "****";

/// Fully resolved, ready-to-execute form of an operating system command.
///
/// Produced by the command builder and consumed once by the executor. The
/// argument vector is passed to the kernel verbatim; it is never joined into
/// a shell string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    binary: String,
    arguments: Vec<String>,
    description: String,
    requires_escalation: bool,
    capability_category: CapabilityCategory,
    timeout_seconds: u64,
    action_id: String,
    mutating: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    secret_arguments: BTreeSet<usize>,
}

impl CommandDescriptor {
    pub fn new(
        action_id: impl Into<String>,
        capability_category: CapabilityCategory,
        binary: impl Into<String>,
        arguments: Vec<String>,
    ) -> Self {
        let action_id = action_id.into();
        Self {
            binary: binary.into(),
            arguments,
            description: action_id.clone(),
            requires_escalation: false,
            capability_category,
            timeout_seconds: 0,
            action_id,
            mutating: false,
            secret_arguments: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_mutating(mut self, mutating: bool) -> Self {
        self.mutating = mutating;
        self
    }

    /// Mark the argument at `index` as secret so it is masked whenever rendered
    pub fn with_secret_argument(mut self, index: usize) -> Self {
        if index < self.arguments.len() {
            self.secret_arguments.insert(index);
        }
        self
    }

    /// Wrap this descriptor in the escalation broker.
    ///
    /// The result invokes `broker` with the original binary as its first
    /// argument followed by the original argument vector.
    pub fn into_escalated(self, broker: impl Into<String>) -> Self {
        let mut arguments = Vec::with_capacity(self.arguments.len() + 1);
        arguments.push(self.binary);
        arguments.extend(self.arguments);

        Self {
            binary: broker.into(),
            arguments,
            requires_escalation: true,
            secret_arguments: self.secret_arguments.iter().map(|i| i + 1).collect(),
            ..self
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn requires_escalation(&self) -> bool {
        self.requires_escalation
    }

    pub fn capability_category(&self) -> CapabilityCategory {
        self.capability_category
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn is_mutating(&self) -> bool {
        self.mutating
    }

    pub fn is_secret_argument(&self, index: usize) -> bool {
        self.secret_arguments.contains(&index)
    }

    /// The real target binary, looking through the escalation broker
    pub fn target_binary(&self) -> &str {
        if self.requires_escalation {
            self.arguments.first().map(String::as_str).unwrap_or(&self.binary)
        } else {
            &self.binary
        }
    }

    /// Printable command line with secret arguments masked.
    ///
    /// For display and logging only; never executed.
    pub fn display_command(&self) -> String {
        let mut parts = Vec::with_capacity(self.arguments.len() + 1);
        parts.push(quote(&self.binary));
        for (index, argument) in self.arguments.iter().enumerate() {
            if self.is_secret_argument(index) {
                parts.push(MASK.to_string());
            } else {
                parts.push(quote(argument));
            }
        }
        parts.join(" ")
    }
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_command())
    }
}

fn quote(token: &str) -> String {
    if !token.is_empty() && !token.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', "'\\''"))
    }
}

/// Terminal and transient states of a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    TimedOut,
    Cancelled,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionState::Pending | ExecutionState::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// An increment of process output delivered while the process runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputChunk {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }
}

/// Outcome of one execution attempt, including rejected and dry-run attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub error: Option<ActionError>,
    pub dry_run: bool,
    pub state: ExecutionState,
    #[serde(default)]
    pub output_truncated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ActionError>,
}

impl ExecutionResult {
    /// A request refused before any process was spawned
    pub fn rejected(error: ActionError) -> Self {
        let state = match error.kind {
            ErrorKind::Cancelled => ExecutionState::Cancelled,
            ErrorKind::Timeout => ExecutionState::TimedOut,
            _ => ExecutionState::Failed,
        };
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            error: Some(error),
            dry_run: false,
            state,
            output_truncated: false,
            warnings: Vec::new(),
        }
    }

    /// Synthetic success for a request that only previews its command
    pub fn dry_run(descriptor: &CommandDescriptor) -> Self {
        Self {
            success: true,
            exit_code: None,
            stdout: format!("would execute: {}", descriptor.display_command()),
            stderr: String::new(),
            duration_ms: 0,
            error: None,
            dry_run: true,
            state: ExecutionState::Completed,
            output_truncated: false,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: ActionError) -> Self {
        self.warnings.push(warning);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wifi_descriptor() -> CommandDescriptor {
        CommandDescriptor::new(
            "network.wifi_connect",
            CapabilityCategory::Network,
            "/usr/bin/nmcli",
            vec![
                "device".to_string(),
                "wifi".to_string(),
                "connect".to_string(),
                "Home Net".to_string(),
                "password".to_string(),
                "s3cr3t".to_string(),
            ],
        )
        .with_secret_argument(5)
        .with_timeout(60)
    }

    #[test]
    fn test_display_masks_secret_arguments() {
        let descriptor = wifi_descriptor();
        let rendered = descriptor.display_command();
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.ends_with("password ****"));
        assert!(rendered.contains("'Home Net'"));
    }

    #[test]
    fn test_escalation_prepends_real_binary_and_shifts_secrets() {
        let escalated = wifi_descriptor().into_escalated("/usr/bin/pkexec");
        assert!(escalated.requires_escalation());
        assert_eq!(escalated.binary(), "/usr/bin/pkexec");
        assert_eq!(escalated.arguments()[0], "/usr/bin/nmcli");
        assert_eq!(escalated.target_binary(), "/usr/bin/nmcli");
        assert!(escalated.is_secret_argument(6));
        assert!(!escalated.is_secret_argument(5));
        assert!(!escalated.display_command().contains("s3cr3t"));
        assert_eq!(escalated.timeout_seconds(), 60);
    }

    #[test]
    fn test_secret_index_out_of_range_is_ignored() {
        let descriptor = CommandDescriptor::new(
            "service.status",
            CapabilityCategory::Service,
            "/usr/bin/systemctl",
            vec!["status".to_string()],
        )
        .with_secret_argument(4);
        assert!(!descriptor.is_secret_argument(4));
    }

    #[test]
    fn test_descriptor_serde_round_trip_keeps_secrets() {
        let descriptor = wifi_descriptor();
        let json = serde_json::to_string(&descriptor).unwrap();
        let back: CommandDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, descriptor);
        assert!(back.is_secret_argument(5));
    }

    #[test]
    fn test_rejected_result_maps_state() {
        let result = ExecutionResult::rejected(ActionError::validation("validation.x", "bad"));
        assert!(!result.success);
        assert_eq!(result.state, ExecutionState::Failed);
        assert_eq!(result.error_kind(), Some(ErrorKind::Validation));

        let cancelled = ExecutionResult::rejected(ActionError::cancelled("executor.cancelled", "stop"));
        assert_eq!(cancelled.state, ExecutionState::Cancelled);
        assert!(cancelled.state.is_terminal());
    }

    #[test]
    fn test_dry_run_result() {
        let result = ExecutionResult::dry_run(&wifi_descriptor());
        assert!(result.success);
        assert!(result.dry_run);
        assert!(result.stdout.starts_with("would execute: /usr/bin/nmcli"));
        assert!(!result.stdout.contains("s3cr3t"));
        assert!(result.exit_code.is_none());
    }
}
