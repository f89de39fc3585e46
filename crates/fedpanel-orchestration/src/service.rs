use anyhow::{Context, Result};
use fedpanel_actions::{
    preview, ActionCatalog, ActionSpec, AsyncExecutor, CommandBuilder, CommandRunner,
    ExecutorSettings, HistoryEntry, HistoryManager, SystemMode, SystemModeCache,
    SystemModeDetector,
};
use fedpanel_core::{
    ActionError, CapabilityCategory, CommandDescriptor, Config, ExecutionResult, OperationRequest,
    OutputChunk,
};
use fedpanel_security::{
    sanitize_parameters, Acknowledgement, AuditLogger, AuditRecord, EscalationBroker,
    ParameterValidator, SafetyGuard,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const CHECKPOINT_ACTION: &str = "storage.snapshot_create";

/// Streaming form of a submission; the last event is always `Finished`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Output(OutputChunk),
    Finished(ExecutionResult),
}

/// Components the service is assembled from
pub struct ServiceParts {
    pub builder: CommandBuilder,
    pub validator: ParameterValidator,
    pub guard: SafetyGuard,
    pub runner: Arc<dyn CommandRunner>,
    pub audit: Arc<AuditLogger>,
    pub history: Arc<HistoryManager>,
    pub mode: SystemModeCache,
}

/// Entry point shared by the GUI, CLI and daemon front ends.
///
/// Runs every request through validation, command building, the safety gate,
/// execution, auditing and history, and reports the outcome as an
/// [`ExecutionResult`]. Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct ActionService {
    parts: Arc<ServiceParts>,
}

impl ActionService {
    pub fn new(parts: ServiceParts) -> Self {
        Self {
            parts: Arc::new(parts),
        }
    }

    /// Wire the real components from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let user_config_dir = config.user_config_dir()?;
        let catalog = Arc::new(ActionCatalog::fedora(user_config_dir));
        let broker = EscalationBroker::new(config.escalation.broker.clone())
            .context("Invalid escalation broker")?;
        let builder = CommandBuilder::new(
            catalog,
            broker,
            config.executor.default_timeout_seconds,
        );

        let executor = AsyncExecutor::new(ExecutorSettings {
            grace_period: Duration::from_secs(config.executor.grace_period_seconds),
            max_output_bytes: config.executor.max_output_bytes,
        });
        let audit = AuditLogger::new(
            config.audit_log_path()?,
            config.audit.max_file_size_bytes,
            config.audit.max_generations,
        );
        let history = HistoryManager::load(config.history_store_path()?, config.history.capacity);

        info!(
            broker = %config.escalation.broker,
            audit_log = %audit.path().display(),
            "Action service configured"
        );

        Ok(Self::new(ServiceParts {
            builder,
            validator: ParameterValidator::new()?,
            guard: SafetyGuard::new(config.safety.require_checkpoint_for_high_risk),
            runner: Arc::new(executor),
            audit: Arc::new(audit),
            history: Arc::new(history),
            mode: SystemModeCache::new(SystemModeDetector::new()),
        }))
    }

    pub fn catalog(&self) -> &ActionCatalog {
        self.parts.builder.catalog()
    }

    pub async fn mode(&self) -> SystemMode {
        self.parts.mode.current().await
    }

    pub async fn refresh_mode(&self) -> SystemMode {
        self.parts.mode.refresh().await
    }

    pub fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.parts.history.list(limit)
    }

    pub async fn submit(
        &self,
        request: OperationRequest,
        ack: Acknowledgement,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        self.submit_with_output(request, ack, cancel, &mut |_| {})
            .await
    }

    /// Submit and receive output chunks through `on_output` while the command runs
    #[instrument(skip_all, fields(action_id = request.action_id(), dry_run = request.is_dry_run()))]
    pub async fn submit_with_output(
        &self,
        request: OperationRequest,
        ack: Acknowledgement,
        cancel: CancellationToken,
        on_output: &mut (dyn FnMut(OutputChunk) + Send),
    ) -> ExecutionResult {
        let spec = match self.parts.builder.catalog().lookup(&request) {
            Ok(spec) => spec,
            Err(error) => return self.reject(&request, None, error).await,
        };

        if let Err(error) =
            self.parts
                .validator
                .validate(&spec.id, &spec.schema, request.parameters())
        {
            return self.reject(&request, Some(spec), error).await;
        }

        let mode = self.parts.mode.current().await;
        let descriptor = match self.parts.builder.build(&request, &mode) {
            Ok(descriptor) => descriptor,
            Err(error) => return self.reject(&request, Some(spec), error).await,
        };

        if request.is_dry_run() {
            let result = preview(&descriptor);
            return self.audited(&request, Some(spec), result, false).await;
        }

        if spec.mutating {
            let assessment = self
                .parts
                .guard
                .assess(spec.category, spec.risk, mode.checkpoint_available);
            if let Err(error) = self.parts.guard.gate(&assessment, ack) {
                return self.reject(&request, Some(spec), error).await;
            }
        }

        let undo = if spec.mutating {
            self.undo_descriptor(&request, &mode)
        } else {
            None
        };
        let description = descriptor.description().to_string();

        let result = self
            .parts
            .runner
            .run(descriptor, on_output, cancel)
            .await;
        let mut result = self.audited(&request, Some(spec), result, true).await;

        if result.success && spec.mutating {
            let entry = HistoryEntry::new(spec.id.clone(), description, undo).with_parameters(
                sanitize_parameters(request.parameters(), Some(&spec.schema)),
            );
            if let Err(warning) = self.record_history(entry).await {
                result = result.with_warning(warning);
            }
        }
        result
    }

    /// Submit in the background and stream progress as events
    pub fn submit_streaming(
        &self,
        request: OperationRequest,
        ack: Acknowledgement,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = self.clone();
        tokio::spawn(async move {
            let output_tx = tx.clone();
            let result = service
                .submit_with_output(request, ack, cancel, &mut |chunk| {
                    let _ = output_tx.send(ExecutionEvent::Output(chunk));
                })
                .await;
            let _ = tx.send(ExecutionEvent::Finished(result));
        });
        rx
    }

    /// Reverse the most recent recorded action.
    ///
    /// The inverse command passes the same safety gate as a direct request
    /// for the undo action, so `ack` must cover its risk.
    #[instrument(skip_all)]
    pub async fn undo_last(
        &self,
        ack: Acknowledgement,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ActionError> {
        let (audit_id, parameters) = match self.parts.history.latest() {
            Some(entry) => (format!("undo:{}", entry.action_id), entry.parameters),
            None => ("undo".to_string(), BTreeMap::new()),
        };

        match self.run_undo(ack, cancel).await {
            Ok(result) => {
                let record = AuditRecord::new(
                    audit_id,
                    parameters,
                    result.exit_code,
                    Some(result.stderr.as_str()),
                    false,
                );
                Ok(match self.write_audit(record).await {
                    Ok(()) => result,
                    Err(warning) => result.with_warning(warning),
                })
            }
            Err(mut error) => {
                warn!(kind = %error.kind, code = %error.code, "Undo refused");
                let record = AuditRecord::new(audit_id, parameters, None, None, false);
                if let Err(audit_error) = self.write_audit(record).await {
                    if error.cause.is_none() {
                        error = error.with_source(audit_error);
                    }
                }
                Err(error)
            }
        }
    }

    async fn run_undo(
        &self,
        ack: Acknowledgement,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ActionError> {
        let (entry, descriptor) = self.parts.history.reversible_top()?;
        let spec = self.catalog().get(descriptor.action_id()).ok_or_else(|| {
            ActionError::not_supported(
                "history.unknown_undo_action",
                format!(
                    "The stored undo action '{}' is no longer supported",
                    descriptor.action_id()
                ),
            )
        })?;

        let mode = self.parts.mode.current().await;
        let assessment = self
            .parts
            .guard
            .assess(spec.category, spec.risk, mode.checkpoint_available);
        self.parts.guard.gate(&assessment, ack)?;

        self.parts
            .history
            .undo_entry(
                &entry,
                descriptor,
                self.parts.runner.as_ref(),
                self.parts.builder.broker(),
                cancel,
            )
            .await
    }

    /// Take a system snapshot ahead of a high-risk action
    pub async fn take_checkpoint(
        &self,
        description: &str,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let request = OperationRequest::new(CapabilityCategory::Storage, CHECKPOINT_ACTION)
            .param("description", description);
        self.submit(request, Acknowledgement::confirmed(), cancel)
            .await
    }

    fn undo_descriptor(
        &self,
        request: &OperationRequest,
        mode: &SystemMode,
    ) -> Option<CommandDescriptor> {
        match self.parts.builder.build_undo(request, mode) {
            Ok(undo) => undo,
            Err(error) => {
                debug!(code = %error.code, "No undo command for this action");
                None
            }
        }
    }

    async fn reject(
        &self,
        request: &OperationRequest,
        spec: Option<&ActionSpec>,
        error: ActionError,
    ) -> ExecutionResult {
        warn!(
            action_id = request.action_id(),
            kind = %error.kind,
            code = %error.code,
            "Request rejected"
        );
        let result = ExecutionResult::rejected(error).with_dry_run(request.is_dry_run());
        self.audited(request, spec, result, false).await
    }

    /// Write the single audit record for `result`
    async fn audited(
        &self,
        request: &OperationRequest,
        spec: Option<&ActionSpec>,
        result: ExecutionResult,
        process_ran: bool,
    ) -> ExecutionResult {
        let record = AuditRecord::new(
            request.action_id(),
            sanitize_parameters(request.parameters(), spec.map(|s| &s.schema)),
            result.exit_code,
            process_ran.then_some(result.stderr.as_str()),
            result.dry_run,
        );
        match self.write_audit(record).await {
            Ok(()) => result,
            Err(warning) => result.with_warning(warning),
        }
    }

    // Both stores fsync on every write, so they run on the blocking pool
    async fn write_audit(&self, record: AuditRecord) -> Result<(), ActionError> {
        let audit = Arc::clone(&self.parts.audit);
        tokio::task::spawn_blocking(move || audit.record(&record))
            .await
            .unwrap_or_else(|e| {
                Err(ActionError::io_failure(
                    "audit.write_failed",
                    "The action ran but its audit record could not be written",
                )
                .with_message(e.to_string()))
            })
    }

    async fn record_history(&self, entry: HistoryEntry) -> Result<(), ActionError> {
        let history = Arc::clone(&self.parts.history);
        tokio::task::spawn_blocking(move || history.record(entry))
            .await
            .unwrap_or_else(|e| {
                Err(ActionError::io_failure(
                    "history.write_failed",
                    "The action ran but the undo history could not be saved",
                )
                .with_message(e.to_string()))
            })
    }
}
