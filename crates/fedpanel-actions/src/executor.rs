//! Timeout-bounded, cancellable process execution.
//!
//! One descriptor runs at a time per executor. Output is streamed to the
//! caller as it arrives and retained up to a fixed size per stream.

use async_trait::async_trait;
use fedpanel_core::{
    ActionError, CommandDescriptor, ExecutionResult, ExecutionState, OutputChunk, OutputStream,
};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Broker exit codes meaning the user dismissed or failed authentication
const BROKER_DENIED_CODES: [i32; 2] = [126, 127];

/// How long to keep collecting output after the process is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Anything that can turn a descriptor into an execution result
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        descriptor: CommandDescriptor,
        on_output: &mut (dyn FnMut(OutputChunk) + Send),
        cancel: CancellationToken,
    ) -> ExecutionResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub grace_period: Duration,
    pub max_output_bytes: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Tail-retaining text buffer
#[derive(Debug)]
struct BoundedOutput {
    text: String,
    limit: usize,
    truncated: bool,
}

impl BoundedOutput {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);
        if self.text.len() > self.limit {
            let mut cut = self.text.len() - self.limit;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
            self.truncated = true;
        }
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

pub struct AsyncExecutor {
    settings: ExecutorSettings,
    run_lock: Mutex<()>,
}

impl Default for AsyncExecutor {
    fn default() -> Self {
        Self::new(ExecutorSettings::default())
    }
}

impl AsyncExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self {
            settings,
            run_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> ExecutorSettings {
        self.settings
    }

    pub async fn execute(
        &self,
        descriptor: CommandDescriptor,
        on_output: &mut (dyn FnMut(OutputChunk) + Send),
        cancel: CancellationToken,
    ) -> ExecutionResult {
        if descriptor.timeout_seconds() == 0 {
            return ExecutionResult::rejected(ActionError::validation(
                "executor.missing_timeout",
                format!(
                    "'{}' has no timeout; every command needs a positive timeout",
                    descriptor.action_id()
                ),
            ));
        }

        let _guard = tokio::select! {
            guard = self.run_lock.lock() => guard,
            _ = cancel.cancelled() => return cancelled_before_start(&descriptor),
        };
        if cancel.is_cancelled() {
            return cancelled_before_start(&descriptor);
        }

        self.run_locked(descriptor, on_output, cancel).await
    }

    /// Synchronous variant for callers without a runtime; must not be called
    /// from inside one
    pub fn execute_blocking(
        &self,
        descriptor: CommandDescriptor,
        on_output: &mut (dyn FnMut(OutputChunk) + Send),
        cancel: CancellationToken,
    ) -> ExecutionResult {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(self.execute(descriptor, on_output, cancel)),
            Err(e) => ExecutionResult::rejected(
                ActionError::io_failure(
                    "executor.runtime_unavailable",
                    "Could not start the command runtime",
                )
                .with_message(e.to_string()),
            ),
        }
    }

    async fn run_locked(
        &self,
        descriptor: CommandDescriptor,
        on_output: &mut (dyn FnMut(OutputChunk) + Send),
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        info!(
            action_id = descriptor.action_id(),
            command = %descriptor.display_command(),
            timeout_seconds = descriptor.timeout_seconds(),
            "Executing command"
        );

        let mut command = Command::new(descriptor.binary());
        command
            .args(descriptor.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(action_id = descriptor.action_id(), error = %e, "Failed to spawn command");
                return ExecutionResult::rejected(
                    ActionError::command_failed(
                        "executor.spawn_failed",
                        format!("Could not start '{}'", descriptor.target_binary()),
                    )
                    .with_message(e.to_string()),
                );
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers: Vec<JoinHandle<()>> = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, OutputStream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut stdout = BoundedOutput::new(self.settings.max_output_bytes);
        let mut stderr = BoundedOutput::new(self.settings.max_output_bytes);
        let mut deliver = |chunk: OutputChunk| {
            match chunk.stream {
                OutputStream::Stdout => stdout.push(&chunk.text),
                OutputStream::Stderr => stderr.push(&chunk.text),
            }
            on_output(chunk);
        };

        let deadline = tokio::time::sleep(Duration::from_secs(descriptor.timeout_seconds()));
        tokio::pin!(deadline);
        let mut streams_open = true;

        let outcome = loop {
            tokio::select! {
                chunk = rx.recv(), if streams_open => match chunk {
                    Some(chunk) => deliver(chunk),
                    None => streams_open = false,
                },
                status = child.wait() => break Outcome::Exited(status),
                _ = &mut deadline => break Outcome::TimedOut,
                _ = cancel.cancelled() => break Outcome::Cancelled,
            }
        };

        let (status, timed_out) = match outcome {
            Outcome::Exited(status) => (Some(status), false),
            Outcome::TimedOut => {
                self.terminate_then_kill(&mut child, &descriptor).await;
                (None, true)
            }
            Outcome::Cancelled => {
                self.terminate_then_kill(&mut child, &descriptor).await;
                (None, false)
            }
        };

        // Drain whatever the readers still hold
        let drain_deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while let Ok(Some(chunk)) = tokio::time::timeout_at(drain_deadline, rx.recv()).await {
            deliver(chunk);
        }
        for reader in readers {
            reader.abort();
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let (exit_code, state, error) = match (status, timed_out) {
            (Some(Ok(status)), _) => classify_exit(&descriptor, status, &stderr.text),
            (Some(Err(e)), _) => (
                None,
                ExecutionState::Failed,
                Some(
                    ActionError::command_failed(
                        "executor.wait_failed",
                        "Lost track of the running command",
                    )
                    .with_message(e.to_string()),
                ),
            ),
            (None, true) => (
                None,
                ExecutionState::TimedOut,
                Some(ActionError::timeout(
                    "executor.timeout",
                    format!(
                        "Stopped after {} seconds; check the system state before retrying",
                        descriptor.timeout_seconds()
                    ),
                )),
            ),
            (None, false) => (
                None,
                ExecutionState::Cancelled,
                Some(ActionError::cancelled(
                    "executor.cancelled",
                    "The command was cancelled",
                )),
            ),
        };

        info!(
            action_id = descriptor.action_id(),
            state = ?state,
            exit_code = ?exit_code,
            duration_ms,
            "Command finished"
        );

        ExecutionResult {
            success: error.is_none(),
            exit_code,
            output_truncated: stdout.truncated || stderr.truncated,
            stdout: stdout.text,
            stderr: stderr.text,
            duration_ms,
            error,
            dry_run: false,
            state,
            warnings: Vec::new(),
        }
    }

    /// SIGTERM the process group, wait the grace period, then SIGKILL
    async fn terminate_then_kill(&self, child: &mut Child, descriptor: &CommandDescriptor) {
        let Some(pid) = child.id() else {
            return;
        };
        let group = Pid::from_raw(pid as i32);

        if let Err(e) = killpg(group, Signal::SIGTERM) {
            debug!(action_id = descriptor.action_id(), error = %e, "SIGTERM failed");
        }
        if tokio::time::timeout(self.settings.grace_period, child.wait())
            .await
            .is_ok()
        {
            return;
        }

        warn!(
            action_id = descriptor.action_id(),
            grace_ms = self.settings.grace_period.as_millis() as u64,
            "Command ignored SIGTERM, killing"
        );
        if let Err(e) = killpg(group, Signal::SIGKILL) {
            debug!(action_id = descriptor.action_id(), error = %e, "SIGKILL failed");
        }
        let _ = child.start_kill();
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, child.wait()).await;
    }
}

#[async_trait]
impl CommandRunner for AsyncExecutor {
    async fn run(
        &self,
        descriptor: CommandDescriptor,
        on_output: &mut (dyn FnMut(OutputChunk) + Send),
        cancel: CancellationToken,
    ) -> ExecutionResult {
        self.execute(descriptor, on_output, cancel).await
    }
}

/// Result for a dry run: the command is logged, never spawned
pub fn preview(descriptor: &CommandDescriptor) -> ExecutionResult {
    info!(
        action_id = descriptor.action_id(),
        command = %descriptor.display_command(),
        "Dry run, would execute"
    );
    ExecutionResult::dry_run(descriptor)
}

fn cancelled_before_start(descriptor: &CommandDescriptor) -> ExecutionResult {
    debug!(action_id = descriptor.action_id(), "Cancelled before start");
    ExecutionResult::rejected(ActionError::cancelled(
        "executor.cancelled",
        "The command was cancelled before it started",
    ))
}

fn classify_exit(
    descriptor: &CommandDescriptor,
    status: ExitStatus,
    stderr: &str,
) -> (Option<i32>, ExecutionState, Option<ActionError>) {
    let code = status.code();
    if status.success() {
        return (code, ExecutionState::Completed, None);
    }

    let detail = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .to_string();

    let error = match code {
        Some(code) if descriptor.requires_escalation() && BROKER_DENIED_CODES.contains(&code) => {
            ActionError::authorization_denied(
                "escalation.denied",
                "Authorization was refused or the prompt was dismissed; approve it to continue",
            )
        }
        Some(code) => ActionError::command_failed(
            "executor.exit_status",
            format!(
                "'{}' failed with exit status {}",
                descriptor.target_binary(),
                code
            ),
        ),
        None => ActionError::command_failed(
            "executor.signalled",
            format!("'{}' was terminated by a signal", descriptor.target_binary()),
        ),
    };
    let error = if detail.is_empty() {
        error
    } else {
        error.with_message(detail)
    };
    (code, ExecutionState::Failed, Some(error))
}

/// Forward output as it arrives, without waiting for a newline, so progress
/// bars redrawn with `\r` still reach the caller
fn spawn_reader<R>(
    mut reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<OutputChunk>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = vec![0u8; READ_CHUNK_BYTES];
        let mut pending = Vec::new();
        loop {
            match reader.read(&mut buffer).await {
                Ok(0) => break,
                Ok(read) => {
                    pending.extend_from_slice(&buffer[..read]);
                    let complete = pending.len() - incomplete_utf8_tail(&pending);
                    if complete == 0 {
                        continue;
                    }
                    let text = String::from_utf8_lossy(&pending[..complete]).into_owned();
                    pending.drain(..complete);
                    if tx.send(OutputChunk { stream, text }).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(stream = ?stream, error = %e, "Output stream read failed");
                    break;
                }
            }
        }
        if !pending.is_empty() {
            let text = String::from_utf8_lossy(&pending).into_owned();
            let _ = tx.send(OutputChunk { stream, text });
        }
    })
}

/// Length of a multi-byte character cut off at the end of `bytes`
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        // Skip continuation bytes until the lead byte
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}
