//! Append-only audit trail for privileged actions.
//!
//! One JSON object per line. The file is rotated by size into numbered
//! generations (`audit.jsonl.1` is the newest backup) and is never edited in
//! place.

use crate::validation::ParamSchema;
use chrono::{DateTime, Utc};
use fedpanel_core::{ActionError, ParamValue};
use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub const REDACTED: &str = "[REDACTED]";

/// Parameter names redacted even when no schema marks them secret
const SENSITIVE_NAME_FRAGMENTS: &[&str] =
    &["password", "secret", "token", "passphrase", "api_key", "psk"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub action_id: String,
    pub sanitized_parameters: BTreeMap<String, ParamValue>,
    pub exit_code: Option<i32>,
    /// Lowercase hex SHA-256 of stderr; `None` when no process ran
    pub stderr_hash: Option<String>,
    pub dry_run: bool,
}

impl AuditRecord {
    pub fn new(
        action_id: impl Into<String>,
        sanitized_parameters: BTreeMap<String, ParamValue>,
        exit_code: Option<i32>,
        stderr: Option<&str>,
        dry_run: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            action_id: action_id.into(),
            sanitized_parameters,
            exit_code,
            stderr_hash: stderr.map(hash_stderr),
            dry_run,
        }
    }
}

pub fn hash_stderr(stderr: &str) -> String {
    hex::encode(digest(&SHA256, stderr.as_bytes()).as_ref())
}

/// Copy of `parameters` with secret values replaced by [`REDACTED`]
pub fn sanitize_parameters(
    parameters: &BTreeMap<String, ParamValue>,
    schema: Option<&ParamSchema>,
) -> BTreeMap<String, ParamValue> {
    parameters
        .iter()
        .map(|(name, value)| {
            let secret = schema.map(|s| s.is_secret(name)).unwrap_or(false)
                || looks_sensitive(name);
            let value = if secret {
                ParamValue::Text(REDACTED.to_string())
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

fn looks_sensitive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_NAME_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

struct AuditWriter {
    path: PathBuf,
    max_file_size_bytes: u64,
    max_generations: usize,
    file: Option<File>,
    current_size: u64,
}

impl AuditWriter {
    fn ensure_open(&mut self) -> std::io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .mode(0o600)
                .open(&self.path)?;
            self.current_size = file.metadata()?.len();
            tracing::debug!(
                audit.event = "log_opened",
                path = %self.path.display(),
                current_size = self.current_size,
                "Audit log opened"
            );
            self.file = Some(file);
        }
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "audit log not open",
            )),
        }
    }

    fn generation_path(&self, generation: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", generation));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.file = None;

        let oldest = self.generation_path(self.max_generations);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        for generation in (1..self.max_generations).rev() {
            let from = self.generation_path(generation);
            if from.exists() {
                std::fs::rename(&from, self.generation_path(generation + 1))?;
            }
        }
        if self.path.exists() {
            std::fs::rename(&self.path, self.generation_path(1))?;
        }
        self.current_size = 0;

        tracing::info!(
            audit.event = "log_rotated",
            path = %self.path.display(),
            generations = self.max_generations,
            "Audit log rotated"
        );
        Ok(())
    }

    fn append(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.ensure_open()?;
        if self.current_size > 0 && self.current_size + line.len() as u64 > self.max_file_size_bytes
        {
            self.rotate()?;
        }

        let file = self.ensure_open()?;
        let result = file.write_all(line).and_then(|_| file.sync_data());
        if result.is_err() {
            // Reopen on the next record instead of reusing a handle in an unknown state
            self.file = None;
        } else {
            self.current_size += line.len() as u64;
        }
        result
    }
}

/// Single-writer, synchronously flushed audit log shared by every executor
pub struct AuditLogger {
    writer: Mutex<AuditWriter>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, max_file_size_bytes: u64, max_generations: usize) -> Self {
        Self {
            writer: Mutex::new(AuditWriter {
                path: path.into(),
                max_file_size_bytes,
                max_generations: max_generations.max(1),
                file: None,
                current_size: 0,
            }),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .path
            .clone()
    }

    /// Append one record and flush it to disk.
    ///
    /// A failure is reported to the process log and returned as an
    /// `IoFailure` for the caller to attach as a warning.
    pub fn record(&self, record: &AuditRecord) -> Result<(), ActionError> {
        let mut line = serde_json::to_vec(record).map_err(|e| {
            write_failed(&record.action_id, &e.to_string())
        })?;
        line.push(b'\n');

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer
            .append(&line)
            .map_err(|e| write_failed(&record.action_id, &e.to_string()))
    }
}

fn write_failed(action_id: &str, reason: &str) -> ActionError {
    tracing::error!(
        audit.event = "write_failed",
        action_id,
        error = reason,
        "Failed to write audit record"
    );
    ActionError::io_failure(
        "audit.write_failed",
        "The action ran but could not be written to the audit log",
    )
    .with_message(reason.to_string())
}

/// Read every record of one audit file, skipping lines that fail to parse
pub fn read_records(path: &Path) -> std::io::Result<Vec<AuditRecord>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
