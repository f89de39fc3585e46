//! Bounded history of completed mutating actions, with undo.

use crate::executor::CommandRunner;
use chrono::{DateTime, Utc};
use fedpanel_core::{ActionError, CommandDescriptor, ExecutionResult, ParamValue};
use fedpanel_security::EscalationBroker;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action_id: String,
    pub description: String,
    /// Request parameters with secrets already redacted
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    /// `None` when the action cannot be reversed
    pub undo_descriptor: Option<CommandDescriptor>,
}

impl HistoryEntry {
    pub fn new(
        action_id: impl Into<String>,
        description: impl Into<String>,
        undo_descriptor: Option<CommandDescriptor>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action_id: action_id.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            undo_descriptor,
        }
    }

    /// Attach the request parameters. Callers pass them sanitized; the
    /// store is plain JSON.
    pub fn with_parameters(mut self, parameters: BTreeMap<String, ParamValue>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn is_reversible(&self) -> bool {
        self.undo_descriptor.is_some()
    }
}

/// Fixed-capacity ring; the slot at `head` is the next one written
#[derive(Debug)]
struct HistoryRing {
    slots: Vec<Option<HistoryEntry>>,
    head: usize,
    len: usize,
}

impl HistoryRing {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Insert, returning the evicted oldest entry when full
    fn push(&mut self, entry: HistoryEntry) -> Option<HistoryEntry> {
        let evicted = self.slots[self.head].replace(entry);
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        evicted
    }

    fn index_from_oldest(&self, offset: usize) -> usize {
        (self.head + self.capacity() - self.len + offset) % self.capacity()
    }

    /// Oldest first
    fn iter(&self) -> impl Iterator<Item = &HistoryEntry> + '_ {
        (0..self.len).filter_map(move |offset| self.slots[self.index_from_oldest(offset)].as_ref())
    }

    fn newest(&self) -> Option<&HistoryEntry> {
        if self.len == 0 {
            return None;
        }
        let index = (self.head + self.capacity() - 1) % self.capacity();
        self.slots[index].as_ref()
    }

    fn remove(&mut self, id: Uuid) -> Option<HistoryEntry> {
        let entries: Vec<HistoryEntry> = self.iter().cloned().collect();
        let position = entries.iter().position(|entry| entry.id == id)?;

        let mut rebuilt = HistoryRing::new(self.capacity());
        let mut removed = None;
        for (index, entry) in entries.into_iter().enumerate() {
            if index == position {
                removed = Some(entry);
            } else {
                rebuilt.push(entry);
            }
        }
        *self = rebuilt;
        removed
    }

    fn to_vec(&self) -> Vec<HistoryEntry> {
        self.iter().cloned().collect()
    }
}

/// Process-wide undo history, persisted after every change
pub struct HistoryManager {
    path: Option<PathBuf>,
    ring: Mutex<HistoryRing>,
}

impl HistoryManager {
    /// History that lives only as long as the process
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            path: None,
            ring: Mutex::new(HistoryRing::new(capacity)),
        }
    }

    /// Load the store at `path`. A missing store starts empty; an unreadable
    /// one is set aside as `<path>.corrupt` and history starts empty.
    pub fn load(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let mut ring = HistoryRing::new(capacity);

        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<HistoryEntry>>(&content) {
                Ok(entries) => {
                    let skip = entries.len().saturating_sub(ring.capacity());
                    for entry in entries.into_iter().skip(skip) {
                        ring.push(entry);
                    }
                    debug!(path = %path.display(), entries = ring.len, "History loaded");
                }
                Err(e) => set_aside_corrupt(&path, &e.to_string()),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => set_aside_corrupt(&path, &e.to_string()),
        }

        Self {
            path: Some(path),
            ring: Mutex::new(ring),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .capacity()
    }

    /// Append an entry, evicting the oldest past capacity. The entry is kept
    /// in memory even when persisting fails.
    pub fn record(&self, entry: HistoryEntry) -> Result<(), ActionError> {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(action_id = %entry.action_id, id = %entry.id, "Recording history entry");
        if let Some(evicted) = ring.push(entry) {
            debug!(action_id = %evicted.action_id, id = %evicted.id, "History entry evicted");
        }
        self.persist(&ring)
    }

    /// The newest `limit` entries, oldest first
    pub fn list(&self, limit: usize) -> Vec<HistoryEntry> {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = ring.len.saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<HistoryEntry> {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .newest()
            .cloned()
    }

    /// Run the inverse of the most recent entry.
    ///
    /// The entry is removed only when the undo command succeeds; an
    /// irreversible top entry leaves the history untouched.
    pub async fn undo_last(
        &self,
        runner: &dyn CommandRunner,
        broker: &EscalationBroker,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ActionError> {
        let (entry, descriptor) = self.reversible_top()?;
        self.undo_entry(&entry, descriptor, runner, broker, cancel)
            .await
    }

    /// Run `descriptor` as the inverse of `entry`.
    ///
    /// The stored command is checked against `broker` first, since the store
    /// lives on disk. Removing the entry afterwards is a small synchronous
    /// write on the calling task.
    pub async fn undo_entry(
        &self,
        entry: &HistoryEntry,
        descriptor: CommandDescriptor,
        runner: &dyn CommandRunner,
        broker: &EscalationBroker,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ActionError> {
        if let Err(error) = broker.verify(&descriptor) {
            warn!(
                action_id = %entry.action_id,
                code = %error.code,
                "Stored undo command failed verification"
            );
            return Err(error);
        }
        info!(
            action_id = %entry.action_id,
            command = %descriptor.display_command(),
            "Undoing last action"
        );

        let mut result = runner.run(descriptor, &mut |_| {}, cancel).await;
        if result.success {
            if let Err(warning) = self.remove(entry.id) {
                result = result.with_warning(warning);
            }
        } else {
            warn!(action_id = %entry.action_id, "Undo command failed, history kept");
        }
        Ok(result)
    }

    /// Top entry and its undo command, or the reason there is nothing to undo
    pub fn reversible_top(&self) -> Result<(HistoryEntry, CommandDescriptor), ActionError> {
        let Some(entry) = self.latest() else {
            return Err(ActionError::not_reversible(
                "history.empty",
                "There is nothing to undo",
            ));
        };
        match entry.undo_descriptor.clone() {
            Some(descriptor) => Ok((entry, descriptor)),
            None => Err(ActionError::not_reversible(
                "history.not_reversible",
                format!("'{}' cannot be undone automatically", entry.description),
            )),
        }
    }

    /// Drop an entry by id, e.g. after its undo ran
    pub fn remove(&self, id: Uuid) -> Result<(), ActionError> {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        if ring.remove(id).is_none() {
            return Ok(());
        }
        self.persist(&ring)
    }

    fn persist(&self, ring: &HistoryRing) -> Result<(), ActionError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        write_atomically(path, &ring.to_vec()).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to persist history");
            ActionError::io_failure(
                "history.write_failed",
                "The action ran but the undo history could not be saved",
            )
            .with_message(e.to_string())
        })
    }
}

fn write_atomically(path: &Path, entries: &[HistoryEntry]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_vec_pretty(entries)?;
    let temp_path = sibling(path, "tmp");

    let mut file = File::create(&temp_path)?;
    file.write_all(&content)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, path)
}

fn set_aside_corrupt(path: &Path, reason: &str) {
    let corrupt = sibling(path, "corrupt");
    warn!(
        path = %path.display(),
        moved_to = %corrupt.display(),
        error = reason,
        "History store unreadable, starting empty"
    );
    if let Err(e) = std::fs::rename(path, &corrupt) {
        warn!(path = %path.display(), error = %e, "Could not set aside history store");
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
