//! Append-only event log with file-based and in-memory backends.
//!
//! Events are stored as newline-delimited JSON (JSONL), one file per
//! instance, for simplicity and easy debugging/inspection.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::Event;

use super::error::LedgerError;

/// Durable, append-only storage for instance events
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event; it must be durable once this returns
    async fn append(&self, event: &Event) -> Result<(), LedgerError>;

    /// All events of an instance, in append order
    async fn replay(&self, instance_id: Uuid) -> Result<Vec<Event>, LedgerError>;

    /// Every instance that has at least one event
    async fn list_instances(&self) -> Result<Vec<Uuid>, LedgerError>;
}

/// File-based event store using JSONL format
///
/// Layout: `<base_dir>/<instance-id>/events.jsonl`
pub struct EventStore {
    base_dir: PathBuf,
}

impl EventStore {
    /// Create a store rooted at `base_dir` (created lazily on first append)
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Open the store in the configured location ($DURABATCH_HOME/instances)
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(crate::config::instances_dir()?))
    }

    /// Path to the events file of an instance
    pub fn events_path(&self, instance_id: Uuid) -> PathBuf {
        self.base_dir
            .join(instance_id.to_string())
            .join("events.jsonl")
    }
}

/// Append one line under an exclusive lock and sync it to disk
fn append_locked(path: &Path, line: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;
    let result = file.write_all(line).and_then(|_| file.sync_data());
    let _ = FileExt::unlock(&file);
    result
}

#[async_trait]
impl EventLog for EventStore {
    async fn append(&self, event: &Event) -> Result<(), LedgerError> {
        let path = self.events_path(event.instance_id);
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let target = path.clone();
        tokio::task::spawn_blocking(move || append_locked(&target, &line))
            .await
            .map_err(|e| LedgerError::Unavailable(format!("append task failed: {}", e)))?
            .map_err(|e| LedgerError::io(&path, e))
    }

    async fn replay(&self, instance_id: Uuid) -> Result<Vec<Event>, LedgerError> {
        let path = self.events_path(instance_id);

        if !fs::try_exists(&path)
            .await
            .map_err(|e| LedgerError::io(&path, e))?
        {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .map_err(|e| LedgerError::io(&path, e))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| LedgerError::io(&path, e))?
        {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }

        Ok(events)
    }

    async fn list_instances(&self) -> Result<Vec<Uuid>, LedgerError> {
        if !fs::try_exists(&self.base_dir)
            .await
            .map_err(|e| LedgerError::io(&self.base_dir, e))?
        {
            return Ok(Vec::new());
        }

        let mut instances = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| LedgerError::io(&self.base_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LedgerError::io(&self.base_dir, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            {
                instances.push(id);
            }
        }

        Ok(instances)
    }
}

/// In-process event log; nothing survives the process
#[derive(Default)]
pub struct MemoryEventLog {
    events: RwLock<HashMap<Uuid, Vec<Event>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: &Event) -> Result<(), LedgerError> {
        self.events
            .write()
            .await
            .entry(event.instance_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn replay(&self, instance_id: Uuid) -> Result<Vec<Event>, LedgerError> {
        Ok(self
            .events
            .read()
            .await
            .get(&instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_instances(&self) -> Result<Vec<Uuid>, LedgerError> {
        Ok(self.events.read().await.keys().copied().collect())
    }
}
