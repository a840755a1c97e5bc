//! Persisted run state and the per-attempt log.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::model::HarvestAttempt;

/// Keys written to the run-state file.
pub mod keys {
    pub const LAST_HARVEST_DIR: &str = "last_harvest_dir";
    pub const LAST_HARVEST_TIMESTAMP: &str = "last_harvest_timestamp";
    pub const HARVEST_COMPLETED: &str = "harvest_completed";
    pub const HARVEST_ATTEMPTS: &str = "harvest_attempts";
    pub const HARVEST_FILE_COUNT: &str = "harvest_file_count";
    pub const HARVEST_SIZE_BYTES: &str = "harvest_size_bytes";
}

/// Summary of one cycle attempt as persisted.
#[derive(Debug, Clone)]
pub struct CycleRecord<'a> {
    pub directory: &'a Path,
    pub finished_at: DateTime<Utc>,
    pub completed: bool,
    pub attempts: u32,
    pub file_count: usize,
    pub total_bytes: u64,
}

/// Flat JSON key/value store. Writes are last-writer-wins; the file is replaced
/// atomically through a temporary sibling.
#[derive(Debug, Default)]
pub struct RunStateStore {
    path: Option<PathBuf>,
    values: Map<String, Value>,
}

impl RunStateStore {
    /// In-memory store that never touches disk.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// Loads `path` if it exists. A corrupt file is logged and replaced on the
    /// next write.
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let values = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(values) => values,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Run state unreadable, starting fresh");
                    Map::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            path: Some(path),
            values,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn record_cycle(&mut self, record: &CycleRecord<'_>) {
        self.set(keys::LAST_HARVEST_DIR, record.directory.display().to_string());
        self.set(keys::LAST_HARVEST_TIMESTAMP, record.finished_at.to_rfc3339());
        self.set(keys::HARVEST_COMPLETED, record.completed);
        self.set(keys::HARVEST_ATTEMPTS, record.attempts);
        self.set(keys::HARVEST_FILE_COUNT, record.file_count as u64);
        self.set(keys::HARVEST_SIZE_BYTES, record.total_bytes);
    }

    pub async fn persist(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(&self.values)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Run state persisted");
        Ok(())
    }
}

/// Append-only record of ladder attempts, optionally mirrored to a JSON-lines file.
#[derive(Debug, Default)]
pub struct AttemptLog {
    entries: Vec<HarvestAttempt>,
    sink: Option<PathBuf>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: Vec::new(),
            sink: Some(path.into()),
        }
    }

    pub fn entries(&self) -> &[HarvestAttempt] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries recorded at or after `index`.
    pub fn since(&self, index: usize) -> &[HarvestAttempt] {
        self.entries.get(index..).unwrap_or(&[])
    }

    /// Appends in memory first; a sink write failure is logged and never lost
    /// from the in-memory log.
    pub async fn record(&mut self, attempt: HarvestAttempt) {
        if let Some(path) = &self.sink {
            if let Err(e) = append_line(path, &attempt).await {
                warn!(path = %path.display(), error = %e, "Failed to write attempt log");
            }
        }
        self.entries.push(attempt);
    }
}

async fn append_line(path: &Path, attempt: &HarvestAttempt) -> io::Result<()> {
    let mut line = serde_json::to_string(attempt)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
