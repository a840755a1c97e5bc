//! Output directories: one fresh directory per cycle attempt, verified by
//! counting what the application actually wrote.

use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Collision suffixes tried before giving up.
const MAX_SUFFIX: u32 = 100;

/// What a harvest left on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    /// Non-empty regular files, counted recursively
    pub file_count: usize,
    pub total_bytes: u64,
}

impl DirectoryStats {
    pub fn is_empty(&self) -> bool {
        self.file_count == 0
    }
}

/// Creates `harvest_YYYYMMDD_HHMMSS` under `base`, adding `_1`, `_2`, ... when the
/// name is taken. An existing directory is never reused.
pub async fn prepare_output_directory(
    base: &Path,
    timestamp: DateTime<Local>,
) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(base).await?;
    let stem = format!("harvest_{}", timestamp.format("%Y%m%d_%H%M%S"));

    for suffix in 0..=MAX_SUFFIX {
        let name = if suffix == 0 {
            stem.clone()
        } else {
            format!("{}_{}", stem, suffix)
        };
        let candidate = base.join(name);
        match tokio::fs::create_dir(&candidate).await {
            Ok(()) => {
                debug!(path = %candidate.display(), "Output directory created");
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free output directory name for {}", stem),
    ))
}

/// Counts non-empty files below `dir`. A missing directory counts as empty.
pub async fn inspect_directory(dir: &Path) -> io::Result<DirectoryStats> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || walk(&dir))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

fn walk(dir: &Path) -> io::Result<DirectoryStats> {
    let mut stats = DirectoryStats::default();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                let len = entry.metadata()?.len();
                if len > 0 {
                    stats.file_count += 1;
                    stats.total_bytes += len;
                }
            }
        }
    }

    Ok(stats)
}
