//! Durable client-side spool for batches that exhausted their upload
//! retries. One JSON file per batch; files are replayed oldest-first on the
//! next delivery cycle.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::db::MetricBatchEntry;

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("spool I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("spool serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk spool directory for undelivered batches.
pub struct SpoolBuffer {
    dir: PathBuf,
}

impl SpoolBuffer {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, BufferError> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    /// Persist a batch to the spool. Written to a temp name first and
    /// renamed so a crash mid-write never leaves a half-readable batch.
    pub fn store(&self, batch: &[MetricBatchEntry]) -> Result<PathBuf, BufferError> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let name = format!("batch-{:013}-{:08x}.json", millis, rand::random::<u32>());
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!("{}.tmp", name));

        fs::write(&tmp, serde_json::to_vec(batch)?)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Load all spooled batches, oldest first. Unreadable files are skipped
    /// with a warning and left in place for operator inspection.
    pub fn drain(&self) -> Result<Vec<(PathBuf, Vec<MetricBatchEntry>)>, BufferError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        paths.sort();

        let mut batches = Vec::with_capacity(paths.len());
        for path in paths {
            match fs::read(&path).map_err(BufferError::from).and_then(|bytes| {
                serde_json::from_slice::<Vec<MetricBatchEntry>>(&bytes).map_err(BufferError::from)
            }) {
                Ok(batch) => batches.push((path, batch)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable spool file");
                }
            }
        }
        Ok(batches)
    }

    /// Remove a delivered (or discarded) batch from the spool.
    pub fn remove(&self, path: &Path) -> Result<(), BufferError> {
        fs::remove_file(path)?;
        Ok(())
    }

    /// Number of batches currently spooled.
    pub fn len(&self) -> Result<usize, BufferError> {
        Ok(self.drain()?.len())
    }
}
