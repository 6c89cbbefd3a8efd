//! Append-only JSON lines log with size-based rotation

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

pub struct JsonlLog {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    write_lock: Mutex<()>,
}

impl JsonlLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, max_files: usize) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            max_files,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line, then rotate if the file grew past the limit
    pub async fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        drop(file);

        self.rotate_if_needed().await
    }

    /// Shift `path.N` to `path.N+1` (oldest dropped), then move the live file to `path.1`
    async fn rotate_if_needed(&self) -> Result<()> {
        let size = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size < self.max_bytes {
            return Ok(());
        }

        if self.max_files == 0 {
            tokio::fs::remove_file(&self.path).await?;
            return Ok(());
        }

        for idx in (1..self.max_files).rev() {
            let older = self.rotated_path(idx);
            if tokio::fs::try_exists(&older).await.unwrap_or(false) {
                tokio::fs::rename(&older, self.rotated_path(idx + 1))
                    .await
                    .map_err(|e| Error::Storage(format!("Failed to rotate {}: {}", older.display(), e)))?;
            }
        }
        tokio::fs::rename(&self.path, self.rotated_path(1))
            .await
            .map_err(|e| Error::Storage(format!("Failed to rotate {}: {}", self.path.display(), e)))?;

        debug!("Rotated {} at {} bytes", self.path.display(), size);
        Ok(())
    }

    pub fn rotated_path(&self, idx: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", idx));
        PathBuf::from(name)
    }
}
