//! Error output artifact.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::ErrorRecord;

/// Accumulates per-record errors and writes them out as a single JSON array.
pub struct ErrorSink {
    output_dir: PathBuf,
    records: Vec<ErrorRecord>,
}

impl ErrorSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            records: Vec::new(),
        }
    }

    pub fn error_path(output_dir: &Path) -> PathBuf {
        output_dir.join("errors.json")
    }

    /// Append a record, preserving arrival order.
    pub fn append(&mut self, record: ErrorRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize all collected records to `errors.json`. Resolves only after
    /// the file has been flushed and fsynced.
    pub async fn finish(&mut self) -> io::Result<()> {
        let path = Self::error_path(&self.output_dir);
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let json = serde_json::to_vec_pretty(&self.records)?;

        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&json).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        file.sync_all().await?;

        info!(errors = self.records.len(), path = %path.display(), "wrote error artifact");
        Ok(())
    }
}
