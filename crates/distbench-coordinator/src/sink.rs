//! Result sinks
//!
//! The orchestrator hands every finished row to a `ResultSink`. Storage
//! backends live outside this crate; the sinks here append JSON lines to a
//! file or log rows through tracing.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use distbench_common::ResultRow;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Destination for result rows
pub trait ResultSink: Send + Sync {
    fn upload(&self, rows: &[ResultRow]) -> impl Future<Output = Result<()>> + Send;
}

/// Appends one JSON object per row to a file
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonLinesSink {
    async fn upload(&self, rows: &[ResultRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buf, row).context("Failed to serialize result row")?;
            buf.push(b'\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(&buf)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        file.flush().await?;

        info!(path = %self.path.display(), rows = rows.len(), "Results written");
        Ok(())
    }
}

/// Logs every row instead of storing it
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    async fn upload(&self, rows: &[ResultRow]) -> Result<()> {
        for row in rows {
            info!(
                test_id = %row.test_id,
                result_type = %row.result_type,
                result = row.result,
                source = %row.result_source,
                "Result"
            );
        }
        Ok(())
    }
}
