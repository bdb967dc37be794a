//! Per-batch accounting of item outcomes

use crate::executor::single_line;
use crate::models::ItemOutcome;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failed_items: Vec<String>,
}

impl BatchSummary {
    /// Count one outcome and emit its log line
    pub fn record(&mut self, name: &str, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Success(destination) => {
                self.succeeded += 1;
                info!(item = name, "imported to {}", destination.display());
            }
            ItemOutcome::Skip(reason) => {
                self.skipped += 1;
                debug!(item = name, "skipped: {}", reason);
            }
            ItemOutcome::Failure(err) => {
                self.failed += 1;
                self.failed_items.push(name.to_string());
                warn!(item = name, "failed: {}", single_line(err));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    pub fn log(&self, batch: &str) {
        info!(
            batch,
            succeeded = self.succeeded,
            skipped = self.skipped,
            failed = self.failed,
            "Batch finished: {} items",
            self.total()
        );
    }

    /// Write failed item names to `failed-<timestamp>.log` in `dir`.
    ///
    /// Returns `None` without touching the disk when nothing failed.
    pub async fn write_failure_log(&self, dir: &Path) -> std::io::Result<Option<PathBuf>> {
        if self.failed_items.is_empty() {
            return Ok(None);
        }

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("failed-{}.log", Local::now().format("%Y%m%d-%H%M%S")));
        let mut file = tokio::fs::File::create(&path).await?;
        for name in &self.failed_items {
            file.write_all(name.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        file.flush().await?;

        info!("Wrote {} failed items to {}", self.failed_items.len(), path.display());
        Ok(Some(path))
    }
}
