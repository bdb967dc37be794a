//! Local filesystem collaborators: discovery and the backup mover

use crate::models::MediaKind;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[async_trait]
pub trait FileMover: Send + Sync {
    /// Copy `source` to `destination`, creating parent directories
    async fn copy(&self, source: &Path, destination: &Path) -> std::io::Result<()>;

    async fn remove(&self, path: &Path) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct LocalMover;

#[async_trait]
impl FileMover for LocalMover {
    async fn copy(&self, source: &Path, destination: &Path) -> std::io::Result<()> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, destination).await?;
        debug!("Copied {} to {}", source.display(), destination.display());
        Ok(())
    }

    async fn remove(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

/// Recursively list supported media files below `root`, sorted by path.
///
/// Unreadable subdirectories are logged and skipped.
pub async fn discover_media(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if dir == root => return Err(e),
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                continue;
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && MediaKind::from_path(&path).is_some() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
