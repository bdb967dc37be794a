//! Deduplication gates
//!
//! Both gates load their "already processed" universe once per batch and are
//! read-only afterwards. Two copies of the same new file inside one batch are
//! therefore not caught here; the catalog's unique constraints reject the
//! second insert instead.

use crate::catalog::CatalogStore;
use crate::models::MediaKind;
use common::error::DatabaseResult;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use tokio::io::AsyncReadExt;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Snapshot of processed file names, per media kind.
///
/// Name matching is approximate on purpose: renamed or re-encoded copies
/// are not detected.
#[derive(Debug, Default)]
pub struct NameGate {
    photos: HashSet<String>,
    videos: HashSet<String>,
}

impl NameGate {
    pub async fn load<S: CatalogStore>(store: &S) -> DatabaseResult<Self> {
        Ok(Self {
            photos: store.processed_names(MediaKind::Photo).await?,
            videos: store.processed_names(MediaKind::Video).await?,
        })
    }

    pub fn is_processed(&self, kind: MediaKind, name: &str) -> bool {
        match kind {
            MediaKind::Photo => self.photos.contains(name),
            MediaKind::Video => self.videos.contains(name),
        }
    }

    pub fn len(&self) -> usize {
        self.photos.len() + self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Snapshot of content hashes that already reached the drive
#[derive(Debug, Default)]
pub struct HashGate {
    uploaded: HashSet<String>,
}

impl HashGate {
    pub async fn load<S: CatalogStore>(store: &S) -> DatabaseResult<Self> {
        Ok(Self {
            uploaded: store.uploaded_hashes().await?,
        })
    }

    pub fn is_uploaded(&self, hash: &str) -> bool {
        self.uploaded.contains(hash)
    }
}

/// Hex SHA-256 of a file, read in fixed-size chunks
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
