//! In-memory stand-ins for the pipeline's collaborators
#![allow(dead_code)]

use async_trait::async_trait;
use common::error::{DatabaseError, DatabaseResult};
use media::catalog::{CatalogStore, CatalogTx};
use media::drive::DriveClient;
use media::error::{DriveError, ExtractError};
use media::metadata_extractor::MediaExtractor;
use media::models::{
    MediaDetails, MediaItem, MediaKind, PhotoDetails, SourceDescriptor, UploadRecord, VideoDetails,
};
use media::network::{NetworkObserver, NetworkState};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Default)]
struct CatalogState {
    items: Vec<MediaItem>,
    uploads: Vec<UploadRecord>,
}

impl CatalogState {
    fn contains(&self, kind: MediaKind, name: &str) -> bool {
        self.items.iter().any(|i| i.kind() == kind && i.name == name)
    }
}

/// Catalog with the same uniqueness rules as the SQL schema
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl MemoryCatalog {
    pub fn with_photos(names: &[&str]) -> Self {
        let catalog = Self::default();
        {
            let mut state = catalog.state.lock().unwrap();
            for name in names {
                state.items.push(photo_item(name, Path::new(name)));
            }
        }
        catalog
    }

    pub fn item_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .items
            .iter()
            .map(|i| i.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn items(&self) -> Vec<MediaItem> {
        self.state.lock().unwrap().items.clone()
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.state.lock().unwrap().uploads.clone()
    }
}

pub struct MemoryTx {
    state: Arc<Mutex<CatalogState>>,
    pending: Vec<MediaItem>,
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    type Tx = MemoryTx;

    async fn begin(&self) -> DatabaseResult<MemoryTx> {
        Ok(MemoryTx {
            state: self.state.clone(),
            pending: Vec::new(),
        })
    }

    async fn exists_by_name(&self, kind: MediaKind, name: &str) -> DatabaseResult<bool> {
        Ok(self.state.lock().unwrap().contains(kind, name))
    }

    async fn processed_names(&self, kind: MediaKind) -> DatabaseResult<HashSet<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .items
            .iter()
            .filter(|i| i.kind() == kind)
            .map(|i| i.name.clone())
            .collect())
    }

    async fn uploaded_hashes(&self) -> DatabaseResult<HashSet<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .uploads
            .iter()
            .map(|u| u.content_hash.clone())
            .collect())
    }

    async fn mark_uploaded(&self, record: &UploadRecord) -> DatabaseResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.uploads.iter().any(|u| u.content_hash == record.content_hash) {
            return Err(DatabaseError::Duplicate(record.content_hash.clone()));
        }
        state.uploads.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl CatalogTx for MemoryTx {
    async fn insert(&mut self, item: &MediaItem) -> DatabaseResult<()> {
        let duplicate_pending = self
            .pending
            .iter()
            .any(|i| i.kind() == item.kind() && i.name == item.name);
        if duplicate_pending || self.state.lock().unwrap().contains(item.kind(), &item.name) {
            return Err(DatabaseError::Duplicate(item.name.clone()));
        }
        self.pending.push(item.clone());
        Ok(())
    }

    async fn commit(self) -> DatabaseResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(item) = self.pending.iter().find(|i| state.contains(i.kind(), &i.name)) {
            return Err(DatabaseError::Duplicate(item.name.clone()));
        }
        state.items.extend(self.pending);
        Ok(())
    }

    async fn rollback(self) -> DatabaseResult<()> {
        Ok(())
    }
}

pub fn photo_item(name: &str, path: &Path) -> MediaItem {
    let source = SourceDescriptor::local(path, 0);
    MediaItem::new(
        &SourceDescriptor {
            name: name.to_string(),
            ..source
        },
        path.to_path_buf(),
        None,
        MediaDetails::Photo(PhotoDetails::default()),
    )
}

/// Extractor that records every call and fails for chosen file names
#[derive(Default)]
pub struct FakeExtractor {
    calls: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl FakeExtractor {
    pub fn failing_on(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl MediaExtractor for FakeExtractor {
    async fn extract(&self, source: &SourceDescriptor, path: &Path) -> Result<MediaItem, ExtractError> {
        self.calls.lock().unwrap().push(source.name.clone());
        tokio::task::yield_now().await;

        if self.failing.contains(&source.name) {
            return Err(ExtractError::Exif {
                path: path.to_path_buf(),
                reason: "corrupt file".to_string(),
            });
        }

        let details = match MediaKind::from_path(path) {
            Some(MediaKind::Video) => MediaDetails::Video(VideoDetails::default()),
            Some(MediaKind::Photo) => MediaDetails::Photo(PhotoDetails::default()),
            None => return Err(ExtractError::Unsupported(path.to_path_buf())),
        };
        Ok(MediaItem::new(source, path.to_path_buf(), None, details))
    }
}

/// Drive holding files in memory and recording uploads
#[derive(Default)]
pub struct FakeDrive {
    files: Vec<(SourceDescriptor, Vec<u8>)>,
    uploads: Mutex<Vec<String>>,
    unauthorized: bool,
    failing_uploads: HashSet<String>,
    failing_downloads: HashSet<String>,
}

impl FakeDrive {
    /// Files keep their names verbatim, like the drive listing does
    pub fn with_files(files: &[(&str, &[u8])]) -> Self {
        let files = files
            .iter()
            .enumerate()
            .map(|(i, (name, content))| {
                let local = SourceDescriptor::local(Path::new(name), content.len() as u64);
                let descriptor = SourceDescriptor {
                    name: name.to_string(),
                    external_id: Some(format!("remote-{}", i)),
                    ..local
                };
                (descriptor, content.to_vec())
            })
            .collect();
        Self {
            files,
            ..Default::default()
        }
    }

    /// Downloads of these names write half the content, then fail
    pub fn with_failing_downloads(mut self, names: &[&str]) -> Self {
        self.failing_downloads = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn content_of(&self, external_id: &str) -> Option<Vec<u8>> {
        self.files
            .iter()
            .find(|(d, _)| d.external_id.as_deref() == Some(external_id))
            .map(|(_, content)| content.clone())
    }

    pub fn unauthorized() -> Self {
        Self {
            unauthorized: true,
            ..Default::default()
        }
    }

    pub fn failing_uploads(names: &[&str]) -> Self {
        Self {
            failing_uploads: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl DriveClient for FakeDrive {
    async fn list_files(&self) -> Result<Vec<SourceDescriptor>, DriveError> {
        Ok(self.files.iter().map(|(d, _)| d.clone()).collect())
    }

    async fn download(&self, descriptor: &SourceDescriptor, destination: &Path) -> Result<(), DriveError> {
        let (_, content) = self
            .files
            .iter()
            .find(|(d, _)| d.external_id == descriptor.external_id)
            .ok_or(DriveError::Http {
                status: 404,
                message: "not found".to_string(),
            })?;
        tokio::task::yield_now().await;

        if self.failing_downloads.contains(&descriptor.name) {
            tokio::fs::write(destination, &content[..content.len() / 2]).await?;
            return Err(DriveError::Http {
                status: 503,
                message: "connection reset mid-stream".to_string(),
            });
        }
        tokio::fs::write(destination, content).await?;
        Ok(())
    }

    async fn upload(&self, descriptor: &SourceDescriptor, _path: &Path) -> Result<String, DriveError> {
        if self.unauthorized {
            return Err(DriveError::Unauthorized("token expired".to_string()));
        }
        if self.failing_uploads.contains(&descriptor.name) {
            return Err(DriveError::Http {
                status: 500,
                message: "backend error".to_string(),
            });
        }
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(descriptor.name.clone());
        Ok(format!("remote-{}", uploads.len()))
    }

    async fn delete(&self, _remote_id: &str) -> Result<(), DriveError> {
        Ok(())
    }
}

/// Observer stuck on one state; counts how often it is consulted
pub struct FixedObserver {
    sender: watch::Sender<NetworkState>,
    observed: AtomicUsize,
}

impl FixedObserver {
    pub fn new(state: NetworkState) -> Self {
        let (sender, _) = watch::channel(state);
        Self {
            sender,
            observed: AtomicUsize::new(0),
        }
    }

    pub fn on(ssid: &str) -> Self {
        Self::new(NetworkState::Found(ssid.to_string()))
    }

    pub fn observed(&self) -> usize {
        self.observed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkObserver for FixedObserver {
    async fn observe(&self) -> watch::Receiver<NetworkState> {
        self.observed.fetch_add(1, Ordering::SeqCst);
        self.sender.subscribe()
    }
}
