//! Catalog store seam
//!
//! The pipeline only talks to the catalog through these traits. The
//! PostgreSQL implementation lives in [`crate::database`].

use crate::models::{MediaItem, MediaKind, UploadRecord};
use async_trait::async_trait;
use common::error::DatabaseResult;
use std::collections::HashSet;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    type Tx: CatalogTx;

    /// Open an independent transaction for one item
    async fn begin(&self) -> DatabaseResult<Self::Tx>;

    async fn exists_by_name(&self, kind: MediaKind, name: &str) -> DatabaseResult<bool>;

    async fn processed_names(&self, kind: MediaKind) -> DatabaseResult<HashSet<String>>;

    async fn uploaded_hashes(&self) -> DatabaseResult<HashSet<String>>;

    async fn mark_uploaded(&self, record: &UploadRecord) -> DatabaseResult<()>;
}

/// Writes made through a transaction are only visible after `commit`
#[async_trait]
pub trait CatalogTx: Send {
    async fn insert(&mut self, item: &MediaItem) -> DatabaseResult<()>;

    async fn commit(self) -> DatabaseResult<()>;

    async fn rollback(self) -> DatabaseResult<()>;
}
