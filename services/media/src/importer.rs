//! Batch import pipeline
//!
//! discovery -> name gate -> bounded fan-out -> (materialize, extract,
//! insert) per item in its own transaction -> batch summary.

use crate::catalog::{CatalogStore, CatalogTx};
use crate::dedup::NameGate;
use crate::drive::{DriveClient, local_file_name};
use crate::error::{DriveError, ExtractError};
use crate::executor::{AttemptFailure, UnitOfWork, WorkError, run_isolated};
use crate::metadata_extractor::MediaExtractor;
use crate::models::{BackupPlan, ItemOutcome, MediaKind, SourceDescriptor};
use crate::report::BatchSummary;
use crate::scheduler::map_concurrently;
use crate::storage::{FileMover, discover_media};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tracing::{info, warn};
use uuid::Uuid;

pub const ALREADY_EXISTS: &str = "already exists";
pub const UNSUPPORTED_FORMAT: &str = "unsupported format";
pub const SOURCE_MISSING: &str = "source file missing";

/// Expected, item-level reasons to roll an import back
#[derive(Error, Debug)]
pub enum ImportFailure {
    #[error("source file missing")]
    SourceMissing,

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("download failed: {0}")]
    Download(#[from] DriveError),

    #[error("copy to backup drive failed: {0}")]
    Copy(#[source] std::io::Error),

    #[error("drive file name `{0}` has no usable local name")]
    UnusableName(String),

    #[error("{} already exists", .0.display())]
    DestinationExists(PathBuf),

    #[error("failed to place {}: {source}", path.display())]
    Placement {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where an item's bytes come from before extraction
enum Origin {
    /// Persist the local file where it is
    InPlace(PathBuf),
    /// Copy to the external drive first and persist the copy
    Backup {
        mover: Arc<dyn FileMover>,
        plan: BackupPlan,
    },
    /// Download from the drive into `destination_root`
    Drive {
        drive: Arc<dyn DriveClient>,
        destination_root: PathBuf,
    },
}

struct Candidate {
    descriptor: SourceDescriptor,
    kind: Option<MediaKind>,
    origin: Origin,
}

/// A file made available for extraction
struct Materialized {
    path: PathBuf,
    /// Created by this attempt, so a rollback may remove it
    fresh: bool,
}

impl Candidate {
    async fn materialize(&self) -> Result<Materialized, ImportFailure> {
        match &self.origin {
            Origin::InPlace(path) => {
                ensure_exists(path).await?;
                Ok(Materialized {
                    path: path.clone(),
                    fresh: false,
                })
            }
            Origin::Backup { mover, plan } => {
                ensure_exists(&plan.source).await?;
                let fresh = !path_exists(&plan.destination).await;
                mover
                    .copy(&plan.source, &plan.destination)
                    .await
                    .map_err(ImportFailure::Copy)?;
                Ok(Materialized {
                    path: plan.destination.clone(),
                    fresh,
                })
            }
            Origin::Drive {
                drive,
                destination_root,
            } => {
                let path =
                    download_exclusive(drive.as_ref(), &self.descriptor, destination_root).await?;
                Ok(Materialized { path, fresh: true })
            }
        }
    }

    /// Undo `materialize` after a rollback; files that existed before are kept
    async fn discard(&self, materialized: &Materialized) {
        if !materialized.fresh {
            return;
        }
        let path = &materialized.path;
        let removed = match &self.origin {
            Origin::InPlace(_) => return,
            Origin::Backup { mover, .. } => mover.remove(path).await,
            Origin::Drive { .. } => tokio::fs::remove_file(path).await,
        };
        if let Err(e) = removed {
            warn!("Failed to clean up {}: {}", path.display(), e);
        }
    }
}

/// Download into a path only this attempt owns.
///
/// The final path is claimed with `create_new` before any bytes arrive, so a
/// file placed there by another item or an earlier run is never overwritten.
/// The content lands in a uniquely named scratch file and is renamed over the
/// claim once complete. On error both are removed.
async fn download_exclusive(
    drive: &dyn DriveClient,
    descriptor: &SourceDescriptor,
    destination_root: &Path,
) -> Result<PathBuf, ImportFailure> {
    let file_name = local_file_name(&descriptor.name)
        .ok_or_else(|| ImportFailure::UnusableName(descriptor.name.clone()))?;
    let destination = destination_root.join(file_name);

    match OpenOptions::new().write(true).create_new(true).open(&destination).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(ImportFailure::DestinationExists(destination));
        }
        Err(source) => {
            return Err(ImportFailure::Placement {
                path: destination,
                source,
            });
        }
    }

    let scratch = destination_root.join(format!(".{}.part", Uuid::new_v4()));
    let placed = match drive.download(descriptor, &scratch).await {
        Ok(()) => tokio::fs::rename(&scratch, &destination)
            .await
            .map_err(|source| ImportFailure::Placement {
                path: destination.clone(),
                source,
            }),
        Err(e) => Err(e.into()),
    };

    if let Err(e) = placed {
        remove_if_present(&scratch).await;
        remove_if_present(&destination).await;
        return Err(e);
    }
    Ok(destination)
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to clean up {}: {}", path.display(), e),
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn ensure_exists(path: &Path) -> Result<(), ImportFailure> {
    if path_exists(path).await {
        Ok(())
    } else {
        Err(ImportFailure::SourceMissing)
    }
}

struct ImportWork<X> {
    extractor: Arc<X>,
    candidate: Candidate,
}

/// A persisted item, kept until commit so a failed commit can undo the file
struct Imported {
    candidate: Candidate,
    materialized: Materialized,
}

#[async_trait]
impl<X, Tx> UnitOfWork<Tx> for ImportWork<X>
where
    X: MediaExtractor,
    Tx: CatalogTx,
{
    type Output = Imported;
    type Failure = ImportFailure;

    async fn run(self, tx: &mut Tx) -> Result<Imported, WorkError<ImportFailure>> {
        let materialized = self
            .candidate
            .materialize()
            .await
            .map_err(WorkError::Domain)?;

        let persisted: Result<(), WorkError<ImportFailure>> = async {
            let item = self
                .extractor
                .extract(&self.candidate.descriptor, &materialized.path)
                .await
                .map_err(|e| WorkError::Domain(e.into()))?;
            tx.insert(&item).await?;
            Ok(())
        }
        .await;

        match persisted {
            Ok(()) => Ok(Imported {
                candidate: self.candidate,
                materialized,
            }),
            Err(e) => {
                self.candidate.discard(&materialized).await;
                Err(e)
            }
        }
    }

    async fn revert(imported: Imported) {
        imported.candidate.discard(&imported.materialized).await;
    }
}

fn to_outcome(result: Result<Imported, AttemptFailure<ImportFailure>>) -> ItemOutcome {
    match result {
        Ok(imported) => ItemOutcome::Success(imported.materialized.path),
        Err(AttemptFailure::Domain(ImportFailure::SourceMissing)) => {
            ItemOutcome::Skip(SOURCE_MISSING.to_string())
        }
        Err(AttemptFailure::Domain(failure)) => ItemOutcome::Failure(failure.into()),
        Err(AttemptFailure::Unmanaged(err)) => ItemOutcome::Failure(err),
    }
}

pub struct Importer<S, X> {
    store: Arc<S>,
    extractor: Arc<X>,
    concurrency: usize,
}

impl<S, X> Clone for Importer<S, X> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            extractor: self.extractor.clone(),
            concurrency: self.concurrency,
        }
    }
}

impl<S: CatalogStore, X: MediaExtractor> Importer<S, X> {
    pub fn new(store: Arc<S>, extractor: Arc<X>, concurrency: usize) -> Self {
        Self {
            store,
            extractor,
            concurrency,
        }
    }

    /// Import every supported file below `root`, leaving files in place
    pub async fn import_directory(&self, root: &Path) -> Result<BatchSummary> {
        let files = discover_media(root)
            .await
            .with_context(|| format!("failed to scan {}", root.display()))?;

        let mut candidates = Vec::with_capacity(files.len());
        for path in files {
            candidates.push(Candidate {
                descriptor: local_descriptor(&path).await,
                kind: MediaKind::from_path(&path),
                origin: Origin::InPlace(path),
            });
        }

        self.run_batch("local import", candidates).await
    }

    /// Copy files below `local_root` to the same relative place under
    /// `external_root` and catalog the copies
    pub async fn backup_directory(
        &self,
        mover: Arc<dyn FileMover>,
        local_root: &Path,
        external_root: &Path,
    ) -> Result<BatchSummary> {
        let files = discover_media(local_root)
            .await
            .with_context(|| format!("failed to scan {}", local_root.display()))?;

        let mut candidates = Vec::with_capacity(files.len());
        for path in files {
            let Some(plan) = BackupPlan::new(&path, local_root, external_root) else {
                continue;
            };
            candidates.push(Candidate {
                descriptor: local_descriptor(&path).await,
                kind: MediaKind::from_path(&path),
                origin: Origin::Backup {
                    mover: mover.clone(),
                    plan,
                },
            });
        }

        self.run_batch("local backup", candidates).await
    }

    /// Download new drive files into `destination_root` and catalog them
    pub async fn import_from_drive(
        &self,
        drive: Arc<dyn DriveClient>,
        destination_root: &Path,
    ) -> Result<BatchSummary> {
        let files = drive.list_files().await.context("failed to list drive files")?;
        tokio::fs::create_dir_all(destination_root)
            .await
            .with_context(|| format!("failed to create {}", destination_root.display()))?;

        let candidates = files
            .into_iter()
            .map(|mut descriptor| {
                // Catalog the name the file will have on disk
                if let Some(file_name) = local_file_name(&descriptor.name).map(str::to_string) {
                    descriptor.name = file_name;
                }
                descriptor
            })
            .map(|descriptor| Candidate {
                kind: MediaKind::from_path(Path::new(&descriptor.name)),
                descriptor,
                origin: Origin::Drive {
                    drive: drive.clone(),
                    destination_root: destination_root.to_path_buf(),
                },
            })
            .collect();

        self.run_batch("drive import", candidates).await
    }

    /// Import one local file, checking the catalog directly
    pub async fn import_file(&self, path: &Path) -> Result<ItemOutcome> {
        let Some(kind) = MediaKind::from_path(path) else {
            return Ok(ItemOutcome::Skip(UNSUPPORTED_FORMAT.to_string()));
        };

        let size = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ItemOutcome::Skip(SOURCE_MISSING.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let descriptor = SourceDescriptor::local(path, size);

        if self.store.exists_by_name(kind, &descriptor.name).await? {
            return Ok(ItemOutcome::Skip(ALREADY_EXISTS.to_string()));
        }

        let name = descriptor.name.clone();
        let work = ImportWork {
            extractor: self.extractor.clone(),
            candidate: Candidate {
                descriptor,
                kind: Some(kind),
                origin: Origin::InPlace(path.to_path_buf()),
            },
        };
        let outcome = to_outcome(run_isolated(self.store.as_ref(), &name, work).await);

        BatchSummary::default().record(&name, &outcome);
        Ok(outcome)
    }

    async fn run_batch(&self, batch: &str, candidates: Vec<Candidate>) -> Result<BatchSummary> {
        info!("Processing {} candidates ({})", candidates.len(), batch);

        // Snapshot once; the gate is read-only for the rest of the batch
        let names = NameGate::load(self.store.as_ref())
            .await
            .context("failed to load processed names")?;

        let outcomes = map_concurrently(candidates, self.concurrency, |candidate| {
            let names = &names;
            async move {
                let name = candidate.descriptor.name.clone();
                let Some(kind) = candidate.kind else {
                    return (name, ItemOutcome::Skip(UNSUPPORTED_FORMAT.to_string()));
                };
                if names.is_processed(kind, &name) {
                    return (name, ItemOutcome::Skip(ALREADY_EXISTS.to_string()));
                }

                let work = ImportWork {
                    extractor: self.extractor.clone(),
                    candidate,
                };
                let outcome = to_outcome(run_isolated(self.store.as_ref(), &name, work).await);
                (name, outcome)
            }
        })
        .await;

        let mut summary = BatchSummary::default();
        for (name, outcome) in &outcomes {
            summary.record(name, outcome);
        }
        summary.log(batch);
        Ok(summary)
    }
}

async fn local_descriptor(path: &Path) -> SourceDescriptor {
    let size = tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .unwrap_or_default();
    SourceDescriptor::local(path, size)
}
