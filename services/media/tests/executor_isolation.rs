mod support;

use async_trait::async_trait;
use media::catalog::{CatalogStore, CatalogTx};
use media::executor::{AttemptFailure, UnitOfWork, WorkError, run_isolated};
use media::models::MediaItem;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use support::{MemoryCatalog, MemoryTx, photo_item};

/// What the work does after inserting its row
enum Then {
    Succeed,
    Reject,
    Panic,
    Hang,
    /// Commit the same name through another transaction first
    LoseCommitRace(MemoryCatalog),
}

struct InsertThen {
    item: MediaItem,
    then: Then,
    reverted: Arc<AtomicBool>,
}

impl InsertThen {
    fn new(name: &str, then: Then) -> Self {
        Self {
            item: photo_item(name, Path::new(name)),
            then,
            reverted: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl UnitOfWork<MemoryTx> for InsertThen {
    type Output = Arc<AtomicBool>;
    type Failure = String;

    async fn run(self, tx: &mut MemoryTx) -> Result<Arc<AtomicBool>, WorkError<String>> {
        tx.insert(&self.item).await?;

        match self.then {
            Then::Succeed => Ok(self.reverted),
            Then::Reject => Err(WorkError::Domain("corrupt file".to_string())),
            Then::Panic => panic!("decoder blew up on {}", self.item.name),
            Then::Hang => std::future::pending().await,
            Then::LoseCommitRace(catalog) => {
                let mut other = catalog.begin().await?;
                other.insert(&self.item).await?;
                other.commit().await?;
                Ok(self.reverted)
            }
        }
    }

    async fn revert(reverted: Arc<AtomicBool>) {
        reverted.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_success_commits_the_row() {
    let catalog = MemoryCatalog::default();

    let result = run_isolated(&catalog, "a.jpg", InsertThen::new("a.jpg", Then::Succeed)).await;

    assert!(result.is_ok());
    assert_eq!(catalog.item_names(), vec!["a.jpg".to_string()]);
}

#[tokio::test]
async fn test_domain_failure_rolls_back_and_returns_the_value() {
    let catalog = MemoryCatalog::default();

    let result = run_isolated(&catalog, "a.jpg", InsertThen::new("a.jpg", Then::Reject)).await;

    assert!(matches!(result, Err(AttemptFailure::Domain(ref reason)) if reason == "corrupt file"));
    assert!(catalog.items().is_empty());
}

#[tokio::test]
async fn test_panic_becomes_unmanaged_failure() {
    let catalog = MemoryCatalog::default();

    let result = run_isolated(&catalog, "a.jpg", InsertThen::new("a.jpg", Then::Panic)).await;

    match result {
        Err(AttemptFailure::Unmanaged(err)) => assert!(err.to_string().contains("decoder blew up")),
        other => panic!("expected unmanaged failure, got {:?}", other.map(|_| ())),
    }
    assert!(catalog.items().is_empty());

    // The catalog is still usable afterwards
    let result = run_isolated(&catalog, "b.jpg", InsertThen::new("b.jpg", Then::Succeed)).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_commit_failure_is_unmanaged_and_reverted() {
    let catalog = MemoryCatalog::default();
    let work = InsertThen::new("a.jpg", Then::LoseCommitRace(catalog.clone()));
    let reverted = work.reverted.clone();

    let result = run_isolated(&catalog, "a.jpg", work).await;

    assert!(matches!(result, Err(AttemptFailure::Unmanaged(_))));
    assert!(reverted.load(Ordering::SeqCst));
    // Only the row from the competing transaction exists
    assert_eq!(catalog.items().len(), 1);
}

#[tokio::test]
async fn test_cancelled_attempt_writes_nothing_and_reports_nothing() {
    let catalog = MemoryCatalog::default();
    let work = InsertThen::new("a.jpg", Then::Hang);
    let reverted = work.reverted.clone();

    let attempt = run_isolated(&catalog, "a.jpg", work);
    let result = tokio::time::timeout(Duration::from_millis(50), attempt).await;

    assert!(result.is_err());
    assert!(catalog.items().is_empty());
    assert!(!reverted.load(Ordering::SeqCst));

    let retry = run_isolated(&catalog, "a.jpg", InsertThen::new("a.jpg", Then::Succeed)).await;
    assert!(retry.is_ok());
}
