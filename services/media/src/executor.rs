//! Per-item transactional execution
//!
//! Each item runs inside its own catalog transaction. A unit of work reports
//! an expected, item-level failure as [`WorkError::Domain`]; the executor
//! rolls the transaction back and hands the failure value back to the
//! caller. Anything else is logged on one line with a correlation id and
//! surfaces as [`AttemptFailure::Unmanaged`].
//!
//! Cancellation is not a failure: dropping the returned future drops the
//! open transaction, which rolls it back, and nothing is reported.

use crate::catalog::{CatalogStore, CatalogTx};
use async_trait::async_trait;
use common::error::DatabaseError;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

/// Error returned by a unit of work
#[derive(Debug)]
pub enum WorkError<E> {
    /// Expected item-level failure; rolls back and is returned as a value
    Domain(E),
    /// Anything unexpected
    Unexpected(anyhow::Error),
}

impl<E> From<anyhow::Error> for WorkError<E> {
    fn from(err: anyhow::Error) -> Self {
        WorkError::Unexpected(err)
    }
}

impl<E> From<DatabaseError> for WorkError<E> {
    fn from(err: DatabaseError) -> Self {
        WorkError::Unexpected(err.into())
    }
}

/// How an isolated attempt failed
#[derive(Debug)]
pub enum AttemptFailure<E> {
    Domain(E),
    Unmanaged(anyhow::Error),
}

impl<E: fmt::Display> fmt::Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Domain(failure) => write!(f, "{}", failure),
            AttemptFailure::Unmanaged(err) => write!(f, "unmanaged failure: {:#}", err),
        }
    }
}

/// Side-effecting work for one item, run against an open transaction
#[async_trait]
pub trait UnitOfWork<Tx: CatalogTx>: Send {
    type Output: Send + 'static;
    type Failure: Send;

    async fn run(self, tx: &mut Tx) -> Result<Self::Output, WorkError<Self::Failure>>;

    /// Undo the side effects of a successful run whose commit failed
    async fn revert(_output: Self::Output) {}
}

/// Run `work` in a fresh transaction: commit on success, roll back otherwise.
pub async fn run_isolated<S, W>(
    store: &S,
    item_id: &str,
    work: W,
) -> Result<W::Output, AttemptFailure<W::Failure>>
where
    S: CatalogStore,
    W: UnitOfWork<S::Tx>,
{
    let correlation_id = Uuid::new_v4();
    let span = info_span!("item", item = item_id, %correlation_id);

    let fail = |err: anyhow::Error| -> AttemptFailure<W::Failure> { unmanaged(correlation_id, err) };

    let attempt = async move {
        let mut tx = store.begin().await.map_err(|e| fail(e.into()))?;

        let result = match AssertUnwindSafe(work.run(&mut tx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(WorkError::Unexpected(anyhow::anyhow!(
                "unit of work panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match result {
            Ok(output) => match tx.commit().await {
                Ok(()) => {
                    debug!("transaction committed");
                    Ok(output)
                }
                Err(e) => {
                    W::revert(output).await;
                    Err(fail(e.into()))
                }
            },
            Err(WorkError::Domain(failure)) => {
                rollback(tx).await;
                Err(AttemptFailure::Domain(failure))
            }
            Err(WorkError::Unexpected(err)) => {
                rollback(tx).await;
                Err(fail(err))
            }
        }
    };

    let result: Result<W::Output, AttemptFailure<W::Failure>> = attempt.instrument(span).await;
    result
}

async fn rollback<T: CatalogTx>(tx: T) {
    if let Err(e) = tx.rollback().await {
        warn!("rollback failed: {}", e);
    }
}

fn unmanaged<E>(correlation_id: Uuid, err: anyhow::Error) -> AttemptFailure<E> {
    error!(%correlation_id, "unmanaged failure: {}", single_line(&err));
    AttemptFailure::Unmanaged(err)
}

/// Error chain and backtrace (if captured) flattened onto one line
pub fn single_line(err: &anyhow::Error) -> String {
    format!("{:?}", err)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_flattens_context_chain() {
        let err = anyhow::anyhow!("disk full").context("writing thumbnail\nfor clip.mp4");
        let line = single_line(&err);
        assert!(!line.contains('\n'));
        assert!(line.contains("disk full"));
        assert!(line.contains("for clip.mp4"));
    }

    #[test]
    fn test_attempt_failure_display() {
        let failure: AttemptFailure<String> = AttemptFailure::Domain("source missing".to_string());
        assert_eq!(failure.to_string(), "source missing");

        let failure: AttemptFailure<String> = AttemptFailure::Unmanaged(anyhow::anyhow!("boom"));
        assert_eq!(failure.to_string(), "unmanaged failure: boom");
    }
}
