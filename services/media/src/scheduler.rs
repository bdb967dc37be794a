//! Bounded concurrent fan-out
//!
//! [`map_concurrently`] drives at most `max_parallelism` futures at a time on
//! the calling task and returns their results in input order. A finished
//! result frees its slot right away, even while an earlier item is still
//! running. It neither
//! retries nor isolates failures: work that must not affect its siblings
//! encodes its failure in `R`.

use futures::stream::{self, StreamExt};
use std::future::Future;

pub async fn map_concurrently<T, R, F, Fut>(items: Vec<T>, max_parallelism: usize, mut work: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    let mut results: Vec<(usize, R)> = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let pending = work(item);
            async move { (index, pending.await) }
        })
        .buffer_unordered(max_parallelism.max(1))
        .collect()
        .await;

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_exceeds_max_parallelism() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = map_concurrently((0..10).collect(), 3, |i: u64| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5 * (10 - i))).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }
        })
        .await;

        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_head_item_does_not_hold_back_the_rest() {
        let started = tokio::time::Instant::now();

        let results = map_concurrently((0..5).collect(), 2, |i: u64| async move {
            let secs = if i == 0 { 10 } else { 1 };
            tokio::time::sleep(Duration::from_secs(secs)).await;
            i
        })
        .await;

        assert_eq!(results, vec![0, 1, 2, 3, 4]);
        // Items 1 to 4 run one after another beside item 0
        assert!(started.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test]
    async fn test_failures_do_not_cancel_siblings() {
        let results = map_concurrently(vec![1, 2, 3, 4], 2, |i: i32| async move {
            if i == 2 { Err(format!("item {} failed", i)) } else { Ok(i) }
        })
        .await;

        assert_eq!(
            results,
            vec![Ok(1), Err("item 2 failed".to_string()), Ok(3), Ok(4)]
        );
    }

    #[tokio::test]
    async fn test_zero_parallelism_still_progresses() {
        let results = map_concurrently(vec!["a", "b"], 0, |s| async move { s.len() }).await;
        assert_eq!(results, vec![1, 1]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results: Vec<u8> = map_concurrently(Vec::<u8>::new(), 4, |b| async move { b }).await;
        assert!(results.is_empty());
    }
}
