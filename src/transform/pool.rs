//! Fan-out/fan-in execution of per-item work.
//!
//! # Responsibilities
//! - Split a batch into contiguous shards, one worker task per shard
//! - Run the handler sequentially over each shard
//! - Reassemble results by original index, not completion order
//!
//! # Design Decisions
//! - Shard size is `ceil(n / concurrency)`; trailing shards may be empty and
//!   are never spawned
//! - The first error reported to the coordinator fails the whole batch and
//!   the remaining workers are aborted; no partial results are returned

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::transform::error::{ErrorKind, TransformError};

/// Failure of a pooled batch.
#[derive(Debug, Error)]
pub enum PoolError<E> {
    /// The handler failed on an item.
    #[error(transparent)]
    Handler(E),

    /// A worker ended without reporting every item in its shard.
    #[error("worker for shard {shard} terminated before reporting its results")]
    WorkerLost { shard: usize },
}

impl<E> PoolError<E> {
    pub fn into_handler_error(self) -> Option<E> {
        match self {
            PoolError::Handler(e) => Some(e),
            PoolError::WorkerLost { .. } => None,
        }
    }
}

impl From<PoolError<TransformError>> for TransformError {
    fn from(err: PoolError<TransformError>) -> Self {
        match err {
            PoolError::Handler(e) => e,
            lost @ PoolError::WorkerLost { .. } => {
                TransformError::new(ErrorKind::Internal, lost.to_string())
            }
        }
    }
}

/// Number of items each worker receives for a batch of `len` items.
pub fn shard_size(len: usize, concurrency: usize) -> usize {
    len.div_ceil(concurrency.max(1))
}

/// Apply `handler` to every item using up to `concurrency` workers.
///
/// Output order matches input order. An empty batch returns immediately.
/// A `concurrency` of zero is treated as one.
pub async fn process<T, R, E, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    handler: F,
) -> Result<Vec<R>, PoolError<E>>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send,
{
    let len = items.len();
    if len == 0 {
        return Ok(Vec::new());
    }

    let per_shard = shard_size(len, concurrency);
    let handler = Arc::new(handler);
    let (tx, mut rx) = mpsc::channel::<(usize, Result<R, E>)>(len);
    let mut workers = JoinSet::new();

    let mut items = items.into_iter().enumerate().peekable();
    while items.peek().is_some() {
        let shard: Vec<(usize, T)> = items.by_ref().take(per_shard).collect();
        let handler = Arc::clone(&handler);
        let tx = tx.clone();
        workers.spawn(async move {
            for (index, item) in shard {
                let result = handler(item).await;
                if tx.send((index, result)).await.is_err() {
                    return;
                }
            }
        });
    }
    drop(tx);

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(len).collect();
    while let Some((index, result)) = rx.recv().await {
        match result {
            Ok(value) => slots[index] = Some(value),
            Err(e) => {
                workers.abort_all();
                return Err(PoolError::Handler(e));
            }
        }
    }

    let mut results = Vec::with_capacity(len);
    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(value) => results.push(value),
            None => {
                return Err(PoolError::WorkerLost {
                    shard: index / per_shard,
                })
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn identity(item: usize) -> Result<usize, String> {
        Ok(item)
    }

    #[test]
    fn test_shard_size() {
        assert_eq!(shard_size(0, 4), 0);
        assert_eq!(shard_size(1, 4), 1);
        assert_eq!(shard_size(10, 3), 4);
        assert_eq!(shard_size(9, 3), 3);
        assert_eq!(shard_size(5, 0), 5);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let out = process(Vec::<usize>::new(), 4, identity).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_single_item() {
        let out = process(vec![42], 10, identity).await.unwrap();
        assert_eq!(out, vec![42]);
    }

    #[tokio::test]
    async fn test_order_preserved_when_not_evenly_divisible() {
        let items: Vec<usize> = (0..23).collect();
        let out = process(items.clone(), 5, |item: usize| async move {
            // Later items finish first to scramble completion order.
            tokio::time::sleep(Duration::from_millis((23 - item as u64) % 7)).await;
            Ok::<_, String>(item)
        })
        .await
        .unwrap();
        assert_eq!(out, items);
    }

    #[tokio::test]
    async fn test_fewer_items_than_workers() {
        let out = process(vec!["a", "b", "c"], 10, |s: &'static str| async move {
            Ok::<_, String>(s.to_uppercase())
        })
        .await
        .unwrap();
        assert_eq!(out, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_zero_concurrency_uses_one_worker() {
        let out = process(vec![1, 2, 3], 0, identity).await.unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_single_failure_fails_batch() {
        let items: Vec<usize> = (0..50).collect();
        let result = process(items, 4, |item: usize| async move {
            if item == 17 {
                Err(format!("item {item} rejected"))
            } else {
                Ok(item * 2)
            }
        })
        .await;

        match result {
            Err(PoolError::Handler(msg)) => assert_eq!(msg, "item 17 rejected"),
            other => panic!("expected handler error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shards_run_concurrently() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());

        process((0..8).collect::<Vec<usize>>(), 4, move |item: usize| {
            let (running, peak) = (r.clone(), p.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(item)
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) > 1);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_reported() {
        let result = process(vec![0usize, 1, 2, 3], 2, |item: usize| async move {
            if item == 3 {
                panic!("worker blew up");
            }
            Ok::<_, String>(item)
        })
        .await;
        assert!(matches!(result, Err(PoolError::WorkerLost { shard: 1 })));
    }

    #[test]
    fn test_pool_error_converts_to_transform_error() {
        let err: TransformError = PoolError::<TransformError>::WorkerLost { shard: 2 }.into();
        assert_eq!(err.kind(), ErrorKind::Internal);

        let err: TransformError =
            PoolError::Handler(TransformError::bad_parameter("bad id")).into();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
    }
}
