//! Bounded worker pool for batch starts.
//!
//! Workers claim the next unclaimed index from a shared counter, so at most
//! `pool_size` items run at once and results come back in input order.

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    max_concurrency: usize,
}

impl BatchScheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Workers used for `n` items.
    pub fn pool_size(&self, n: usize, parallel: bool) -> usize {
        match (n, parallel) {
            (0, _) => 0,
            (_, false) => 1,
            (n, true) => self.max_concurrency.min(n),
        }
    }

    /// Run `worker` over every item. Once `cancel` fires no new item is
    /// claimed, and each unclaimed item gets `skipped(index, item)` instead.
    pub async fn run<T, R, F, Fut, S>(
        &self,
        items: Vec<T>,
        parallel: bool,
        cancel: &CancellationToken,
        worker: F,
        skipped: S,
    ) -> Vec<R>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = R>,
        S: Fn(usize, T) -> R,
    {
        let n = items.len();
        let pool = self.pool_size(n, parallel);
        debug!(items = n, pool, parallel, "batch scheduled");

        let inputs: Vec<Mutex<Option<T>>> = items.into_iter().map(|i| Mutex::new(Some(i))).collect();
        let slots: Vec<Mutex<Option<R>>> = (0..n).map(|_| Mutex::new(None)).collect();
        let next = AtomicUsize::new(0);

        {
            let (inputs, slots, next, worker) = (&inputs, &slots, &next, &worker);
            let workers = (0..pool).map(|_| async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= n {
                        break;
                    }
                    let Some(item) = take(&inputs[index]) else {
                        continue;
                    };
                    let result = worker(index, item).await;
                    *lock(&slots[index]) = Some(result);
                }
            });
            join_all(workers).await;
        }

        slots
            .into_iter()
            .zip(inputs)
            .enumerate()
            .map(|(index, (slot, input))| {
                if let Some(result) = into_inner(slot) {
                    return result;
                }
                match into_inner(input) {
                    Some(item) => skipped(index, item),
                    None => unreachable!("claimed batch item {index} produced no result"),
                }
            })
            .collect()
    }
}

fn lock<V>(m: &Mutex<V>) -> std::sync::MutexGuard<'_, V> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take<V>(m: &Mutex<Option<V>>) -> Option<V> {
    lock(m).take()
}

fn into_inner<V>(m: Mutex<Option<V>>) -> Option<V> {
    m.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_rules() {
        let scheduler = BatchScheduler::new(3);
        assert_eq!(scheduler.pool_size(0, true), 0);
        assert_eq!(scheduler.pool_size(2, true), 2);
        assert_eq!(scheduler.pool_size(10, true), 3);
        assert_eq!(scheduler.pool_size(10, false), 1);
        assert_eq!(BatchScheduler::new(0).max_concurrency(), 1);
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let scheduler = BatchScheduler::new(4);
        let cancel = CancellationToken::new();
        let out = scheduler
            .run(
                vec![30u64, 5, 20, 1],
                true,
                &cancel,
                |i, ms| async move {
                    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                    format!("{i}:{ms}")
                },
                |i, _| format!("{i}:skipped"),
            )
            .await;
        assert_eq!(out, vec!["0:30", "1:5", "2:20", "3:1"]);
    }

    #[tokio::test]
    async fn cancelled_before_start_skips_everything() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = BatchScheduler::new(2)
            .run(vec![1, 2, 3], true, &cancel, |_, x| async move { x * 10 }, |_, x| -x)
            .await;
        assert_eq!(out, vec![-1, -2, -3]);
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let cancel = CancellationToken::new();
        let out: Vec<i32> = BatchScheduler::new(2)
            .run(Vec::<i32>::new(), true, &cancel, |_, x| async move { x }, |_, x| x)
            .await;
        assert!(out.is_empty());
    }
}
