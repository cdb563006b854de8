//! Request coalescing for concurrent cache misses.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::OnceCell;

/// Collapses concurrent calls for the same key into one execution.
///
/// Callers arriving while a call for `key` is in flight await its result
/// instead of running their own. If the running caller is cancelled, a
/// waiting caller takes over and runs its closure. Once a call finishes the
/// key is released, so later callers start a fresh execution.
pub struct Coalescer<K, T> {
    in_flight: DashMap<K, Arc<OnceCell<T>>>,
}

impl<K, T> Default for Coalescer<K, T>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }
}

impl<K, T> Coalescer<K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn do_once<F, Fut>(&self, key: K, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut ran = false;
        let value = cell
            .get_or_init(|| {
                ran = true;
                op()
            })
            .await
            .clone();

        if ran {
            self.in_flight
                .remove_if(&key, |_, current| Arc::ptr_eq(current, &cell));
        } else {
            counter!("postrank_coalesced_reads_total").increment(1);
        }
        value
    }

    /// Keys with a call currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_execution() {
        let coalescer = Arc::new(Coalescer::<u32, u32>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coalescer = coalescer.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .do_once(1, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        42
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.expect("task joins"), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_run_independently() {
        let coalescer = Coalescer::<u32, u32>::new();
        let calls = AtomicU32::new(0);
        let (a, b) = tokio::join!(
            coalescer.do_once(1, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                1
            }),
            coalescer.do_once(2, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                2
            }),
        );
        assert_eq!((a, b), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn finished_calls_are_not_reused() {
        let coalescer = Coalescer::<&'static str, u32>::new();
        let first = coalescer.do_once("k", || async { 1 }).await;
        let second = coalescer.do_once("k", || async { 2 }).await;
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_takes_over_when_runner_is_cancelled() {
        let coalescer = Arc::new(Coalescer::<u32, u32>::new());

        let runner = {
            let coalescer = coalescer.clone();
            tokio::spawn(async move {
                coalescer
                    .do_once(7, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        1
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let waiter = {
            let coalescer = coalescer.clone();
            tokio::spawn(async move { coalescer.do_once(7, || async { 2 }).await })
        };
        tokio::task::yield_now().await;

        runner.abort();
        assert_eq!(waiter.await.expect("waiter joins"), 2);
    }
}
