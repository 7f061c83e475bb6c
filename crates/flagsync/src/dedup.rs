//! Single-flight execution keyed by string

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use flagsync_core::{Result, SyncError};

struct InFlight<T> {
    id: u64,
    tx: broadcast::Sender<Result<T>>,
    task: AbortHandle,
}

/// Runs at most one computation per key at a time.
///
/// Callers arriving while a computation for their key is pending share its
/// result instead of starting another one. The computation runs on its own
/// task, so a caller dropping its future does not cancel it for the others.
pub struct Deduplicator<T> {
    inflight: Arc<DashMap<String, InFlight<T>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for Deduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T> Default for Deduplicator<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `producer` for `key`, or join the computation already pending for it.
    ///
    /// Every caller that joined receives the same result, errors included.
    pub async fn execute<F, Fut>(&self, key: &str, producer: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        // The shard lock is held until the new entry is inserted, so the
        // spawned task cannot settle and remove it before it exists.
        let mut rx = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(pending) => pending.get().tx.subscribe(),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = broadcast::channel(1);
                let settle = Settle {
                    map: Arc::clone(&self.inflight),
                    key: key.to_string(),
                    id,
                    tx: Some(tx.clone()),
                };
                let fut = producer();
                let task = tokio::spawn(async move {
                    let result = fut.await;
                    settle.finish(result);
                });
                slot.insert(InFlight {
                    id,
                    tx,
                    task: task.abort_handle(),
                });
                rx
            }
        };

        match rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Cancelled),
        }
    }

    /// Number of keys with a pending computation
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Callers currently waiting on `key`
    pub fn waiters(&self, key: &str) -> usize {
        self.inflight
            .get(key)
            .map(|pending| pending.tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inflight.contains_key(key)
    }

    /// Abort every pending computation; their waiters get [`SyncError::Cancelled`]
    pub fn cancel_all(&self) {
        let keys: Vec<String> = self.inflight.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, pending)) = self.inflight.remove(&key) {
                pending.task.abort();
            }
        }
    }
}

/// Removes the registry entry and delivers the result exactly once.
///
/// Also runs when the task is aborted or the producer panics, so waiters
/// never hang on a sender nobody will use.
struct Settle<T> {
    map: Arc<DashMap<String, InFlight<T>>>,
    key: String,
    id: u64,
    tx: Option<broadcast::Sender<Result<T>>>,
}

impl<T> Settle<T> {
    fn finish(mut self, result: Result<T>) {
        self.map.remove_if(&self.key, |_, pending| pending.id == self.id);
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }
}

impl<T> Drop for Settle<T> {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        self.map.remove_if(&self.key, |_, pending| pending.id == self.id);
        let error = if std::thread::panicking() {
            SyncError::Internal("in-flight request panicked".to_string())
        } else {
            SyncError::Cancelled
        };
        let _ = tx.send(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_run() {
        let dedup = Deduplicator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let dedup = dedup.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    dedup
                        .execute("fetch-config", move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(7)
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_waiters_see_same_error() {
        let dedup = Deduplicator::<u32>::new();

        let (a, b) = tokio::join!(
            dedup.execute("k", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(SyncError::HttpStatus(503))
            }),
            dedup.execute("k", || async { Ok(1) }),
        );

        assert_eq!(a, Err(SyncError::HttpStatus(503)));
        assert_eq!(b, Err(SyncError::HttpStatus(503)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_call_after_settle_runs_again() {
        let dedup = Deduplicator::<usize>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in 1..=3 {
            let calls = calls.clone();
            let result = dedup
                .execute("k", move || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) })
                .await;
            assert_eq!(result, Ok(expected));
            assert!(!dedup.is_pending("k"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_run_independently() {
        let dedup = Deduplicator::<&'static str>::new();
        let (a, b) = tokio::join!(
            dedup.execute("fetch-metadata:a", || async { Ok("a") }),
            dedup.execute("fetch-metadata:b", || async { Ok("b") }),
        );
        assert_eq!(a, Ok("a"));
        assert_eq!(b, Ok("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_does_not_cancel_others() {
        let dedup = Deduplicator::<u32>::new();

        let first = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                dedup
                    .execute("k", || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(42)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = {
            let dedup = dedup.clone();
            tokio::spawn(async move { dedup.execute("k", || async { Ok(0) }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dedup.waiters("k"), 2);

        first.abort();
        assert_eq!(second.await.unwrap(), Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_fails_waiters() {
        let dedup = Deduplicator::<u32>::new();

        let waiter = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                dedup
                    .execute("k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(dedup.in_flight(), 1);

        dedup.cancel_all();
        assert_eq!(waiter.await.unwrap(), Err(SyncError::Cancelled));
        assert_eq!(dedup.in_flight(), 0);

        assert_eq!(dedup.execute("k", || async { Ok(2) }).await, Ok(2));
    }

    #[tokio::test]
    async fn test_cancel_all_when_idle_is_noop() {
        let dedup = Deduplicator::<u32>::new();
        dedup.cancel_all();
        dedup.cancel_all();
        assert_eq!(dedup.execute("k", || async { Ok(5) }).await, Ok(5));
    }

    #[tokio::test]
    async fn test_panicking_producer_fails_waiters() {
        let dedup = Deduplicator::<u32>::new();
        let result = dedup
            .execute("k", || async {
                if true {
                    panic!("boom");
                }
                Ok(0)
            })
            .await;
        assert!(matches!(result, Err(SyncError::Internal(_))));
        assert_eq!(dedup.in_flight(), 0);
    }
}
