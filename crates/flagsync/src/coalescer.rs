//! Time-windowed batching of equivalent requests

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use flagsync_core::{NoopMetrics, Result, SyncError, SyncMetrics};

/// Coalescing window configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescerConfig {
    /// How long a window stays open after its first caller
    pub window: Duration,
    /// A window closes as soon as this many callers joined
    pub max_batch_size: usize,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(100),
            max_batch_size: 16,
        }
    }
}

impl CoalescerConfig {
    pub fn new(window: Duration, max_batch_size: usize) -> Self {
        Self {
            window,
            max_batch_size: max_batch_size.max(1),
        }
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }
}

type Executor<T> = Box<dyn FnOnce(usize) -> BoxFuture<'static, Result<T>> + Send>;

struct Window<T> {
    id: u64,
    waiters: Vec<oneshot::Sender<Result<T>>>,
    executor: Executor<T>,
    timer: Option<AbortHandle>,
}

struct Shared<T, M> {
    config: CoalescerConfig,
    open: Mutex<Option<Window<T>>>,
    running: DashMap<u64, AbortHandle>,
    next_id: AtomicU64,
    metrics: Arc<M>,
}

/// Batches calls that arrive within a time window into one executor run.
///
/// The first caller of an idle period opens a window and supplies the
/// executor; later callers join it and their own executors are dropped.
/// The window closes when the timer fires or `max_batch_size` callers have
/// joined, whichever comes first.
pub struct Coalescer<T, M: SyncMetrics = NoopMetrics> {
    shared: Arc<Shared<T, M>>,
}

impl<T, M: SyncMetrics> Clone for Coalescer<T, M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Coalescer<T, NoopMetrics>
where
    T: Clone + Send + 'static,
{
    pub fn new(config: CoalescerConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }
}

impl<T, M> Coalescer<T, M>
where
    T: Clone + Send + 'static,
    M: SyncMetrics,
{
    pub fn with_metrics(mut config: CoalescerConfig, metrics: Arc<M>) -> Self {
        config.max_batch_size = config.max_batch_size.max(1);
        Self {
            shared: Arc::new(Shared {
                config,
                open: Mutex::new(None),
                running: DashMap::new(),
                next_id: AtomicU64::new(0),
                metrics,
            }),
        }
    }

    pub fn config(&self) -> &CoalescerConfig {
        &self.shared.config
    }

    /// Join the open window, or open a new one with `executor`.
    ///
    /// `executor` receives the number of callers in the closed window.
    pub async fn coalesce<F, Fut>(&self, executor: F) -> Result<T>
    where
        F: FnOnce(usize) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let full = {
            let mut open = self.shared.open.lock();
            match open.as_mut() {
                Some(window) => window.waiters.push(tx),
                None => {
                    let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
                    let timer = self.spawn_timer(id);
                    *open = Some(Window {
                        id,
                        waiters: vec![tx],
                        executor: Box::new(move |batch| Box::pin(executor(batch))),
                        timer: Some(timer),
                    });
                }
            }

            let reached_cap = open
                .as_ref()
                .is_some_and(|w| w.waiters.len() >= self.shared.config.max_batch_size);
            if reached_cap { open.take() } else { None }
        };

        if let Some(window) = full {
            self.run(window);
        }

        rx.await.unwrap_or(Err(SyncError::Cancelled))
    }

    /// Callers waiting in the open window
    pub fn pending(&self) -> usize {
        self.shared
            .open
            .lock()
            .as_ref()
            .map(|w| w.waiters.len())
            .unwrap_or(0)
    }

    /// Executor runs that have not finished yet
    pub fn running(&self) -> usize {
        self.shared.running.len()
    }

    /// Fail the open window without running its executor and abort running batches.
    ///
    /// Waiters receive [`SyncError::Cancelled`]. The coalescer accepts new calls
    /// right away.
    pub fn cancel_all(&self) {
        if let Some(window) = self.shared.open.lock().take() {
            if let Some(timer) = window.timer {
                timer.abort();
            }
            // Dropping the senders wakes every waiter with Cancelled
        }

        let ids: Vec<u64> = self.shared.running.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, task)) = self.shared.running.remove(&id) {
                task.abort();
            }
        }
    }

    fn spawn_timer(&self, id: u64) -> AbortHandle {
        let this = self.clone();
        let window = self.shared.config.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            this.close(id);
        })
        .abort_handle()
    }

    fn close(&self, id: u64) {
        let window = {
            let mut open = self.shared.open.lock();
            match open.as_ref() {
                Some(window) if window.id == id => open.take(),
                _ => None,
            }
        };
        if let Some(window) = window {
            self.run(window);
        }
    }

    fn run(&self, window: Window<T>) {
        let Window {
            id,
            waiters,
            executor,
            timer,
        } = window;
        if let Some(timer) = timer {
            timer.abort();
        }

        let batch = waiters.len();
        self.shared.metrics.record_batch(batch);
        tracing::trace!(target: "flagsync", batch, "coalescing window closed");

        // Holding the entry keeps the task from removing its id before it is registered
        if let Entry::Vacant(slot) = self.shared.running.entry(id) {
            let settle = Settle {
                shared: Arc::clone(&self.shared),
                id,
                waiters: Some(waiters),
            };
            let task = tokio::spawn(async move {
                let result = executor(batch).await;
                settle.finish(result);
            });
            slot.insert(task.abort_handle());
        }
    }
}

/// Unregisters a batch and answers its waiters exactly once.
///
/// Also runs when the batch is aborted or its executor panics.
struct Settle<T, M> {
    shared: Arc<Shared<T, M>>,
    id: u64,
    waiters: Option<Vec<oneshot::Sender<Result<T>>>>,
}

impl<T: Clone, M> Settle<T, M> {
    fn finish(mut self, result: Result<T>) {
        self.shared.running.remove(&self.id);
        for waiter in self.waiters.take().into_iter().flatten() {
            let _ = waiter.send(result.clone());
        }
    }
}

impl<T, M> Drop for Settle<T, M> {
    fn drop(&mut self) {
        let Some(waiters) = self.waiters.take() else {
            return;
        };
        self.shared.running.remove(&self.id);
        if std::thread::panicking() {
            for waiter in waiters {
                let _ = waiter.send(Err(SyncError::Internal(
                    "coalesced executor panicked".to_string(),
                )));
            }
        }
        // Otherwise the batch was aborted; dropped senders read as Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn coalescer(window_ms: u64, max: usize) -> Coalescer<usize> {
        Coalescer::new(CoalescerConfig::new(Duration::from_millis(window_ms), max))
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_batches_callers() {
        let coalescer = coalescer(50, 100);
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let coalescer = coalescer.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    coalescer
                        .coalesce(move |batch| async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(batch)
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(5));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_closes_before_timer() {
        let coalescer = coalescer(10_000, 4);
        let start = tokio::time::Instant::now();

        let results = futures::future::join_all(
            (0..4).map(|_| coalescer.coalesce(|batch| async move { Ok(batch) })),
        )
        .await;

        assert!(results.iter().all(|r| *r == Ok(4)));
        assert!(start.elapsed() < Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_delivered_to_whole_window_only() {
        let coalescer = coalescer(20, 10);

        let (a, b) = tokio::join!(
            coalescer.coalesce(|_| async { Err(SyncError::Timeout) }),
            coalescer.coalesce(|_| async { Ok(1) }),
        );
        assert_eq!(a, Err(SyncError::Timeout));
        assert_eq!(b, Err(SyncError::Timeout));

        let next = coalescer.coalesce(|batch| async move { Ok(batch) }).await;
        assert_eq!(next, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_skips_executor() {
        let coalescer = coalescer(1_000, 10);
        let calls = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let coalescer = coalescer.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                coalescer
                    .coalesce(move |batch| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(batch)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(coalescer.pending(), 1);

        coalescer.cancel_all();
        assert_eq!(waiter.await.unwrap(), Err(SyncError::Cancelled));
        assert_eq!(coalescer.pending(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(coalescer.coalesce(|b| async move { Ok(b) }).await, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_aborts_running_batch() {
        let coalescer = coalescer(1, 1);

        let waiter = {
            let coalescer = coalescer.clone();
            tokio::spawn(async move {
                coalescer
                    .coalesce(|_| async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(0)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(coalescer.running(), 1);

        coalescer.cancel_all();
        assert_eq!(waiter.await.unwrap(), Err(SyncError::Cancelled));
        assert_eq!(coalescer.running(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_when_idle_is_noop() {
        let coalescer = coalescer(1, 1);
        coalescer.cancel_all();
        assert_eq!(coalescer.coalesce(|b| async move { Ok(b) }).await, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_panic_reported_and_unregistered() {
        let coalescer = coalescer(1, 2);

        let (a, b) = tokio::join!(
            coalescer.coalesce(|_| async {
                if true {
                    panic!("executor blew up");
                }
                Ok(0)
            }),
            coalescer.coalesce(|batch| async move { Ok(batch) }),
        );
        assert!(matches!(a, Err(SyncError::Internal(_))));
        assert_eq!(a, b);
        assert_eq!(coalescer.running(), 0);

        assert_eq!(coalescer.coalesce(|b| async move { Ok(b) }).await, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_batch_size_runs_each_caller() {
        let coalescer: Coalescer<usize> = Coalescer::new(CoalescerConfig {
            window: Duration::from_secs(60),
            max_batch_size: 0,
        });
        assert_eq!(coalescer.config().max_batch_size, 1);

        let start = tokio::time::Instant::now();
        assert_eq!(coalescer.coalesce(|b| async move { Ok(b) }).await, Ok(1));
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
