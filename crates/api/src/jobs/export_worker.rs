//! FIFO worker pool for export jobs.
//!
//! Job ids wait in submission order. At most `max_concurrency` executions run
//! at once, each in its own task; when one settles the next id is started.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error};
use uuid::Uuid;

/// Runs one export job to a terminal state.
#[async_trait]
pub trait ExportExecutor: Send + Sync + 'static {
    /// Execute the job. Failures are recorded on the job by the executor.
    async fn run(&self, job_id: Uuid);

    /// Record that the execution of `job_id` died without finishing.
    async fn abort(&self, job_id: Uuid, reason: String);
}

#[derive(Debug, Default)]
struct PoolState {
    pending: VecDeque<Uuid>,
    running: usize,
}

struct PoolInner {
    executor: Arc<dyn ExportExecutor>,
    max_concurrency: usize,
    state: Mutex<PoolState>,
}

/// Bounded-concurrency dispatcher. Cloning shares the queue.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// `max_concurrency` below 1 is raised to 1.
    pub fn new(executor: Arc<dyn ExportExecutor>, max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                executor,
                max_concurrency: max_concurrency.max(1),
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Append a job id and start it if a slot is free.
    pub fn enqueue(&self, job_id: Uuid) {
        self.state().pending.push_back(job_id);
        self.tick();
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn running(&self) -> usize {
        self.state().running
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start pending jobs while slots are free.
    fn tick(&self) {
        loop {
            let next = {
                let mut state = self.state();
                if state.running >= self.inner.max_concurrency {
                    None
                } else {
                    let next = state.pending.pop_front();
                    if next.is_some() {
                        state.running += 1;
                    }
                    next
                }
            };

            match next {
                Some(job_id) => self.dispatch(job_id),
                None => break,
            }
        }
    }

    fn dispatch(&self, job_id: Uuid) {
        let pool = self.clone();
        tokio::spawn(async move {
            let executor = Arc::clone(&pool.inner.executor);
            let execution = tokio::spawn(async move { executor.run(job_id).await });

            if let Err(join_error) = execution.await {
                let reason = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    join_error.to_string()
                };
                error!(job_id = %job_id, reason = %reason, "Export execution aborted");
                pool.inner
                    .executor
                    .abort(job_id, format!("export worker aborted: {}", reason))
                    .await;
            }

            pool.settle(job_id);
        });
    }

    fn settle(&self, job_id: Uuid) {
        {
            let mut state = self.state();
            state.running = state.running.saturating_sub(1);
            debug!(
                job_id = %job_id,
                running = state.running,
                pending = state.pending.len(),
                "Export slot released"
            );
        }
        self.tick();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("WorkerPool")
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("running", &state.running)
            .field("pending", &state.pending.len())
            .finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingExecutor {
        current: AtomicUsize,
        peak: AtomicUsize,
        started: Mutex<Vec<Uuid>>,
        aborted: Mutex<Vec<(Uuid, String)>>,
        panic_on: Mutex<Option<Uuid>>,
    }

    #[async_trait]
    impl ExportExecutor for RecordingExecutor {
        async fn run(&self, job_id: Uuid) {
            self.started.lock().unwrap().push(job_id);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            if *self.panic_on.lock().unwrap() == Some(job_id) {
                panic!("boom");
            }
        }

        async fn abort(&self, job_id: Uuid, reason: String) {
            self.aborted.lock().unwrap().push((job_id, reason));
        }
    }

    async fn drained(pool: &WorkerPool) {
        for _ in 0..500 {
            if pool.pending_len() == 0 && pool.running() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("worker pool did not drain: {:?}", pool);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let executor = Arc::new(RecordingExecutor::default());
        let pool = WorkerPool::new(executor.clone(), 2);

        for _ in 0..10 {
            pool.enqueue(Uuid::new_v4());
            assert!(pool.running() <= 2);
        }
        drained(&pool).await;

        assert_eq!(executor.started.lock().unwrap().len(), 10);
        assert_eq!(executor.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fifo_order_with_single_slot() {
        let executor = Arc::new(RecordingExecutor::default());
        let pool = WorkerPool::new(executor.clone(), 1);

        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            pool.enqueue(*id);
        }
        assert_eq!(pool.running(), 1);
        assert_eq!(pool.pending_len(), 4);

        drained(&pool).await;
        assert_eq!(*executor.started.lock().unwrap(), ids);
        assert_eq!(executor.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_is_isolated_to_its_job() {
        let executor = Arc::new(RecordingExecutor::default());
        let bad = Uuid::new_v4();
        *executor.panic_on.lock().unwrap() = Some(bad);
        let pool = WorkerPool::new(executor.clone(), 1);

        let after = Uuid::new_v4();
        pool.enqueue(bad);
        pool.enqueue(after);
        drained(&pool).await;

        let aborted = executor.aborted.lock().unwrap();
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].0, bad);
        assert_eq!(aborted[0].1, "export worker aborted: boom");
        assert!(executor.started.lock().unwrap().contains(&after));
    }

    #[test]
    fn test_zero_concurrency_is_raised() {
        let pool = WorkerPool::new(Arc::new(RecordingExecutor::default()), 0);
        assert_eq!(pool.max_concurrency(), 1);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new("owned".to_string())), "owned");
        assert_eq!(panic_message(Box::new(42)), "panic");
    }
}
