//! Fixed-size worker pool for secondary rendering.
//!
//! Jobs are queued on a bounded channel and picked up in submission order by
//! whichever worker is free. Shutdown is cooperative: workers finish the job
//! they are running, then exit; queued jobs are dropped.

use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

pub(crate) const METRIC_WORKER_REJECTED: &str = "markmap_worker_rejected_total";

pub type Job = BoxFuture<'static, ()>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("worker queue is full")]
    Saturated,
    #[error("worker pool is shut down")]
    Closed,
}

#[derive(Clone)]
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers on the current runtime.
    pub fn start(
        size: NonZeroUsize,
        queue_capacity: NonZeroUsize,
        shutdown: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.get());
        let receiver = Arc::new(Mutex::new(receiver));
        let tracker = TaskTracker::new();

        for index in 0..size.get() {
            tracker.spawn(run_worker(index, Arc::clone(&receiver), shutdown.clone()));
        }
        tracker.close();

        Self {
            sender,
            tracker,
            shutdown,
            size: size.get(),
        }
    }

    /// Queue a job without waiting. Fails when the queue is full or the pool
    /// is shutting down.
    pub fn submit<F>(&self, job: F) -> Result<(), WorkerPoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(WorkerPoolError::Closed);
        }

        self.sender.try_send(job.boxed()).map_err(|err| {
            counter!(METRIC_WORKER_REJECTED).increment(1);
            match err {
                mpsc::error::TrySendError::Full(_) => WorkerPoolError::Saturated,
                mpsc::error::TrySendError::Closed(_) => WorkerPoolError::Closed,
            }
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Signal shutdown and wait for every worker to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.wait().await;
    }
}

async fn run_worker(
    index: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    shutdown: CancellationToken,
) {
    loop {
        let job = {
            let mut receiver = tokio::select! {
                _ = shutdown.cancelled() => break,
                guard = receiver.lock() => guard,
            };
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                job = receiver.recv() => job,
            }
        };

        let Some(job) = job else {
            break;
        };

        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            warn!(
                target = "application::workers",
                worker = index,
                "worker job panicked; continuing"
            );
        }
    }

    debug!(target = "application::workers", worker = index, "worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    fn pool(size: usize, capacity: usize) -> WorkerPool {
        WorkerPool::start(
            NonZeroUsize::new(size).expect("size"),
            NonZeroUsize::new(capacity).expect("capacity"),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn runs_jobs_with_bounded_concurrency() {
        let pool = pool(2, 16);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            pool.submit(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit job");
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while done.load(Ordering::SeqCst) < 6 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("jobs finished");

        assert!(peak.load(Ordering::SeqCst) <= 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_rejects_instead_of_blocking() {
        let pool = pool(1, 1);
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        pool.submit(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        })
        .expect("first job");
        started_rx.await.expect("first job started");

        pool.submit(async {}).expect("second job queued");
        assert_eq!(pool.submit(async {}), Err(WorkerPoolError::Saturated));

        let _ = release_tx.send(());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_job_does_not_kill_worker() {
        let pool = pool(1, 4);
        let (tx, rx) = oneshot::channel();

        pool.submit(async { panic!("job blew up") }).expect("panicking job");
        pool.submit(async move {
            let _ = tx.send(());
        })
        .expect("follow-up job");

        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("follow-up ran in time")
            .expect("follow-up sent");
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = pool(2, 4);
        pool.shutdown().await;
        assert_eq!(pool.submit(async {}), Err(WorkerPoolError::Closed));
    }
}
