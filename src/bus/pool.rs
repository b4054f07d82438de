//! Fixed-size named worker pools owned by the event bus.
//!
//! Grounded in the teacher's `pipeline/worker_pool.rs` semaphore +
//! `JoinSet` shape, trimmed to a fixed concurrency limit — the spec
//! calls for static pool sizes (`pool1` 5, `pool2` 3), not the
//! teacher's adaptive scaling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use super::event::PoolId;

pub struct WorkerPool {
    id: PoolId,
    semaphore: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl WorkerPool {
    pub fn new(id: PoolId, size: usize) -> Self {
        Self {
            id,
            semaphore: Arc::new(Semaphore::new(size)),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Submit a job to the pool. Awaiting this only awaits acquisition
    /// of a free slot (the backpressure point called out in spec.md
    /// §5) — the job itself runs detached on the pool's `JoinSet`.
    pub async fn submit<F, Fut>(&self, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(pool = ?self.id, "worker pool semaphore closed, running inline");
                job().await;
                return;
            }
        };
        let mut tasks = self.tasks.lock();
        tasks.spawn(async move {
            let _permit = permit;
            job().await;
        });
    }

    /// Drain in-flight handlers with a bounded wait, then return. Does
    /// not accept new submissions after this returns (callers are
    /// expected to stop publishing first).
    pub async fn shutdown(&self, timeout: Duration) {
        let mut tasks = {
            let mut guard = self.tasks.lock();
            std::mem::take(&mut *guard)
        };
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(pool = ?self.id, "worker pool shutdown timed out with handlers still in flight");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn bounds_concurrency() {
        let pool = Arc::new(WorkerPool::new(PoolId::Pool1, 2));
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let active = active.clone();
            let max_seen = max_seen.clone();
            pool.submit(move || async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
            .await;
        }

        pool.shutdown(Duration::from_secs(2)).await;
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
