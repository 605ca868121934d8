// src/plant/pool.rs

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Fixed-size pool of workers.
///
/// Every submitted job gets its own Tokio task, but only `size` of them run
/// at a time; the rest wait for a permit in submission order.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers currently running a job.
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    pub fn spawn<F>(&self, job: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                debug!("worker pool closed; job dropped");
                return;
            };
            job.await;
        })
    }
}
