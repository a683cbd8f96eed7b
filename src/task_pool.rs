use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A unit of fire-and-forget work.
pub type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// What `submit` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait for a free slot.
    Block,
    /// Discard the job and log a warning.
    Drop,
}

/// Bounded queue drained by a fixed set of worker tasks.
///
/// Callers never observe a job's outcome. A job that panics is logged and the
/// worker moves on to the next one.
pub struct TaskPool {
    /// `None` once the pool is shut down.
    tx: RwLock<Option<mpsc::Sender<Job>>>,
    overflow: OverflowPolicy,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    /// Spawn `workers` worker tasks on the current runtime.
    pub fn new(workers: usize, capacity: usize, overflow: OverflowPolicy) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&rx))))
            .collect();

        Self {
            tx: RwLock::new(Some(tx)),
            overflow,
            workers: Mutex::new(handles),
        }
    }

    pub async fn submit<F, Fut>(&self, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(tx) = self.sender() else {
            warn!("task pool closed, job discarded");
            return;
        };
        let job: Job = Box::new(move || job().boxed());
        match self.overflow {
            OverflowPolicy::Block => {
                if tx.send(job).await.is_err() {
                    warn!("task pool closed, job discarded");
                }
            }
            OverflowPolicy::Drop => match tx.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("task pool queue full, job dropped"),
                Err(TrySendError::Closed(_)) => warn!("task pool closed, job discarded"),
            },
        }
    }

    /// Stop accepting jobs, run what is already queued, and wait for the workers.
    pub async fn shutdown(&self) {
        // Workers see the channel close once the last sender is gone.
        self.tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "task pool worker exited abnormally");
            }
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Job>> {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        // Hold the lock only while waiting for the next job.
        let next = rx.lock().await.recv().await;
        let Some(job) = next else {
            debug!(worker = id, "task pool worker stopping");
            return;
        };

        if let Err(panic) = AssertUnwindSafe(async move { job().await })
            .catch_unwind()
            .await
        {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            error!(worker = id, panic = %msg, "task pool job panicked");
        }
    }
}
