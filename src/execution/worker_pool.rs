//! Bounded worker pool: a fixed number of workers pulling boxed jobs from a
//! bounded queue.

use futures::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{PoolConfig, RejectionPolicy};

pub type PoolJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Worker pool '{0}' is full")]
    Rejected(String),
    #[error("Worker pool '{0}' is shut down")]
    Shutdown(String),
}

pub struct WorkerPool {
    name: String,
    policy: RejectionPolicy,
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<PoolJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("capacity", &self.capacity)
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn the workers; must be called inside a tokio runtime
    pub fn new(name: impl Into<String>, config: &PoolConfig, policy: RejectionPolicy) -> Self {
        let name = name.into();
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel::<PoolJob>(capacity);
        let receiver = Arc::new(AsyncMutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                let pool = name.clone();
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    debug!(pool = %pool, worker = index, "Worker stopped");
                })
            })
            .collect();

        info!(
            pool = %name,
            workers = config.workers.max(1),
            queue_capacity = capacity,
            "🏊 Worker pool started"
        );
        Self {
            name,
            policy,
            capacity,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs waiting in the queue
    pub fn queued(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map(|sender| self.capacity - sender.capacity())
            .unwrap_or(0)
    }

    pub async fn submit(&self, job: PoolJob) -> Result<(), PoolError> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| PoolError::Shutdown(self.name.clone()))?;

        match self.policy {
            RejectionPolicy::Block => sender
                .send(job)
                .await
                .map_err(|_| PoolError::Shutdown(self.name.clone())),
            RejectionPolicy::Reject => sender.try_send(job).map_err(|e| match e {
                TrySendError::Full(_) => PoolError::Rejected(self.name.clone()),
                TrySendError::Closed(_) => PoolError::Shutdown(self.name.clone()),
            }),
        }
    }

    /// Stop accepting jobs and wait up to `wait` for queued jobs to drain;
    /// returns whether the pool drained before the deadline
    pub async fn shutdown(&self, wait: Duration) -> bool {
        self.sender.lock().take();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        match tokio::time::timeout(wait, join_all(handles)).await {
            Ok(_) => {
                info!(pool = %self.name, "Worker pool drained");
                true
            }
            Err(_) => {
                warn!(
                    pool = %self.name,
                    wait_secs = wait.as_secs(),
                    "Worker pool did not drain in time, aborting workers"
                );
                aborts.iter().for_each(|abort| abort.abort());
                false
            }
        }
    }
}
