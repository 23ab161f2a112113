//! # Async Execution Router
//!
//! Ready task jobs go to one of three bounded pools chosen by the flow's
//! task type, so bulk data generation and import/export cannot starve the
//! rest. A job the pools refuse is handed back to the [`JobHandler`], which
//! marks its flow failed; that marking is retried a bounded number of times
//! and then abandoned.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::job::TaskJob;
use super::worker_pool::{PoolError, WorkerPool};
use crate::config::ExecutorConfig;
use crate::error::FlowResult;
use crate::logging::log_error;
use crate::models::TaskType;

/// Runs jobs handed over by the router
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one job; returns the jobs it made ready
    async fn handle(&self, job: TaskJob) -> FlowResult<Vec<TaskJob>>;

    /// Record that `job` could not be scheduled
    async fn on_submit_failure(&self, job: &TaskJob, error: &PoolError) -> FlowResult<()>;
}

pub struct AsyncExecutionRouter {
    mock_data: WorkerPool,
    loader_dumper: WorkerPool,
    default: WorkerPool,
    handler: Arc<dyn JobHandler>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for AsyncExecutionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncExecutionRouter")
            .field("mock_data", &self.mock_data)
            .field("loader_dumper", &self.loader_dumper)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

impl AsyncExecutionRouter {
    /// Start the pools; must be called inside a tokio runtime
    pub fn new(config: &ExecutorConfig, handler: Arc<dyn JobHandler>) -> Arc<Self> {
        Arc::new(Self {
            mock_data: WorkerPool::new("mock_data", &config.mock_data, config.rejection_policy),
            loader_dumper: WorkerPool::new(
                "loader_dumper",
                &config.loader_dumper,
                config.rejection_policy,
            ),
            default: WorkerPool::new("default", &config.default, config.rejection_policy),
            handler,
            config: config.clone(),
        })
    }

    pub fn pool_for(&self, flow_task_type: TaskType) -> &WorkerPool {
        if flow_task_type.is_bulk_data() {
            &self.mock_data
        } else if flow_task_type.is_loader_dumper() {
            &self.loader_dumper
        } else {
            &self.default
        }
    }

    pub async fn submit(self: &Arc<Self>, job: TaskJob) -> Result<(), PoolError> {
        let pool = self.pool_for(job.flow_task_type);
        debug!(
            flow_instance_id = job.flow_instance_id,
            node_id = job.node_id,
            pool = pool.name(),
            "Submitting task job"
        );

        let router = Arc::clone(self);
        let queued = job.clone();
        let result = pool
            .submit(Box::pin(async move { router.run(queued).await }))
            .await;
        if let Err(error) = &result {
            warn!(
                flow_instance_id = job.flow_instance_id,
                pool = pool.name(),
                error = %error,
                "Task job submission failed"
            );
            self.retry_submit_failure(job, error.clone());
        }
        result
    }

    /// Submit from a detached task; used for jobs produced while another job
    /// or a request is still on the stack
    pub fn submit_all(self: &Arc<Self>, jobs: Vec<TaskJob>) {
        if jobs.is_empty() {
            return;
        }
        let router = Arc::clone(self);
        tokio::spawn(async move {
            for job in jobs {
                // Failures are handled by the submit-failure path
                let _ = router.submit(job).await;
            }
        });
    }

    async fn run(self: Arc<Self>, job: TaskJob) {
        match self.handler.handle(job.clone()).await {
            Ok(next) => self.submit_all(next),
            Err(e) => log_error(
                "AsyncExecutionRouter",
                "run",
                &e.to_string(),
                Some(&format!("flow_instance_id={}", job.flow_instance_id)),
            ),
        }
    }

    fn retry_submit_failure(self: &Arc<Self>, job: TaskJob, error: PoolError) {
        let handler = Arc::clone(&self.handler);
        let attempts = self.config.submit_retry_attempts.max(1);
        let backoff = self.config.submit_retry_backoff();

        tokio::spawn(async move {
            for attempt in 1..=attempts {
                match handler.on_submit_failure(&job, &error).await {
                    Ok(()) => return,
                    Err(e) => {
                        warn!(
                            flow_instance_id = job.flow_instance_id,
                            attempt = attempt,
                            error = %e,
                            "Marking flow failed after submission failure did not succeed"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
            log_error(
                "AsyncExecutionRouter",
                "submit_failure",
                "giving up on marking the flow failed",
                Some(&format!("flow_instance_id={}", job.flow_instance_id)),
            );
        });
    }

    /// Drain all pools, waiting at most the configured time for each
    pub async fn shutdown(&self) -> bool {
        let wait = self.config.shutdown_wait();
        let (a, b, c) = tokio::join!(
            self.mock_data.shutdown(wait),
            self.loader_dumper.shutdown(wait),
            self.default.shutdown(wait),
        );
        a && b && c
    }
}
