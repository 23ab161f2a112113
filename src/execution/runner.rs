//! # Task Job Runner
//!
//! Runs one ready task job on this node:
//!
//! 1. **Claim**: record this node as the task's executor (once), mark the
//!    target task RUNNING and snapshot the process variables
//! 2. **Execute**: run the registered executor while a heartbeat ticker keeps
//!    `last_heartbeat_at` fresh, racing it against the execution expiration
//!    and the flow's cancellation signal
//! 3. **Finalize**: in one transaction, record the task outcome and move the
//!    node out of EXECUTING, advancing or ending the process run
//!
//! Claim and finalize both re-read the node; a node that is no longer
//! EXECUTING (cancelled or recovered meanwhile) is left untouched.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::executor::{ExecutionContext, ExecutionOutput, ExecutorRegistry};
use super::job::{ActiveTasks, TaskJob};
use super::router::JobHandler;
use super::task_log::TaskLogWriter;
use super::worker_pool::PoolError;
use crate::config::{HeartbeatConfig, TaskLogConfig};
use crate::engine::Variables;
use crate::error::{FlowError, FlowResult};
use crate::events::{EventPublisher, FlowEvent};
use crate::models::{ExecutorInfo, NodeInstance, NodeKind, TaskNode, TaskStatus};
use crate::orchestration::FlowLifecycle;
use crate::state_machine::{FlowNodeStatus, NodeEvent};
use crate::store::{FlowStore, FlowTransaction};

#[derive(Debug)]
enum RunOutcome {
    Succeeded(ExecutionOutput),
    Failed(String),
    Expired,
    Cancelled,
}

impl RunOutcome {
    fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

#[derive(Clone)]
pub struct TaskJobRunner {
    store: Arc<dyn FlowStore>,
    lifecycle: FlowLifecycle,
    registry: Arc<ExecutorRegistry>,
    active: ActiveTasks,
    publisher: EventPublisher,
    local: ExecutorInfo,
    heartbeat: HeartbeatConfig,
    task_log: TaskLogConfig,
}

impl std::fmt::Debug for TaskJobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskJobRunner")
            .field("local", &self.local)
            .field("registry", &self.registry)
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl TaskJobRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn FlowStore>,
        lifecycle: FlowLifecycle,
        registry: Arc<ExecutorRegistry>,
        active: ActiveTasks,
        publisher: EventPublisher,
        local: ExecutorInfo,
        heartbeat: HeartbeatConfig,
        task_log: TaskLogConfig,
    ) -> Self {
        Self {
            store,
            lifecycle,
            registry,
            active,
            publisher,
            local,
            heartbeat,
            task_log,
        }
    }

    async fn load_node(tx: &mut dyn FlowTransaction, job: &TaskJob) -> FlowResult<TaskNode> {
        tx.find_node(NodeKind::ServiceTask, job.node_id)
            .await?
            .and_then(NodeInstance::into_task)
            .ok_or_else(|| FlowError::not_found("TaskNode", "id", job.node_id))
    }

    async fn claim(&self, job: &TaskJob) -> FlowResult<Option<ExecutionContext>> {
        let mut tx = self.store.begin().await?;
        let node = Self::load_node(tx.as_mut(), job).await?;
        if node.status != FlowNodeStatus::Executing {
            debug!(
                flow_instance_id = job.flow_instance_id,
                node_id = node.id,
                status = %node.status,
                "Task node is not executing, skipping job"
            );
            return Ok(None);
        }

        let mut task = tx
            .find_task(job.task_id)
            .await?
            .ok_or_else(|| FlowError::not_found("Task", "id", job.task_id))?;
        if let Some(executor) = task.executor.as_ref().filter(|e| **e != self.local) {
            warn!(
                flow_instance_id = job.flow_instance_id,
                task_id = task.id,
                executor = %executor,
                "Task is already executing on another node, skipping job"
            );
            return Ok(None);
        }

        let now = Utc::now();
        task.executor = Some(self.local.clone());
        task.status = TaskStatus::Running;
        task.last_heartbeat_at = Some(now);
        tx.update_task(&task).await?;

        let variables = self
            .lifecycle
            .engine()
            .variables(tx.as_mut(), &job.process_instance_id)
            .await?;
        let sequence = tx
            .list_nodes(job.flow_instance_id)
            .await?
            .into_iter()
            .filter_map(NodeInstance::into_task)
            .filter(|n| n.task_type == node.task_type && n.status == FlowNodeStatus::Completed)
            .count();
        tx.commit().await?;

        let log = TaskLogWriter::new(&self.task_log.log_root, &task);
        Ok(Some(ExecutionContext {
            flow_instance_id: job.flow_instance_id,
            node,
            task,
            variables,
            sequence,
            log,
        }))
    }

    fn spawn_heartbeat(&self, task_id: i64) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let period = self.heartbeat.interval();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if let Err(e) = beat(store.as_ref(), task_id).await {
                    warn!(task_id = task_id, error = %e, "Task heartbeat failed");
                }
            }
        })
    }

    async fn execute(
        &self,
        job: &TaskJob,
        ctx: ExecutionContext,
        cancel: watch::Receiver<bool>,
    ) -> RunOutcome {
        let executor = match self.registry.create(job.task_type) {
            Ok(executor) => executor,
            Err(e) => return RunOutcome::Failed(e.to_string()),
        };
        let expiration =
            Duration::from_secs(ctx.task.execution_expiration_interval_secs.max(1) as u64);

        tokio::select! {
            result = executor.execute(ctx) => match result {
                Ok(output) => RunOutcome::Succeeded(output),
                Err(e) => RunOutcome::Failed(e.to_string()),
            },
            _ = tokio::time::sleep(expiration) => RunOutcome::Expired,
            _ = cancelled(cancel) => RunOutcome::Cancelled,
        }
    }

    async fn finalize(&self, job: &TaskJob, outcome: RunOutcome) -> FlowResult<Vec<TaskJob>> {
        let mut tx = self.store.begin().await?;
        let node = Self::load_node(tx.as_mut(), job).await?;
        if node.status != FlowNodeStatus::Executing {
            info!(
                flow_instance_id = job.flow_instance_id,
                node_id = node.id,
                status = %node.status,
                "Task node left EXECUTING while running, outcome discarded"
            );
            return Ok(Vec::new());
        }

        let mut task = tx
            .find_task(job.task_id)
            .await?
            .ok_or_else(|| FlowError::not_found("Task", "id", job.task_id))?;
        let (event, output) = match outcome {
            RunOutcome::Succeeded(output) => {
                task.status = TaskStatus::Done;
                if output.result.is_some() {
                    task.result = output.result;
                }
                (NodeEvent::Complete, output.variables)
            }
            RunOutcome::Failed(message) => {
                task.status = TaskStatus::Failed;
                task.result = Some(json!({ "error": message }));
                (NodeEvent::Fail(message), Variables::new())
            }
            RunOutcome::Expired => {
                task.status = TaskStatus::Failed;
                task.result = Some(json!({ "error": "execution expired" }));
                (NodeEvent::Expire, Variables::new())
            }
            RunOutcome::Cancelled => {
                task.status = TaskStatus::Canceled;
                (NodeEvent::Cancel, Variables::new())
            }
        };
        tx.update_task(&task).await?;

        let jobs = self
            .lifecycle
            .finish_task(tx.as_mut(), job, node, event, output)
            .await?;
        tx.commit().await?;
        Ok(jobs)
    }
}

/// Only the heartbeat column is written, so a recovery pass or a cancel that
/// moved the task out of RUNNING meanwhile is never undone
async fn beat(store: &dyn FlowStore, task_id: i64) -> FlowResult<()> {
    let mut tx = store.begin().await?;
    if tx.touch_heartbeat(task_id, Utc::now()).await? == 0 {
        debug!(task_id = task_id, "Task no longer running, heartbeat skipped");
    }
    tx.commit().await
}

/// Resolves once the flow's cancellation signal is raised
async fn cancelled(mut signal: watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl JobHandler for TaskJobRunner {
    async fn handle(&self, job: TaskJob) -> FlowResult<Vec<TaskJob>> {
        let cancel = self.active.register(job.flow_instance_id);
        let ctx = match self.claim(&job).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => {
                self.active.finish(job.flow_instance_id);
                return Ok(Vec::new());
            }
            Err(e) => {
                self.active.finish(job.flow_instance_id);
                return Err(e);
            }
        };

        let task_id = ctx.task.id;
        let log = ctx.log.clone();
        info!(
            flow_instance_id = job.flow_instance_id,
            node_id = job.node_id,
            task_id = task_id,
            task_type = %job.task_type,
            "🚀 Task started"
        );
        if let Err(e) = log.info(&format!("Task {task_id} started on {}", self.local)).await {
            warn!(task_id = task_id, error = %e, "Task log write failed");
        }
        self.publisher.publish(FlowEvent::TaskStarted {
            flow_instance_id: job.flow_instance_id,
            task_id,
            task_type: job.task_type,
        });

        let heartbeat = self.spawn_heartbeat(task_id);
        let outcome = self.execute(&job, ctx, cancel).await;
        heartbeat.abort();
        self.active.finish(job.flow_instance_id);

        let succeeded = outcome.succeeded();
        let summary = match &outcome {
            RunOutcome::Succeeded(_) => "finished".to_string(),
            RunOutcome::Failed(message) => format!("failed: {message}"),
            RunOutcome::Expired => "expired".to_string(),
            RunOutcome::Cancelled => "was cancelled".to_string(),
        };
        let written = if succeeded {
            log.info(&format!("Task {task_id} {summary}")).await
        } else {
            log.error(&format!("Task {task_id} {summary}")).await
        };
        if let Err(e) = written {
            warn!(task_id = task_id, error = %e, "Task log write failed");
        }
        info!(
            flow_instance_id = job.flow_instance_id,
            task_id = task_id,
            outcome = %summary,
            "🏁 Task run ended"
        );

        let jobs = self.finalize(&job, outcome).await?;
        self.publisher.publish(FlowEvent::TaskFinished {
            flow_instance_id: job.flow_instance_id,
            task_id,
            task_type: job.task_type,
            succeeded,
        });
        Ok(jobs)
    }

    async fn on_submit_failure(&self, job: &TaskJob, error: &PoolError) -> FlowResult<()> {
        let mut tx = self.store.begin().await?;
        let node = Self::load_node(tx.as_mut(), job).await?;
        if node.status != FlowNodeStatus::Executing {
            return Ok(());
        }
        if let Some(mut task) = tx.find_task(job.task_id).await? {
            task.status = TaskStatus::Failed;
            task.result = Some(json!({ "error": error.to_string() }));
            tx.update_task(&task).await?;
        }
        self.lifecycle
            .finish_task(
                tx.as_mut(),
                job,
                node,
                NodeEvent::Fail(error.to_string()),
                Variables::new(),
            )
            .await?;
        tx.commit().await?;
        warn!(
            flow_instance_id = job.flow_instance_id,
            error = %error,
            "Flow failed because its task could not be scheduled"
        );
        Ok(())
    }
}
