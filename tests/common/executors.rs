//! Scripted task executors for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use flowgate_core::error::{FlowError, FlowResult};
use flowgate_core::execution::{ExecutionContext, ExecutionOutput, ExecutorRegistry, TaskNodeExecutor};
use flowgate_core::models::TaskType;

/// Task types the harness registers executors for
pub const TARGET_TASK_TYPES: [TaskType; 7] = [
    TaskType::Async,
    TaskType::MultipleAsync,
    TaskType::Import,
    TaskType::Export,
    TaskType::ApplyDatabasePermission,
    TaskType::ApplyTablePermission,
    TaskType::GenerateRollback,
];

/// Succeeds at once, logging one line and echoing what it ran
#[derive(Debug, Default, Clone)]
pub struct EchoExecutor {
    runs: Arc<AtomicUsize>,
}

impl EchoExecutor {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskNodeExecutor for EchoExecutor {
    async fn execute(&self, ctx: ExecutionContext) -> FlowResult<ExecutionOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ctx.log
            .info(&format!("echo task {} sequence {}", ctx.task.id, ctx.sequence))
            .await?;
        Ok(ExecutionOutput::new().with_result(json!({
            "task_id": ctx.task.id,
            "task_type": ctx.node.task_type.as_str(),
            "sequence": ctx.sequence,
        })))
    }
}

#[derive(Debug, Clone)]
pub struct FailingExecutor {
    pub message: &'static str,
}

#[async_trait]
impl TaskNodeExecutor for FailingExecutor {
    async fn execute(&self, ctx: ExecutionContext) -> FlowResult<ExecutionOutput> {
        ctx.log.error(self.message).await?;
        Err(FlowError::Internal(self.message.to_string()))
    }
}

/// Runs until released; cancellation is left to the job runner
#[derive(Debug, Default, Clone)]
pub struct BlockingExecutor {
    release: Arc<Notify>,
    started: Arc<AtomicUsize>,
}

impl BlockingExecutor {
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskNodeExecutor for BlockingExecutor {
    async fn execute(&self, ctx: ExecutionContext) -> FlowResult<ExecutionOutput> {
        self.started.fetch_add(1, Ordering::SeqCst);
        ctx.log.info("waiting to be released").await?;
        self.release.notified().await;
        Ok(ExecutionOutput::new().with_result(json!({ "released": true })))
    }
}

/// Every target task type answered by the same executor
pub fn registry_with<E>(executor: E) -> ExecutorRegistry
where
    E: TaskNodeExecutor + Clone + 'static,
{
    let mut registry = ExecutorRegistry::new();
    for task_type in TARGET_TASK_TYPES {
        let executor = executor.clone();
        registry.register(task_type, move || {
            Box::new(executor.clone()) as Box<dyn TaskNodeExecutor>
        });
    }
    registry
}
