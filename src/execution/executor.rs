//! # Task Node Executors
//!
//! What actually runs for a task node is pluggable per task type. The
//! registry stores constructor closures, so every job gets a freshly built
//! executor with its dependencies passed in explicitly.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::task_log::TaskLogWriter;
use crate::engine::Variables;
use crate::error::{FlowError, FlowResult};
use crate::models::{TaskEntity, TaskNode, TaskType};

/// Everything an executor may look at
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub flow_instance_id: i64,
    pub node: TaskNode,
    pub task: TaskEntity,
    /// Process variables at the time the task started
    pub variables: Variables,
    /// Number of nodes of the same task type this flow already completed;
    /// selects the database group of a multi-database change
    pub sequence: usize,
    pub log: TaskLogWriter,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    /// Persisted as the task's result
    pub result: Option<Value>,
    /// Merged into the process variables before the flow moves on
    pub variables: Variables,
}

impl ExecutionOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.set(name, value);
        self
    }
}

#[async_trait]
pub trait TaskNodeExecutor: Send + Sync {
    async fn execute(&self, ctx: ExecutionContext) -> FlowResult<ExecutionOutput>;
}

pub type ExecutorFactory = Arc<dyn Fn() -> Box<dyn TaskNodeExecutor> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    factories: HashMap<TaskType, ExecutorFactory>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut task_types: Vec<&str> = self.factories.keys().map(TaskType::as_str).collect();
        task_types.sort_unstable();
        f.debug_struct("ExecutorRegistry")
            .field("task_types", &task_types)
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, task_type: TaskType, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn TaskNodeExecutor> + Send + Sync + 'static,
    {
        self.factories.insert(task_type, Arc::new(factory));
        self
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.factories.contains_key(&task_type)
    }

    pub fn create(&self, task_type: TaskType) -> FlowResult<Box<dyn TaskNodeExecutor>> {
        self.factories
            .get(&task_type)
            .map(|factory| factory())
            .ok_or_else(|| {
                FlowError::Unsupported(format!("No executor registered for task type {task_type}"))
            })
    }
}
