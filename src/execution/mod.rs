//! # Task Execution
//!
//! Everything that runs task nodes on this node: the pluggable executors, the
//! class-isolated worker pools fed by the async execution router, the job
//! runner with its heartbeat and expiration handling, and node-local task
//! logs.
//!
//! ## Architecture
//!
//! - `executor`: `TaskNodeExecutor` and the constructor-based `ExecutorRegistry`
//! - `pre_check`: the built-in risk-level pre-check
//! - `job`: `TaskJob` and the per-flow cancellation signals
//! - `worker_pool`: bounded pools with a block or reject policy
//! - `router`: `AsyncExecutionRouter`, choosing a pool per task class
//! - `runner`: `TaskJobRunner`, claim / execute / finalize
//! - `task_log`: node-local log files and tail reading

pub mod executor;
pub mod job;
pub mod pre_check;
pub mod router;
pub mod runner;
pub mod task_log;
pub mod worker_pool;

pub use executor::{ExecutionContext, ExecutionOutput, ExecutorRegistry, TaskNodeExecutor};
pub use job::{ActiveTasks, TaskJob};
pub use pre_check::{FixedRiskLevelResolver, PreCheckExecutor, RiskLevelResolver};
pub use router::{AsyncExecutionRouter, JobHandler};
pub use runner::TaskJobRunner;
pub use task_log::{read_log_tail, task_log_path, LogLevel, TaskLogWriter};
pub use worker_pool::{PoolError, WorkerPool};
