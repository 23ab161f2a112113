//! # Flowgate Configuration
//!
//! Typed configuration for one orchestration node. Every section has working
//! defaults, so an empty configuration is a valid single-node development
//! setup; files and environment variables only override what they name.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use flowgate_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let heartbeat = &manager.config().heartbeat;
//! println!("scan every {:?}", heartbeat.effective_scan_interval());
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FlowError, FlowResult};
use crate::models::task::ExecutorInfo;

pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowgateConfig {
    pub node: NodeConfig,
    pub dispatch: DispatchConfig,
    pub heartbeat: HeartbeatConfig,
    pub expiration: ExpirationConfig,
    pub executor: ExecutorConfig,
    pub flow_task: FlowTaskConfig,
    pub task_log: TaskLogConfig,
    pub database: DatabaseConfig,
}

impl FlowgateConfig {
    /// Reject configurations the node cannot run with
    pub fn validate(&self) -> FlowResult<()> {
        if self.node.host.trim().is_empty() {
            return Err(FlowError::Configuration("node.host must not be empty".into()));
        }
        if self.node.port == 0 {
            return Err(FlowError::Configuration("node.port must not be 0".into()));
        }
        if self.heartbeat.max_in_clause_size == 0 {
            return Err(FlowError::Configuration(
                "heartbeat.max_in_clause_size must be greater than 0".into(),
            ));
        }
        if self.heartbeat.timeout_secs <= self.heartbeat.interval_secs {
            return Err(FlowError::Configuration(format!(
                "heartbeat.timeout_secs ({}) must be greater than heartbeat.interval_secs ({})",
                self.heartbeat.timeout_secs, self.heartbeat.interval_secs
            )));
        }
        for (name, pool) in [
            ("mock_data", &self.executor.mock_data),
            ("loader_dumper", &self.executor.loader_dumper),
            ("default", &self.executor.default),
        ] {
            if pool.workers == 0 || pool.queue_capacity == 0 {
                return Err(FlowError::Configuration(format!(
                    "executor.{name} needs at least one worker and a non-empty queue"
                )));
            }
        }
        if self.dispatch.timeout_ms == 0 {
            return Err(FlowError::Configuration(
                "dispatch.timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Identity of this node inside the cluster
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, bound into every flow's variables
    pub site_url: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8989,
            site_url: "http://127.0.0.1:8989".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn executor_info(&self) -> ExecutorInfo {
        ExecutorInfo::new(self.host.clone(), self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Header marking a request that has already been forwarded once
    pub forwarded_by_header: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            forwarded_by_header: "x-flowgate-forwarded-by".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// How often a running task refreshes its heartbeat
    pub interval_secs: u64,
    /// A heartbeat older than this marks the task as lost
    pub timeout_secs: u64,
    pub scan_interval_secs: u64,
    /// Maximum ids per IN clause, for reads and batched writes alike
    pub max_in_clause_size: usize,
    /// Recovery attempts within one tick before waiting for the next one
    pub attempts_per_tick: u32,
    pub retry_backoff_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15,
            timeout_secs: 60,
            scan_interval_secs: 30,
            max_in_clause_size: 1000,
            attempts_per_tick: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Scan interval, never shorter than three heartbeat intervals
    pub fn effective_scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(self.interval_secs.saturating_mul(3)))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpirationConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 60,
        }
    }
}

impl ExpirationConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }
}

/// What a full worker pool does with a new job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Wait for queue capacity
    #[default]
    Block,
    /// Fail the submission immediately
    Reject,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub mock_data: PoolConfig,
    pub loader_dumper: PoolConfig,
    pub default: PoolConfig,
    pub rejection_policy: RejectionPolicy,
    pub shutdown_wait_secs: u64,
    pub submit_retry_attempts: u32,
    pub submit_retry_backoff_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mock_data: PoolConfig {
                workers: 2,
                queue_capacity: 32,
            },
            loader_dumper: PoolConfig {
                workers: 4,
                queue_capacity: 64,
            },
            default: PoolConfig {
                workers: 8,
                queue_capacity: 256,
            },
            rejection_policy: RejectionPolicy::Block,
            shutdown_wait_secs: 10,
            submit_retry_attempts: 3,
            submit_retry_backoff_ms: 1_000,
        }
    }
}

impl ExecutorConfig {
    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.shutdown_wait_secs)
    }

    pub fn submit_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.submit_retry_backoff_ms)
    }
}

/// Creation-time limits of flow tasks
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowTaskConfig {
    pub sql_content_max_length: usize,
    pub max_export_objects: usize,
    pub max_apply_databases: usize,
    pub default_execution_expiration_hours: i64,
    pub default_risk_level: i32,
}

impl Default for FlowTaskConfig {
    fn default() -> Self {
        Self {
            sql_content_max_length: 10 * 1024 * 1024,
            max_export_objects: 10_000,
            max_apply_databases: 10,
            default_execution_expiration_hours: 48,
            default_risk_level: crate::constants::DEFAULT_RISK_LEVEL,
        }
    }
}

/// Node-local task logs and task data files
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskLogConfig {
    pub log_root: PathBuf,
    pub data_root: PathBuf,
    pub max_lines: usize,
    pub max_bytes: usize,
}

impl Default for TaskLogConfig {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from("log/task"),
            data_root: PathBuf::from("data/task"),
            max_lines: 10_000,
            max_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}
