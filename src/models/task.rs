//! # Target Task Model
//!
//! The target task is the unit of real work a flow instance exists to run:
//! a database change, an export, an import and so on. Task nodes in the
//! flow graph point at it through `target_task_id`.
//!
//! ## Database Schema
//!
//! Maps to the `flowgate_task` table:
//! - `id`: Primary key (BIGSERIAL)
//! - `task_type` / `status`: upper-case enum strings
//! - `parameters` / `result`: JSONB
//! - `executor` / `submitter`: JSONB `ExecutorInfo`, the execution affinity
//! - `last_heartbeat_at`: refreshed while the executor runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Async,
    MultipleAsync,
    Import,
    Export,
    ExportResultSet,
    Mockdata,
    ShadowtableSync,
    PartitionPlan,
    OnlineSchemaChange,
    StructureComparison,
    ApplyProjectPermission,
    ApplyDatabasePermission,
    ApplyTablePermission,
    AlterSchedule,
    PreCheck,
    GenerateRollback,
    SqlCheck,
}

impl TaskType {
    /// Helper tasks that run around the target task and never are the target
    pub fn is_auxiliary(&self) -> bool {
        matches!(self, Self::PreCheck | Self::GenerateRollback | Self::SqlCheck)
    }

    /// Bulk data generation; isolated on its own worker pool
    pub fn is_bulk_data(&self) -> bool {
        matches!(self, Self::Mockdata)
    }

    /// Import/export; isolated on the loader-dumper pool
    pub fn is_loader_dumper(&self) -> bool {
        matches!(self, Self::Import | Self::Export)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Async => "ASYNC",
            Self::MultipleAsync => "MULTIPLE_ASYNC",
            Self::Import => "IMPORT",
            Self::Export => "EXPORT",
            Self::ExportResultSet => "EXPORT_RESULT_SET",
            Self::Mockdata => "MOCKDATA",
            Self::ShadowtableSync => "SHADOWTABLE_SYNC",
            Self::PartitionPlan => "PARTITION_PLAN",
            Self::OnlineSchemaChange => "ONLINE_SCHEMA_CHANGE",
            Self::StructureComparison => "STRUCTURE_COMPARISON",
            Self::ApplyProjectPermission => "APPLY_PROJECT_PERMISSION",
            Self::ApplyDatabasePermission => "APPLY_DATABASE_PERMISSION",
            Self::ApplyTablePermission => "APPLY_TABLE_PERMISSION",
            Self::AlterSchedule => "ALTER_SCHEDULE",
            Self::PreCheck => "PRE_CHECK",
            Self::GenerateRollback => "GENERATE_ROLLBACK",
            Self::SqlCheck => "SQL_CHECK",
        }
    }

    pub fn all() -> &'static [TaskType] {
        &[
            Self::Async,
            Self::MultipleAsync,
            Self::Import,
            Self::Export,
            Self::ExportResultSet,
            Self::Mockdata,
            Self::ShadowtableSync,
            Self::PartitionPlan,
            Self::OnlineSchemaChange,
            Self::StructureComparison,
            Self::ApplyProjectPermission,
            Self::ApplyDatabasePermission,
            Self::ApplyTablePermission,
            Self::AlterSchedule,
            Self::PreCheck,
            Self::GenerateRollback,
            Self::SqlCheck,
        ]
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid task type: {s}"))
    }
}

/// Lifecycle of the target task record itself (not of the flow node)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Prepared,
    Running,
    Done,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepared => "PREPARED",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PREPARED" => Ok(Self::Prepared),
            "RUNNING" => Ok(Self::Running),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// Network identity of a cluster node
///
/// Two infos denote the same node iff host and port match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub host: String,
    pub port: u16,
}

impl ExecutorInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ExecutorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Persisted target task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntity {
    pub id: i64,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub creator_id: i64,
    pub organization_id: i64,
    pub project_id: Option<i64>,
    pub connection_id: Option<i64>,
    pub database_id: Option<i64>,
    pub database_name: Option<String>,
    pub parameters: serde_json::Value,
    pub result: Option<serde_json::Value>,
    /// Node running the work; recorded once when execution begins
    pub executor: Option<ExecutorInfo>,
    /// Node the creation request landed on
    pub submitter: Option<ExecutorInfo>,
    pub execution_expiration_interval_secs: i64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New target task for insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: TaskType,
    pub creator_id: i64,
    pub organization_id: i64,
    pub project_id: Option<i64>,
    pub connection_id: Option<i64>,
    pub database_id: Option<i64>,
    pub database_name: Option<String>,
    pub parameters: serde_json::Value,
    pub submitter: Option<ExecutorInfo>,
    pub execution_expiration_interval_secs: i64,
}

impl NewTask {
    pub fn into_entity(self, id: i64, now: DateTime<Utc>) -> TaskEntity {
        TaskEntity {
            id,
            task_type: self.task_type,
            status: TaskStatus::Prepared,
            creator_id: self.creator_id,
            organization_id: self.organization_id,
            project_id: self.project_id,
            connection_id: self.connection_id,
            database_id: self.database_id,
            database_name: self.database_name,
            parameters: self.parameters,
            result: None,
            executor: None,
            submitter: self.submitter,
            execution_expiration_interval_secs: self.execution_expiration_interval_secs,
            last_heartbeat_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_classes() {
        assert!(TaskType::PreCheck.is_auxiliary());
        assert!(TaskType::GenerateRollback.is_auxiliary());
        assert!(TaskType::SqlCheck.is_auxiliary());
        assert!(!TaskType::Async.is_auxiliary());

        assert!(TaskType::Mockdata.is_bulk_data());
        assert!(TaskType::Import.is_loader_dumper());
        assert!(TaskType::Export.is_loader_dumper());
        assert!(!TaskType::ExportResultSet.is_loader_dumper());
    }

    #[test]
    fn test_task_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&TaskType::ShadowtableSync).unwrap(),
            "\"SHADOWTABLE_SYNC\""
        );
        assert_eq!(
            "APPLY_TABLE_PERMISSION".parse::<TaskType>().unwrap(),
            TaskType::ApplyTablePermission
        );
        for task_type in TaskType::all() {
            let json = serde_json::to_string(task_type).unwrap();
            assert_eq!(json.trim_matches('"'), task_type.as_str());
        }
    }

    #[test]
    fn test_executor_identity() {
        let a = ExecutorInfo::new("10.0.0.1", 8989);
        assert_eq!(a, ExecutorInfo::new("10.0.0.1", 8989));
        assert_ne!(a, ExecutorInfo::new("10.0.0.1", 8990));
        assert_eq!(a.to_string(), "10.0.0.1:8989");
    }
}
