//! # Flow Creation Requests
//!
//! Typed creation request and the task-type specific parameter payloads the
//! orchestrator needs to inspect (validation caps, rollback plans, ordered
//! multi-database changes, candidate resources).

use serde::{Deserialize, Serialize};

use super::node::ExecutionStrategy;
use super::task::TaskType;
use crate::sql::SqlDialect;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFlowInstanceReq {
    pub task_type: TaskType,
    pub parameters: TaskParameters,
    pub connection_id: Option<i64>,
    pub database_id: Option<i64>,
    pub database_name: Option<String>,
    pub project_id: Option<i64>,
    pub parent_flow_instance_id: Option<i64>,
    pub description: Option<String>,
    #[serde(default)]
    pub execution_strategy: ExecutionStrategy,
    #[serde(default)]
    pub dialect: SqlDialect,
}

impl CreateFlowInstanceReq {
    pub fn new(task_type: TaskType, parameters: TaskParameters) -> Self {
        Self {
            task_type,
            parameters,
            connection_id: None,
            database_id: None,
            database_name: None,
            project_id: None,
            parent_flow_instance_id: None,
            description: None,
            execution_strategy: ExecutionStrategy::Auto,
            dialect: SqlDialect::default(),
        }
    }

    /// Flow instance display name
    pub fn flow_instance_name(&self) -> String {
        match &self.parameters {
            TaskParameters::StructureComparison(p) => format!(
                "structure_comparison_{}_{}",
                p.source_database_id, p.target_database_id
            ),
            TaskParameters::MultipleDatabaseChange(p) => {
                format!("multiple_database_{:?}", p.ordered_database_ids)
            }
            _ => {
                let schema = self.database_name.as_deref().unwrap_or("no_schema");
                let connection = self
                    .connection_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "no_connection".to_string());
                format!("{schema}_{connection}")
            }
        }
    }

    /// Whether a rollback-plan task precedes the target task
    pub fn generates_rollback_plan(&self) -> bool {
        self.task_type == TaskType::Async
            && matches!(&self.parameters, TaskParameters::DatabaseChange(p) if p.generate_rollback_plan)
    }

    /// Database ids the change touches, used to scope database resource roles
    pub fn touched_database_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.database_id.into_iter().collect();
        match &self.parameters {
            TaskParameters::MultipleDatabaseChange(p) => {
                ids.extend(p.ordered_database_ids.iter().flatten().copied())
            }
            TaskParameters::ApplyDatabasePermission(p) => {
                ids.extend(p.databases.iter().map(|d| d.id))
            }
            TaskParameters::ApplyTablePermission(p) => {
                ids.extend(p.tables.iter().map(|t| t.database_id))
            }
            _ => {}
        }
        let mut seen = std::collections::HashSet::new();
        ids.retain(|id| seen.insert(*id));
        ids
    }
}

/// Task-type specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskParameters {
    DatabaseChange(DatabaseChangeParameters),
    MultipleDatabaseChange(MultipleDatabaseChangeParameters),
    Export(ExportParameters),
    Import(ImportParameters),
    ApplyDatabasePermission(ApplyDatabaseParameters),
    ApplyTablePermission(ApplyTableParameters),
    StructureComparison(StructureComparisonParameters),
    /// Opaque payload for task types the orchestrator never inspects
    Generic(GenericParameters),
}

impl TaskParameters {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatabaseChangeParameters {
    pub sql_content: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default)]
    pub generate_rollback_plan: bool,
    #[serde(default)]
    pub timeout_millis: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultipleDatabaseChangeParameters {
    /// Execution batches; databases in one inner list run in the same step
    pub ordered_database_ids: Vec<Vec<i64>>,
    pub sql_content: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default)]
    pub manual_timeout_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbObject {
    pub name: String,
    pub object_type: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExportParameters {
    pub export_db_objects: Vec<DbObject>,
    #[serde(default)]
    pub export_all_objects: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImportParameters {
    pub import_file_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyDatabase {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplyDatabaseParameters {
    pub databases: Vec<ApplyDatabase>,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyTable {
    pub database_id: i64,
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplyTableParameters {
    pub tables: Vec<ApplyTable>,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureComparisonParameters {
    pub source_database_id: i64,
    pub target_database_id: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenericParameters {
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_delimiter() -> String {
    ";".to_string()
}
