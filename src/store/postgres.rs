//! PostgreSQL store.
//!
//! Runtime-checked `sqlx` queries against the schema in
//! `migrations/0001_flowgate_schema.sql`. Enum columns hold the serde names of
//! their Rust counterparts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::info;

use super::{FlowStore, FlowTransaction};
use crate::config::DatabaseConfig;
use crate::engine::{ProcessDefinition, ProcessRun};
use crate::error::{FlowError, FlowResult};
use crate::models::{
    ApprovalCandidate, ApprovalNode, ElementBinding, ExecutorInfo, FlowInstance,
    FlowInstanceFilter, GatewayNode, NewFlowInstance, NewTask, NodeInstance, NodeKind, Sequence,
    TaskEntity, TaskNode, TaskStatus,
};
use crate::state_machine::{FlowNodeStatus, FlowStatus};

const SCHEMA: &str = include_str!("../../migrations/0001_flowgate_schema.sql");

const FLOW_COLUMNS: &str = "id, name, task_type, status, creator_id, organization_id, project_id, \
     parent_instance_id, description, process_instance_id, process_definition_id, created_at, updated_at";
const TASK_NODE_COLUMNS: &str =
    "id, flow_instance_id, status, task_type, target_task_id, strategy, created_at, updated_at";
const APPROVAL_NODE_COLUMNS: &str = "id, flow_instance_id, status, auto_approve, expire_interval_secs, \
     external_approval_id, external_flow_instance_id, operator_id, comment, entered_at, created_at, updated_at";
const TASK_COLUMNS: &str = "id, task_type, status, creator_id, organization_id, project_id, connection_id, \
     database_id, database_name, parameters, result, executor_host, executor_port, submitter_host, \
     submitter_port, execution_expiration_interval_secs, last_heartbeat_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgFlowStore {
    pool: PgPool,
}

impl PgFlowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> FlowResult<Self> {
        let url = config
            .url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .ok_or_else(|| FlowError::Configuration("database.url is not set".into()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the schema when missing
    pub async fn migrate(&self) -> FlowResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("💾 Flowgate schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl FlowStore for PgFlowStore {
    async fn begin(&self) -> FlowResult<Box<dyn FlowTransaction>> {
        Ok(Box::new(PgTransaction {
            tx: self.pool.begin().await?,
        }))
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

fn to_text<T: Serialize>(value: &T) -> FlowResult<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(FlowError::Internal(format!("{other} is not a text enum"))),
    }
}

fn from_text<T: DeserializeOwned>(value: String) -> FlowResult<T> {
    Ok(serde_json::from_value(serde_json::Value::String(value))?)
}

fn executor_from(host: Option<String>, port: Option<i32>) -> Option<ExecutorInfo> {
    match (host, port) {
        (Some(host), Some(port)) => u16::try_from(port).ok().map(|port| ExecutorInfo::new(host, port)),
        _ => None,
    }
}

fn flow_from_row(row: &PgRow) -> FlowResult<FlowInstance> {
    Ok(FlowInstance {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        task_type: from_text(row.try_get("task_type")?)?,
        status: from_text(row.try_get("status")?)?,
        creator_id: row.try_get("creator_id")?,
        organization_id: row.try_get("organization_id")?,
        project_id: row.try_get("project_id")?,
        parent_instance_id: row.try_get("parent_instance_id")?,
        description: row.try_get("description")?,
        process_instance_id: row.try_get("process_instance_id")?,
        process_definition_id: row.try_get("process_definition_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn task_node_from_row(row: &PgRow) -> FlowResult<TaskNode> {
    Ok(TaskNode {
        id: row.try_get("id")?,
        flow_instance_id: row.try_get("flow_instance_id")?,
        status: from_text(row.try_get("status")?)?,
        task_type: from_text(row.try_get("task_type")?)?,
        target_task_id: row.try_get("target_task_id")?,
        strategy: from_text(row.try_get("strategy")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn approval_node_from_row(row: &PgRow) -> FlowResult<ApprovalNode> {
    Ok(ApprovalNode {
        id: row.try_get("id")?,
        flow_instance_id: row.try_get("flow_instance_id")?,
        status: from_text(row.try_get("status")?)?,
        auto_approve: row.try_get("auto_approve")?,
        expire_interval_secs: row.try_get("expire_interval_secs")?,
        external_approval_id: row.try_get("external_approval_id")?,
        external_flow_instance_id: row.try_get("external_flow_instance_id")?,
        operator_id: row.try_get("operator_id")?,
        comment: row.try_get("comment")?,
        entered_at: row.try_get("entered_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn gateway_node_from_row(row: &PgRow) -> FlowResult<GatewayNode> {
    Ok(GatewayNode {
        id: row.try_get("id")?,
        flow_instance_id: row.try_get("flow_instance_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn task_from_row(row: &PgRow) -> FlowResult<TaskEntity> {
    Ok(TaskEntity {
        id: row.try_get("id")?,
        task_type: from_text(row.try_get("task_type")?)?,
        status: from_text(row.try_get("status")?)?,
        creator_id: row.try_get("creator_id")?,
        organization_id: row.try_get("organization_id")?,
        project_id: row.try_get("project_id")?,
        connection_id: row.try_get("connection_id")?,
        database_id: row.try_get("database_id")?,
        database_name: row.try_get("database_name")?,
        parameters: row.try_get("parameters")?,
        result: row.try_get("result")?,
        executor: executor_from(row.try_get("executor_host")?, row.try_get("executor_port")?),
        submitter: executor_from(row.try_get("submitter_host")?, row.try_get("submitter_port")?),
        execution_expiration_interval_secs: row.try_get("execution_expiration_interval_secs")?,
        last_heartbeat_at: row.try_get("last_heartbeat_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn candidate_from_row(row: &PgRow) -> FlowResult<ApprovalCandidate> {
    Ok(ApprovalCandidate {
        approval_instance_id: row.try_get("approval_instance_id")?,
        flow_instance_id: row.try_get("flow_instance_id")?,
        role_id: row.try_get("role_id")?,
        resource_role_identifier: row.try_get("resource_role_identifier")?,
    })
}

fn binding_from_row(row: &PgRow) -> FlowResult<ElementBinding> {
    Ok(ElementBinding {
        id: row.try_get("id")?,
        flow_instance_id: row.try_get("flow_instance_id")?,
        node_id: row.try_get("node_id")?,
        node_kind: from_text(row.try_get("node_kind")?)?,
        element_kind: from_text(row.try_get("element_kind")?)?,
        activity_id: row.try_get("activity_id")?,
        name: row.try_get("name")?,
    })
}

impl PgTransaction {
    async fn nodes_where(&mut self, flow_ids: &[i64]) -> FlowResult<Vec<NodeInstance>> {
        let ids = flow_ids.to_vec();
        let mut nodes = Vec::new();

        let rows = sqlx::query(&format!(
            "SELECT {TASK_NODE_COLUMNS} FROM flowgate_task_node WHERE flow_instance_id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await?;
        for row in &rows {
            nodes.push(NodeInstance::Task(task_node_from_row(row)?));
        }

        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_NODE_COLUMNS} FROM flowgate_approval_node WHERE flow_instance_id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await?;
        for row in &rows {
            nodes.push(NodeInstance::Approval(approval_node_from_row(row)?));
        }

        let rows = sqlx::query(
            "SELECT id, flow_instance_id, created_at FROM flowgate_gateway_node WHERE flow_instance_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await?;
        for row in &rows {
            nodes.push(NodeInstance::Gateway(gateway_node_from_row(row)?));
        }

        nodes.sort_by_key(|n| n.id());
        Ok(nodes)
    }
}

#[async_trait]
impl FlowTransaction for PgTransaction {
    async fn insert_flow_instance(&mut self, new: NewFlowInstance) -> FlowResult<FlowInstance> {
        let row = sqlx::query(&format!(
            "INSERT INTO flowgate_flow_instance \
             (name, task_type, status, creator_id, organization_id, project_id, parent_instance_id, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {FLOW_COLUMNS}"
        ))
        .bind(&new.name)
        .bind(to_text(&new.task_type)?)
        .bind(to_text(&FlowStatus::Created)?)
        .bind(new.creator_id)
        .bind(new.organization_id)
        .bind(new.project_id)
        .bind(new.parent_instance_id)
        .bind(&new.description)
        .fetch_one(&mut *self.tx)
        .await?;
        flow_from_row(&row)
    }

    async fn find_flow_instance(&mut self, id: i64) -> FlowResult<Option<FlowInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM flowgate_flow_instance WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(flow_from_row).transpose()
    }

    async fn list_flow_instances(
        &mut self,
        filter: &FlowInstanceFilter,
    ) -> FlowResult<Vec<FlowInstance>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {FLOW_COLUMNS} FROM flowgate_flow_instance WHERE 1 = 1"
        ));
        if let Some(org) = filter.organization_id {
            query.push(" AND organization_id = ").push_bind(org);
        }
        if let Some(ids) = &filter.ids {
            query.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
        }
        if let Some(creator) = filter.creator_id {
            query.push(" AND creator_id = ").push_bind(creator);
        }
        if !filter.statuses.is_empty() {
            let statuses = filter
                .statuses
                .iter()
                .map(to_text)
                .collect::<FlowResult<Vec<String>>>()?;
            query.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        if let Some(task_type) = &filter.task_type {
            query.push(" AND task_type = ").push_bind(to_text(task_type)?);
        }
        if let Some(parent) = filter.parent_instance_id {
            query.push(" AND parent_instance_id = ").push_bind(parent);
        }
        if !filter.project_ids.is_empty() {
            query
                .push(" AND project_id = ANY(")
                .push_bind(filter.project_ids.clone())
                .push(")");
        }
        if let Some(after) = filter.created_after {
            query.push(" AND created_at >= ").push_bind(after);
        }
        if let Some(before) = filter.created_before {
            query.push(" AND created_at <= ").push_bind(before);
        }
        query.push(" ORDER BY id DESC");

        let rows = query.build().fetch_all(&mut *self.tx).await?;
        rows.iter().map(flow_from_row).collect()
    }

    async fn update_flow_status(&mut self, id: i64, status: FlowStatus) -> FlowResult<u64> {
        self.update_flow_statuses(&[id], status).await
    }

    async fn update_flow_statuses(&mut self, ids: &[i64], status: FlowStatus) -> FlowResult<u64> {
        let result = sqlx::query(
            "UPDATE flowgate_flow_instance SET status = $1, updated_at = now() WHERE id = ANY($2)",
        )
        .bind(to_text(&status)?)
        .bind(ids.to_vec())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_unfinished_flow_status(
        &mut self,
        id: i64,
        status: FlowStatus,
    ) -> FlowResult<u64> {
        let terminal: Vec<String> = FlowStatus::all()
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.as_str().to_string())
            .collect();
        let result = sqlx::query(
            "UPDATE flowgate_flow_instance SET status = $1, updated_at = now() \
             WHERE id = $2 AND status <> ALL($3)",
        )
        .bind(to_text(&status)?)
        .bind(id)
        .bind(terminal)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_process_instance_id(
        &mut self,
        flow_instance_id: i64,
        process_instance_id: &str,
    ) -> FlowResult<u64> {
        let result = sqlx::query(
            "UPDATE flowgate_flow_instance SET process_instance_id = $1, updated_at = now() WHERE id = $2",
        )
        .bind(process_instance_id)
        .bind(flow_instance_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_process_definition_id(
        &mut self,
        flow_instance_id: i64,
        process_definition_id: &str,
    ) -> FlowResult<u64> {
        let result = sqlx::query(
            "UPDATE flowgate_flow_instance SET process_definition_id = $1, updated_at = now() WHERE id = $2",
        )
        .bind(process_definition_id)
        .bind(flow_instance_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_flows_by_process_instance_ids(
        &mut self,
        process_instance_ids: &[String],
    ) -> FlowResult<Vec<FlowInstance>> {
        let rows = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM flowgate_flow_instance WHERE process_instance_id = ANY($1)"
        ))
        .bind(process_instance_ids.to_vec())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(flow_from_row).collect()
    }

    async fn insert_node(&mut self, mut node: NodeInstance) -> FlowResult<NodeInstance> {
        let id: i64 = match &node {
            NodeInstance::Task(n) => sqlx::query(
                "INSERT INTO flowgate_task_node \
                 (flow_instance_id, status, task_type, target_task_id, strategy, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
            )
            .bind(n.flow_instance_id)
            .bind(to_text(&n.status)?)
            .bind(to_text(&n.task_type)?)
            .bind(n.target_task_id)
            .bind(to_text(&n.strategy)?)
            .bind(n.created_at)
            .bind(n.updated_at)
            .fetch_one(&mut *self.tx)
            .await?
            .try_get("id")?,
            NodeInstance::Approval(n) => sqlx::query(
                "INSERT INTO flowgate_approval_node \
                 (flow_instance_id, status, auto_approve, expire_interval_secs, external_approval_id, \
                  external_flow_instance_id, operator_id, comment, entered_at, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id",
            )
            .bind(n.flow_instance_id)
            .bind(to_text(&n.status)?)
            .bind(n.auto_approve)
            .bind(n.expire_interval_secs)
            .bind(n.external_approval_id)
            .bind(&n.external_flow_instance_id)
            .bind(n.operator_id)
            .bind(&n.comment)
            .bind(n.entered_at)
            .bind(n.created_at)
            .bind(n.updated_at)
            .fetch_one(&mut *self.tx)
            .await?
            .try_get("id")?,
            NodeInstance::Gateway(n) => sqlx::query(
                "INSERT INTO flowgate_gateway_node (flow_instance_id, created_at) VALUES ($1, $2) RETURNING id",
            )
            .bind(n.flow_instance_id)
            .bind(n.created_at)
            .fetch_one(&mut *self.tx)
            .await?
            .try_get("id")?,
        };
        node.set_id(id);
        Ok(node)
    }

    async fn update_node(&mut self, node: &NodeInstance) -> FlowResult<u64> {
        let result = match node {
            NodeInstance::Task(n) => {
                sqlx::query(
                    "UPDATE flowgate_task_node SET status = $1, target_task_id = $2, strategy = $3, \
                     updated_at = $4 WHERE id = $5",
                )
                .bind(to_text(&n.status)?)
                .bind(n.target_task_id)
                .bind(to_text(&n.strategy)?)
                .bind(n.updated_at)
                .bind(n.id)
                .execute(&mut *self.tx)
                .await?
            }
            NodeInstance::Approval(n) => {
                sqlx::query(
                    "UPDATE flowgate_approval_node SET status = $1, external_flow_instance_id = $2, \
                     operator_id = $3, comment = $4, entered_at = $5, updated_at = $6 WHERE id = $7",
                )
                .bind(to_text(&n.status)?)
                .bind(&n.external_flow_instance_id)
                .bind(n.operator_id)
                .bind(&n.comment)
                .bind(n.entered_at)
                .bind(n.updated_at)
                .bind(n.id)
                .execute(&mut *self.tx)
                .await?
            }
            NodeInstance::Gateway(_) => return Ok(0),
        };
        Ok(result.rows_affected())
    }

    async fn find_node(&mut self, kind: NodeKind, id: i64) -> FlowResult<Option<NodeInstance>> {
        match kind {
            NodeKind::ServiceTask => {
                let row = sqlx::query(&format!(
                    "SELECT {TASK_NODE_COLUMNS} FROM flowgate_task_node WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
                Ok(row.as_ref().map(task_node_from_row).transpose()?.map(NodeInstance::Task))
            }
            NodeKind::ApprovalTask => {
                let row = sqlx::query(&format!(
                    "SELECT {APPROVAL_NODE_COLUMNS} FROM flowgate_approval_node WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
                Ok(row
                    .as_ref()
                    .map(approval_node_from_row)
                    .transpose()?
                    .map(NodeInstance::Approval))
            }
            NodeKind::Gateway => {
                let row = sqlx::query(
                    "SELECT id, flow_instance_id, created_at FROM flowgate_gateway_node WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
                Ok(row
                    .as_ref()
                    .map(gateway_node_from_row)
                    .transpose()?
                    .map(NodeInstance::Gateway))
            }
        }
    }

    async fn list_nodes(&mut self, flow_instance_id: i64) -> FlowResult<Vec<NodeInstance>> {
        self.nodes_where(&[flow_instance_id]).await
    }

    async fn list_nodes_by_flows(
        &mut self,
        flow_instance_ids: &[i64],
    ) -> FlowResult<Vec<NodeInstance>> {
        self.nodes_where(flow_instance_ids).await
    }

    async fn update_node_statuses(
        &mut self,
        kind: NodeKind,
        ids: &[i64],
        status: FlowNodeStatus,
    ) -> FlowResult<u64> {
        let table = match kind {
            NodeKind::ServiceTask => "flowgate_task_node",
            NodeKind::ApprovalTask => "flowgate_approval_node",
            NodeKind::Gateway => return Ok(0),
        };
        let result = sqlx::query(&format!(
            "UPDATE {table} SET status = $1, updated_at = now() WHERE id = ANY($2)"
        ))
        .bind(to_text(&status)?)
        .bind(ids.to_vec())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_task_nodes_by_status(
        &mut self,
        status: FlowNodeStatus,
    ) -> FlowResult<Vec<TaskNode>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_NODE_COLUMNS} FROM flowgate_task_node WHERE status = $1 ORDER BY id"
        ))
        .bind(to_text(&status)?)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(task_node_from_row).collect()
    }

    async fn list_approval_nodes_by_status(
        &mut self,
        statuses: &[FlowNodeStatus],
    ) -> FlowResult<Vec<ApprovalNode>> {
        let statuses = statuses
            .iter()
            .map(to_text)
            .collect::<FlowResult<Vec<String>>>()?;
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_NODE_COLUMNS} FROM flowgate_approval_node WHERE status = ANY($1) ORDER BY id"
        ))
        .bind(statuses)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(approval_node_from_row).collect()
    }

    async fn find_approval_nodes(&mut self, ids: &[i64]) -> FlowResult<Vec<ApprovalNode>> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_NODE_COLUMNS} FROM flowgate_approval_node WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids.to_vec())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(approval_node_from_row).collect()
    }

    async fn insert_sequence(&mut self, mut sequence: Sequence) -> FlowResult<Sequence> {
        sequence.id = sqlx::query(
            "INSERT INTO flowgate_sequence (flow_instance_id, source_node_id, target_node_id, condition) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(sequence.flow_instance_id)
        .bind(sequence.source_node_id)
        .bind(sequence.target_node_id)
        .bind(&sequence.condition)
        .fetch_one(&mut *self.tx)
        .await?
        .try_get("id")?;
        Ok(sequence)
    }

    async fn list_sequences(&mut self, flow_instance_id: i64) -> FlowResult<Vec<Sequence>> {
        let rows = sqlx::query(
            "SELECT id, flow_instance_id, source_node_id, target_node_id, condition \
             FROM flowgate_sequence WHERE flow_instance_id = $1 ORDER BY id",
        )
        .bind(flow_instance_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Sequence {
                    id: row.try_get("id")?,
                    flow_instance_id: row.try_get("flow_instance_id")?,
                    source_node_id: row.try_get("source_node_id")?,
                    target_node_id: row.try_get("target_node_id")?,
                    condition: row.try_get("condition")?,
                })
            })
            .collect()
    }

    async fn insert_binding(&mut self, mut binding: ElementBinding) -> FlowResult<ElementBinding> {
        binding.id = sqlx::query(
            "INSERT INTO flowgate_element_binding \
             (flow_instance_id, node_id, node_kind, element_kind, activity_id, name) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(binding.flow_instance_id)
        .bind(binding.node_id)
        .bind(to_text(&binding.node_kind)?)
        .bind(to_text(&binding.element_kind)?)
        .bind(&binding.activity_id)
        .bind(&binding.name)
        .fetch_one(&mut *self.tx)
        .await?
        .try_get("id")?;
        Ok(binding)
    }

    async fn list_bindings(&mut self, flow_instance_id: i64) -> FlowResult<Vec<ElementBinding>> {
        let rows = sqlx::query(
            "SELECT id, flow_instance_id, node_id, node_kind, element_kind, activity_id, name \
             FROM flowgate_element_binding WHERE flow_instance_id = $1 ORDER BY id",
        )
        .bind(flow_instance_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(binding_from_row).collect()
    }

    async fn insert_candidates(&mut self, candidates: Vec<ApprovalCandidate>) -> FlowResult<()> {
        for candidate in candidates {
            sqlx::query(
                "INSERT INTO flowgate_approval_candidate \
                 (approval_instance_id, flow_instance_id, role_id, resource_role_identifier) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(candidate.approval_instance_id)
            .bind(candidate.flow_instance_id)
            .bind(candidate.role_id)
            .bind(&candidate.resource_role_identifier)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn list_candidates_by_approval_ids(
        &mut self,
        approval_instance_ids: &[i64],
    ) -> FlowResult<Vec<ApprovalCandidate>> {
        let rows = sqlx::query(
            "SELECT approval_instance_id, flow_instance_id, role_id, resource_role_identifier \
             FROM flowgate_approval_candidate WHERE approval_instance_id = ANY($1)",
        )
        .bind(approval_instance_ids.to_vec())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(candidate_from_row).collect()
    }

    async fn approval_ids_by_role_ids(&mut self, role_ids: &[i64]) -> FlowResult<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT DISTINCT approval_instance_id FROM flowgate_approval_candidate \
             WHERE role_id = ANY($1) ORDER BY approval_instance_id",
        )
        .bind(role_ids.to_vec())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("approval_instance_id")?))
            .collect()
    }

    async fn approval_ids_by_resource_role_identifiers(
        &mut self,
        identifiers: &[String],
    ) -> FlowResult<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT DISTINCT approval_instance_id FROM flowgate_approval_candidate \
             WHERE resource_role_identifier = ANY($1) ORDER BY approval_instance_id",
        )
        .bind(identifiers.to_vec())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("approval_instance_id")?))
            .collect()
    }

    async fn insert_task(&mut self, new: NewTask) -> FlowResult<TaskEntity> {
        let row = sqlx::query(&format!(
            "INSERT INTO flowgate_task \
             (task_type, status, creator_id, organization_id, project_id, connection_id, database_id, \
              database_name, parameters, submitter_host, submitter_port, execution_expiration_interval_secs) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {TASK_COLUMNS}"
        ))
        .bind(to_text(&new.task_type)?)
        .bind(to_text(&TaskStatus::Prepared)?)
        .bind(new.creator_id)
        .bind(new.organization_id)
        .bind(new.project_id)
        .bind(new.connection_id)
        .bind(new.database_id)
        .bind(&new.database_name)
        .bind(&new.parameters)
        .bind(new.submitter.as_ref().map(|s| s.host.clone()))
        .bind(new.submitter.as_ref().map(|s| i32::from(s.port)))
        .bind(new.execution_expiration_interval_secs)
        .fetch_one(&mut *self.tx)
        .await?;
        task_from_row(&row)
    }

    async fn find_task(&mut self, id: i64) -> FlowResult<Option<TaskEntity>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM flowgate_task WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn find_tasks(&mut self, ids: &[i64]) -> FlowResult<Vec<TaskEntity>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM flowgate_task WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids.to_vec())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn update_task(&mut self, task: &TaskEntity) -> FlowResult<u64> {
        let result = sqlx::query(
            "UPDATE flowgate_task SET status = $1, result = $2, executor_host = $3, executor_port = $4, \
             last_heartbeat_at = $5, parameters = $6, updated_at = now() WHERE id = $7",
        )
        .bind(to_text(&task.status)?)
        .bind(&task.result)
        .bind(task.executor.as_ref().map(|e| e.host.clone()))
        .bind(task.executor.as_ref().map(|e| i32::from(e.port)))
        .bind(task.last_heartbeat_at)
        .bind(&task.parameters)
        .bind(task.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_task_statuses(&mut self, ids: &[i64], status: TaskStatus) -> FlowResult<u64> {
        let result =
            sqlx::query("UPDATE flowgate_task SET status = $1, updated_at = now() WHERE id = ANY($2)")
                .bind(to_text(&status)?)
                .bind(ids.to_vec())
                .execute(&mut *self.tx)
                .await?;
        Ok(result.rows_affected())
    }

    async fn touch_heartbeat(&mut self, task_id: i64, at: DateTime<Utc>) -> FlowResult<u64> {
        let result = sqlx::query(
            "UPDATE flowgate_task SET last_heartbeat_at = $1, updated_at = $1 \
             WHERE id = $2 AND status = $3",
        )
        .bind(at)
        .bind(task_id)
        .bind(TaskStatus::Running.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_stale_tasks(
        &mut self,
        ids: &[i64],
        before: DateTime<Utc>,
    ) -> FlowResult<Vec<TaskEntity>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM flowgate_task \
             WHERE id = ANY($1) AND COALESCE(last_heartbeat_at, updated_at) < $2 ORDER BY id"
        ))
        .bind(ids.to_vec())
        .bind(before)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn save_process_definition(&mut self, definition: &ProcessDefinition) -> FlowResult<()> {
        sqlx::query(
            "INSERT INTO flowgate_process_definition (id, body) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body",
        )
        .bind(&definition.id)
        .bind(Json(definition))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_process_definition(&mut self, id: &str) -> FlowResult<Option<ProcessDefinition>> {
        let row = sqlx::query("SELECT body FROM flowgate_process_definition WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row
            .map(|row| row.try_get::<Json<ProcessDefinition>, _>("body"))
            .transpose()?
            .map(|Json(definition)| definition))
    }

    async fn save_process_run(&mut self, run: &ProcessRun) -> FlowResult<()> {
        sqlx::query(
            "INSERT INTO flowgate_process_run (id, definition_id, ended, body) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET ended = EXCLUDED.ended, body = EXCLUDED.body",
        )
        .bind(&run.id)
        .bind(&run.definition_id)
        .bind(run.ended)
        .bind(Json(run))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_process_run(&mut self, id: &str) -> FlowResult<Option<ProcessRun>> {
        let row = sqlx::query("SELECT body FROM flowgate_process_run WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row
            .map(|row| row.try_get::<Json<ProcessRun>, _>("body"))
            .transpose()?
            .map(|Json(run)| run))
    }

    async fn commit(self: Box<Self>) -> FlowResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> FlowResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
