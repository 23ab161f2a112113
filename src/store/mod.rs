//! # Flow Store
//!
//! Persistence seam of the orchestrator. A `FlowStore` hands out
//! `FlowTransaction` units of work; every service operation, background pass
//! and engine step reads and writes through exactly one of them. Dropping a
//! transaction without calling `commit` discards its writes.
//!
//! Process-engine state (deployed definitions and run state) lives behind the
//! same transaction, so the engine's view and the orchestrator's rows always
//! commit or roll back together.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::engine::{ProcessDefinition, ProcessRun};
use crate::error::FlowResult;
use crate::models::{
    ApprovalCandidate, ApprovalNode, ElementBinding, FlowInstance, FlowInstanceFilter,
    NewFlowInstance, NewTask, NodeInstance, NodeKind, Sequence, TaskEntity, TaskNode, TaskStatus,
};
use crate::state_machine::{FlowNodeStatus, FlowStatus};

pub use memory::InMemoryFlowStore;
#[cfg(feature = "postgres")]
pub use postgres::PgFlowStore;

#[async_trait]
pub trait FlowStore: Send + Sync + std::fmt::Debug {
    async fn begin(&self) -> FlowResult<Box<dyn FlowTransaction>>;
}

/// One unit of work against the persisted state
///
/// Batched variants (`*_statuses`, `find_tasks`, ...) accept any number of
/// ids; callers chunk them with [`chunked`] to respect the configured
/// IN-clause limit.
#[async_trait]
pub trait FlowTransaction: Send {
    // Flow instances
    async fn insert_flow_instance(&mut self, new: NewFlowInstance) -> FlowResult<FlowInstance>;
    async fn find_flow_instance(&mut self, id: i64) -> FlowResult<Option<FlowInstance>>;
    /// Matching flows, newest first
    async fn list_flow_instances(
        &mut self,
        filter: &FlowInstanceFilter,
    ) -> FlowResult<Vec<FlowInstance>>;
    async fn update_flow_status(&mut self, id: i64, status: FlowStatus) -> FlowResult<u64>;
    async fn update_flow_statuses(&mut self, ids: &[i64], status: FlowStatus) -> FlowResult<u64>;
    /// Same as `update_flow_status`, but a flow that already reached a
    /// terminal status is left alone and reported as 0 rows
    async fn update_unfinished_flow_status(
        &mut self,
        id: i64,
        status: FlowStatus,
    ) -> FlowResult<u64>;
    async fn set_process_instance_id(
        &mut self,
        flow_instance_id: i64,
        process_instance_id: &str,
    ) -> FlowResult<u64>;
    async fn set_process_definition_id(
        &mut self,
        flow_instance_id: i64,
        process_definition_id: &str,
    ) -> FlowResult<u64>;
    async fn find_flows_by_process_instance_ids(
        &mut self,
        process_instance_ids: &[String],
    ) -> FlowResult<Vec<FlowInstance>>;

    // Node instances
    /// Persist a new node; the id of the given node is ignored and assigned
    async fn insert_node(&mut self, node: NodeInstance) -> FlowResult<NodeInstance>;
    async fn update_node(&mut self, node: &NodeInstance) -> FlowResult<u64>;
    async fn find_node(&mut self, kind: NodeKind, id: i64) -> FlowResult<Option<NodeInstance>>;
    /// Nodes of one flow in creation order
    async fn list_nodes(&mut self, flow_instance_id: i64) -> FlowResult<Vec<NodeInstance>>;
    async fn list_nodes_by_flows(
        &mut self,
        flow_instance_ids: &[i64],
    ) -> FlowResult<Vec<NodeInstance>>;
    async fn update_node_statuses(
        &mut self,
        kind: NodeKind,
        ids: &[i64],
        status: FlowNodeStatus,
    ) -> FlowResult<u64>;
    async fn list_task_nodes_by_status(
        &mut self,
        status: FlowNodeStatus,
    ) -> FlowResult<Vec<TaskNode>>;
    async fn list_approval_nodes_by_status(
        &mut self,
        statuses: &[FlowNodeStatus],
    ) -> FlowResult<Vec<ApprovalNode>>;
    async fn find_approval_nodes(&mut self, ids: &[i64]) -> FlowResult<Vec<ApprovalNode>>;

    // Sequences
    async fn insert_sequence(&mut self, sequence: Sequence) -> FlowResult<Sequence>;
    async fn list_sequences(&mut self, flow_instance_id: i64) -> FlowResult<Vec<Sequence>>;

    // Element bindings
    async fn insert_binding(&mut self, binding: ElementBinding) -> FlowResult<ElementBinding>;
    async fn list_bindings(&mut self, flow_instance_id: i64) -> FlowResult<Vec<ElementBinding>>;

    // Approval candidates
    async fn insert_candidates(&mut self, candidates: Vec<ApprovalCandidate>) -> FlowResult<()>;
    async fn list_candidates_by_approval_ids(
        &mut self,
        approval_instance_ids: &[i64],
    ) -> FlowResult<Vec<ApprovalCandidate>>;
    async fn approval_ids_by_role_ids(&mut self, role_ids: &[i64]) -> FlowResult<Vec<i64>>;
    async fn approval_ids_by_resource_role_identifiers(
        &mut self,
        identifiers: &[String],
    ) -> FlowResult<Vec<i64>>;

    // Tasks
    async fn insert_task(&mut self, new: NewTask) -> FlowResult<TaskEntity>;
    async fn find_task(&mut self, id: i64) -> FlowResult<Option<TaskEntity>>;
    async fn find_tasks(&mut self, ids: &[i64]) -> FlowResult<Vec<TaskEntity>>;
    async fn update_task(&mut self, task: &TaskEntity) -> FlowResult<u64>;
    async fn update_task_statuses(&mut self, ids: &[i64], status: TaskStatus) -> FlowResult<u64>;
    /// Refresh the heartbeat of a RUNNING task; any other status is untouched
    async fn touch_heartbeat(&mut self, task_id: i64, at: DateTime<Utc>) -> FlowResult<u64>;
    /// Tasks among `ids` whose last heartbeat (or, before the first one, last
    /// update) is older than `before`
    async fn find_stale_tasks(
        &mut self,
        ids: &[i64],
        before: DateTime<Utc>,
    ) -> FlowResult<Vec<TaskEntity>>;

    // Process engine state
    async fn save_process_definition(&mut self, definition: &ProcessDefinition) -> FlowResult<()>;
    async fn find_process_definition(&mut self, id: &str) -> FlowResult<Option<ProcessDefinition>>;
    async fn save_process_run(&mut self, run: &ProcessRun) -> FlowResult<()>;
    async fn find_process_run(&mut self, id: &str) -> FlowResult<Option<ProcessRun>>;

    async fn commit(self: Box<Self>) -> FlowResult<()>;
    async fn rollback(self: Box<Self>) -> FlowResult<()>;
}

/// Split `items` into IN-clause sized batches
pub fn chunked<T>(items: &[T], size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(size.max(1))
}
