//! In-memory store for tests and single-node development.
//!
//! A transaction holds the store lock for its whole lifetime and works on a
//! private copy of the state; `commit` swaps the copy in. Transactions are
//! therefore fully serialized: a task must never open a second transaction,
//! or wait on another task that opens one, while it still holds one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{FlowStore, FlowTransaction};
use crate::engine::{ProcessDefinition, ProcessRun};
use crate::error::FlowResult;
use crate::models::{
    ApprovalCandidate, ApprovalNode, ElementBinding, FlowInstance, FlowInstanceFilter,
    GatewayNode, NewFlowInstance, NewTask, NodeInstance, NodeKind, Sequence, TaskEntity, TaskNode,
    TaskStatus,
};
use crate::state_machine::{FlowNodeStatus, FlowStatus};

#[derive(Debug, Clone, Default)]
struct StoreState {
    next_id: i64,
    flows: BTreeMap<i64, FlowInstance>,
    task_nodes: BTreeMap<i64, TaskNode>,
    approval_nodes: BTreeMap<i64, ApprovalNode>,
    gateway_nodes: BTreeMap<i64, GatewayNode>,
    sequences: Vec<Sequence>,
    bindings: Vec<ElementBinding>,
    candidates: Vec<ApprovalCandidate>,
    tasks: BTreeMap<i64, TaskEntity>,
    definitions: HashMap<String, ProcessDefinition>,
    runs: HashMap<String, ProcessRun>,
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn nodes_of(&self, flow_ids: &HashSet<i64>) -> Vec<NodeInstance> {
        let mut nodes: Vec<NodeInstance> = self
            .task_nodes
            .values()
            .filter(|n| flow_ids.contains(&n.flow_instance_id))
            .cloned()
            .map(NodeInstance::Task)
            .chain(
                self.approval_nodes
                    .values()
                    .filter(|n| flow_ids.contains(&n.flow_instance_id))
                    .cloned()
                    .map(NodeInstance::Approval),
            )
            .chain(
                self.gateway_nodes
                    .values()
                    .filter(|n| flow_ids.contains(&n.flow_instance_id))
                    .cloned()
                    .map(NodeInstance::Gateway),
            )
            .collect();
        nodes.sort_by_key(|n| n.id());
        nodes
    }
}

fn matches_filter(filter: &FlowInstanceFilter, flow: &FlowInstance) -> bool {
    filter.organization_id.map_or(true, |o| flow.organization_id == o)
        && filter.ids.as_ref().map_or(true, |ids| ids.contains(&flow.id))
        && filter.creator_id.map_or(true, |c| flow.creator_id == c)
        && (filter.statuses.is_empty() || filter.statuses.contains(&flow.status))
        && filter.task_type.map_or(true, |t| flow.task_type == t)
        && filter
            .parent_instance_id
            .map_or(true, |p| flow.parent_instance_id == Some(p))
        && (filter.project_ids.is_empty()
            || flow.project_id.is_some_and(|p| filter.project_ids.contains(&p)))
        && filter.created_after.map_or(true, |t| flow.created_at >= t)
        && filter.created_before.map_or(true, |t| flow.created_at <= t)
}

/// Store backed by process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryFlowStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn begin(&self) -> FlowResult<Box<dyn FlowTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, staged }))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<StoreState>,
    staged: StoreState,
}

#[async_trait]
impl FlowTransaction for InMemoryTransaction {
    async fn insert_flow_instance(&mut self, new: NewFlowInstance) -> FlowResult<FlowInstance> {
        let id = self.staged.next_id();
        let flow = new.into_instance(id, Utc::now());
        self.staged.flows.insert(id, flow.clone());
        Ok(flow)
    }

    async fn find_flow_instance(&mut self, id: i64) -> FlowResult<Option<FlowInstance>> {
        Ok(self.staged.flows.get(&id).cloned())
    }

    async fn list_flow_instances(
        &mut self,
        filter: &FlowInstanceFilter,
    ) -> FlowResult<Vec<FlowInstance>> {
        Ok(self
            .staged
            .flows
            .values()
            .rev()
            .filter(|f| matches_filter(filter, f))
            .cloned()
            .collect())
    }

    async fn update_flow_status(&mut self, id: i64, status: FlowStatus) -> FlowResult<u64> {
        self.update_flow_statuses(&[id], status).await
    }

    async fn update_flow_statuses(&mut self, ids: &[i64], status: FlowStatus) -> FlowResult<u64> {
        let now = Utc::now();
        let mut affected = 0;
        for id in ids {
            if let Some(flow) = self.staged.flows.get_mut(id) {
                flow.status = status;
                flow.updated_at = now;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn update_unfinished_flow_status(
        &mut self,
        id: i64,
        status: FlowStatus,
    ) -> FlowResult<u64> {
        match self.staged.flows.get_mut(&id) {
            Some(flow) if !flow.status.is_terminal() => {
                flow.status = status;
                flow.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn set_process_instance_id(
        &mut self,
        flow_instance_id: i64,
        process_instance_id: &str,
    ) -> FlowResult<u64> {
        Ok(match self.staged.flows.get_mut(&flow_instance_id) {
            Some(flow) => {
                flow.process_instance_id = Some(process_instance_id.to_string());
                1
            }
            None => 0,
        })
    }

    async fn set_process_definition_id(
        &mut self,
        flow_instance_id: i64,
        process_definition_id: &str,
    ) -> FlowResult<u64> {
        Ok(match self.staged.flows.get_mut(&flow_instance_id) {
            Some(flow) => {
                flow.process_definition_id = Some(process_definition_id.to_string());
                1
            }
            None => 0,
        })
    }

    async fn find_flows_by_process_instance_ids(
        &mut self,
        process_instance_ids: &[String],
    ) -> FlowResult<Vec<FlowInstance>> {
        Ok(self
            .staged
            .flows
            .values()
            .filter(|f| {
                f.process_instance_id
                    .as_ref()
                    .is_some_and(|p| process_instance_ids.contains(p))
            })
            .cloned()
            .collect())
    }

    async fn insert_node(&mut self, mut node: NodeInstance) -> FlowResult<NodeInstance> {
        let id = self.staged.next_id();
        node.set_id(id);
        match &node {
            NodeInstance::Task(n) => {
                self.staged.task_nodes.insert(id, n.clone());
            }
            NodeInstance::Approval(n) => {
                self.staged.approval_nodes.insert(id, n.clone());
            }
            NodeInstance::Gateway(n) => {
                self.staged.gateway_nodes.insert(id, n.clone());
            }
        }
        Ok(node)
    }

    async fn update_node(&mut self, node: &NodeInstance) -> FlowResult<u64> {
        let id = node.id();
        let replaced = match node {
            NodeInstance::Task(n) => self
                .staged
                .task_nodes
                .get_mut(&id)
                .map(|slot| *slot = n.clone())
                .is_some(),
            NodeInstance::Approval(n) => self
                .staged
                .approval_nodes
                .get_mut(&id)
                .map(|slot| *slot = n.clone())
                .is_some(),
            NodeInstance::Gateway(n) => self
                .staged
                .gateway_nodes
                .get_mut(&id)
                .map(|slot| *slot = n.clone())
                .is_some(),
        };
        Ok(u64::from(replaced))
    }

    async fn find_node(&mut self, kind: NodeKind, id: i64) -> FlowResult<Option<NodeInstance>> {
        Ok(match kind {
            NodeKind::ServiceTask => self.staged.task_nodes.get(&id).cloned().map(NodeInstance::Task),
            NodeKind::ApprovalTask => self
                .staged
                .approval_nodes
                .get(&id)
                .cloned()
                .map(NodeInstance::Approval),
            NodeKind::Gateway => self
                .staged
                .gateway_nodes
                .get(&id)
                .cloned()
                .map(NodeInstance::Gateway),
        })
    }

    async fn list_nodes(&mut self, flow_instance_id: i64) -> FlowResult<Vec<NodeInstance>> {
        Ok(self.staged.nodes_of(&HashSet::from([flow_instance_id])))
    }

    async fn list_nodes_by_flows(
        &mut self,
        flow_instance_ids: &[i64],
    ) -> FlowResult<Vec<NodeInstance>> {
        Ok(self
            .staged
            .nodes_of(&flow_instance_ids.iter().copied().collect()))
    }

    async fn update_node_statuses(
        &mut self,
        kind: NodeKind,
        ids: &[i64],
        status: FlowNodeStatus,
    ) -> FlowResult<u64> {
        let now = Utc::now();
        let mut affected = 0;
        for id in ids {
            let updated = match kind {
                NodeKind::ServiceTask => self.staged.task_nodes.get_mut(id).map(|n| {
                    n.status = status;
                    n.updated_at = now;
                }),
                NodeKind::ApprovalTask => self.staged.approval_nodes.get_mut(id).map(|n| {
                    n.status = status;
                    n.updated_at = now;
                }),
                NodeKind::Gateway => None,
            };
            if updated.is_some() {
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn list_task_nodes_by_status(
        &mut self,
        status: FlowNodeStatus,
    ) -> FlowResult<Vec<TaskNode>> {
        Ok(self
            .staged
            .task_nodes
            .values()
            .filter(|n| n.status == status)
            .cloned()
            .collect())
    }

    async fn list_approval_nodes_by_status(
        &mut self,
        statuses: &[FlowNodeStatus],
    ) -> FlowResult<Vec<ApprovalNode>> {
        Ok(self
            .staged
            .approval_nodes
            .values()
            .filter(|n| statuses.contains(&n.status))
            .cloned()
            .collect())
    }

    async fn find_approval_nodes(&mut self, ids: &[i64]) -> FlowResult<Vec<ApprovalNode>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.approval_nodes.get(id).cloned())
            .collect())
    }

    async fn insert_sequence(&mut self, mut sequence: Sequence) -> FlowResult<Sequence> {
        sequence.id = self.staged.next_id();
        self.staged.sequences.push(sequence.clone());
        Ok(sequence)
    }

    async fn list_sequences(&mut self, flow_instance_id: i64) -> FlowResult<Vec<Sequence>> {
        Ok(self
            .staged
            .sequences
            .iter()
            .filter(|s| s.flow_instance_id == flow_instance_id)
            .cloned()
            .collect())
    }

    async fn insert_binding(&mut self, mut binding: ElementBinding) -> FlowResult<ElementBinding> {
        binding.id = self.staged.next_id();
        self.staged.bindings.push(binding.clone());
        Ok(binding)
    }

    async fn list_bindings(&mut self, flow_instance_id: i64) -> FlowResult<Vec<ElementBinding>> {
        Ok(self
            .staged
            .bindings
            .iter()
            .filter(|b| b.flow_instance_id == flow_instance_id)
            .cloned()
            .collect())
    }

    async fn insert_candidates(&mut self, candidates: Vec<ApprovalCandidate>) -> FlowResult<()> {
        self.staged.candidates.extend(candidates);
        Ok(())
    }

    async fn list_candidates_by_approval_ids(
        &mut self,
        approval_instance_ids: &[i64],
    ) -> FlowResult<Vec<ApprovalCandidate>> {
        Ok(self
            .staged
            .candidates
            .iter()
            .filter(|c| approval_instance_ids.contains(&c.approval_instance_id))
            .cloned()
            .collect())
    }

    async fn approval_ids_by_role_ids(&mut self, role_ids: &[i64]) -> FlowResult<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .staged
            .candidates
            .iter()
            .filter(|c| c.role_id.is_some_and(|r| role_ids.contains(&r)))
            .map(|c| c.approval_instance_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn approval_ids_by_resource_role_identifiers(
        &mut self,
        identifiers: &[String],
    ) -> FlowResult<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .staged
            .candidates
            .iter()
            .filter(|c| {
                c.resource_role_identifier
                    .as_ref()
                    .is_some_and(|i| identifiers.contains(i))
            })
            .map(|c| c.approval_instance_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn insert_task(&mut self, new: NewTask) -> FlowResult<TaskEntity> {
        let id = self.staged.next_id();
        let task = new.into_entity(id, Utc::now());
        self.staged.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn find_task(&mut self, id: i64) -> FlowResult<Option<TaskEntity>> {
        Ok(self.staged.tasks.get(&id).cloned())
    }

    async fn find_tasks(&mut self, ids: &[i64]) -> FlowResult<Vec<TaskEntity>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.tasks.get(id).cloned())
            .collect())
    }

    async fn update_task(&mut self, task: &TaskEntity) -> FlowResult<u64> {
        Ok(match self.staged.tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                slot.updated_at = Utc::now();
                1
            }
            None => 0,
        })
    }

    async fn update_task_statuses(&mut self, ids: &[i64], status: TaskStatus) -> FlowResult<u64> {
        let now = Utc::now();
        let mut affected = 0;
        for id in ids {
            if let Some(task) = self.staged.tasks.get_mut(id) {
                task.status = status;
                task.updated_at = now;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn touch_heartbeat(&mut self, task_id: i64, at: DateTime<Utc>) -> FlowResult<u64> {
        match self.staged.tasks.get_mut(&task_id) {
            Some(task) if task.status == TaskStatus::Running => {
                task.last_heartbeat_at = Some(at);
                task.updated_at = at;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn find_stale_tasks(
        &mut self,
        ids: &[i64],
        before: DateTime<Utc>,
    ) -> FlowResult<Vec<TaskEntity>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.tasks.get(id))
            .filter(|t| t.last_heartbeat_at.unwrap_or(t.updated_at) < before)
            .cloned()
            .collect())
    }

    async fn save_process_definition(&mut self, definition: &ProcessDefinition) -> FlowResult<()> {
        self.staged
            .definitions
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn find_process_definition(&mut self, id: &str) -> FlowResult<Option<ProcessDefinition>> {
        Ok(self.staged.definitions.get(id).cloned())
    }

    async fn save_process_run(&mut self, run: &ProcessRun) -> FlowResult<()> {
        self.staged.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn find_process_run(&mut self, id: &str) -> FlowResult<Option<ProcessRun>> {
        Ok(self.staged.runs.get(id).cloned())
    }

    async fn commit(self: Box<Self>) -> FlowResult<()> {
        let InMemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> FlowResult<()> {
        Ok(())
    }
}
