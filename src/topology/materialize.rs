//! Persisting a [`FlowGraph`] as node instances, sequences and a deployed
//! process definition.

use chrono::Utc;
use tracing::info;

use super::graph::{FlowGraph, GraphNode};
use crate::engine::{ElementType, ProcessDefinitionBuilder, ProcessEngine, ProcessEngineAdapter};
use crate::error::FlowResult;
use crate::models::{
    ApprovalNode, ElementBinding, ElementKind, FlowInstance, GatewayNode, NodeInstance, NodeKind,
    Sequence, TaskNode,
};
use crate::state_machine::FlowNodeStatus;
use crate::store::FlowTransaction;

#[derive(Debug, Clone)]
pub struct MaterializedFlow {
    pub process_definition_id: String,
    /// Persisted nodes, index-aligned with [`FlowGraph::nodes`]
    pub nodes: Vec<NodeInstance>,
    /// Activity ids, index-aligned with [`FlowGraph::nodes`]
    pub activity_ids: Vec<String>,
}

fn element_of(kind: NodeKind) -> (ElementType, ElementKind, &'static str) {
    match kind {
        NodeKind::ServiceTask => (ElementType::ServiceTask, ElementKind::ServiceTask, "serviceTask"),
        NodeKind::ApprovalTask => (ElementType::UserTask, ElementKind::UserTask, "userTask"),
        NodeKind::Gateway => (
            ElementType::ExclusiveGateway,
            ElementKind::ExclusiveGateway,
            "exclusiveGateway",
        ),
    }
}

/// Write every node, candidate and sequence of `graph`, bind each node to an
/// activity and deploy the matching process definition
///
/// Runs entirely inside `tx`; a failure at any step leaves nothing behind
/// once the caller drops the transaction.
pub async fn materialize(
    tx: &mut dyn FlowTransaction,
    flow: &FlowInstance,
    graph: &FlowGraph,
    engine: &dyn ProcessEngine,
    adapter: &ProcessEngineAdapter,
) -> FlowResult<MaterializedFlow> {
    let now = Utc::now();

    let mut nodes = Vec::with_capacity(graph.nodes().len());
    for node in graph.nodes() {
        let instance = match node {
            GraphNode::Task {
                task_type,
                target_task_id,
                strategy,
            } => NodeInstance::Task(TaskNode {
                id: 0,
                flow_instance_id: flow.id,
                status: FlowNodeStatus::Created,
                task_type: *task_type,
                target_task_id: *target_task_id,
                strategy: *strategy,
                created_at: now,
                updated_at: now,
            }),
            GraphNode::Approval(spec) => NodeInstance::Approval(ApprovalNode {
                id: 0,
                flow_instance_id: flow.id,
                status: FlowNodeStatus::Created,
                auto_approve: spec.auto_approve,
                expire_interval_secs: spec.expire_interval_secs,
                external_approval_id: spec.external_approval_id,
                external_flow_instance_id: None,
                operator_id: None,
                comment: None,
                entered_at: None,
                created_at: now,
                updated_at: now,
            }),
            GraphNode::Gateway { .. } => NodeInstance::Gateway(GatewayNode {
                id: 0,
                flow_instance_id: flow.id,
                created_at: now,
            }),
        };
        let saved = tx.insert_node(instance).await?;

        if let GraphNode::Approval(spec) = node {
            if !spec.candidates.is_empty() {
                let candidates = spec
                    .candidates
                    .iter()
                    .cloned()
                    .map(|candidate| candidate.into_candidate(saved.id(), flow.id))
                    .collect();
                tx.insert_candidates(candidates).await?;
            }
        }
        nodes.push(saved);
    }

    for edge in graph.edges() {
        tx.insert_sequence(Sequence {
            id: 0,
            flow_instance_id: flow.id,
            source_node_id: nodes[edge.from].id(),
            target_node_id: edge.to.map(|to| nodes[to].id()),
            condition: edge.condition.as_ref().map(ToString::to_string),
        })
        .await?;
    }

    let mut definition = ProcessDefinitionBuilder::new(format!("flow_{}", flow.id));
    let start = definition.element("start", "start", ElementType::StartEvent);
    let end = definition.element("end", "end", ElementType::EndEvent);

    let mut activity_ids = Vec::with_capacity(nodes.len());
    for (node, graph_node) in nodes.iter().zip(graph.nodes()) {
        let (element_type, element_kind, prefix) = element_of(node.kind());
        let activity_id = format!("{prefix}_{}", node.id());
        definition.element(activity_id.clone(), graph_node.label(), element_type);
        adapter
            .bind(
                tx,
                ElementBinding {
                    id: 0,
                    flow_instance_id: flow.id,
                    node_id: node.id(),
                    node_kind: node.kind(),
                    element_kind,
                    activity_id: activity_id.clone(),
                    name: graph_node.label(),
                },
            )
            .await?;
        activity_ids.push(activity_id);
    }

    definition.flow(&start, &activity_ids[graph.entry()], None);
    for edge in graph.edges() {
        let target = edge.to.map(|to| activity_ids[to].as_str()).unwrap_or(end.as_str());
        definition.flow(
            &activity_ids[edge.from],
            target,
            edge.condition.as_ref().map(ToString::to_string),
        );
    }

    let process_definition_id = engine.deploy(tx, definition.build()?).await?;
    adapter
        .set_process_definition_id(tx, flow.id, &process_definition_id)
        .await?;

    info!(
        flow_instance_id = flow.id,
        nodes = nodes.len(),
        process_definition_id = %process_definition_id,
        "🧩 Flow topology materialized"
    );
    Ok(MaterializedFlow {
        process_definition_id,
        nodes,
        activity_ids,
    })
}
