//! In-memory flow graph produced by the topology builder and consumed by
//! [`super::materialize`].

use crate::engine::Condition;
use crate::error::{FlowError, FlowResult};
use crate::models::{CandidateRef, ExecutionStrategy, TaskType};

/// Index of a node inside one [`FlowGraph`]
pub type GraphNodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApprovalSpec {
    pub auto_approve: bool,
    pub expire_interval_secs: Option<i64>,
    pub external_approval_id: Option<i64>,
    pub candidates: Vec<CandidateRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphNode {
    Task {
        task_type: TaskType,
        target_task_id: Option<i64>,
        strategy: ExecutionStrategy,
    },
    Approval(ApprovalSpec),
    Gateway { name: String },
}

impl GraphNode {
    pub fn is_gateway(&self) -> bool {
        matches!(self, Self::Gateway { .. })
    }

    pub fn label(&self) -> String {
        match self {
            Self::Task { task_type, .. } => task_type.to_string(),
            Self::Approval(_) => "APPROVAL".to_string(),
            Self::Gateway { name } => name.clone(),
        }
    }
}

/// Edge between two graph nodes; `to == None` ends the flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub from: GraphNodeId,
    pub to: Option<GraphNodeId>,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    entry: GraphNodeId,
}

impl FlowGraph {
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Node the flow's start event leads to
    pub fn entry(&self) -> GraphNodeId {
        self.entry
    }

    pub fn outgoing(&self, node: GraphNodeId) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.from == node)
    }

    /// Approval nodes in insertion order
    pub fn approvals(&self) -> impl Iterator<Item = (GraphNodeId, &ApprovalSpec)> {
        self.nodes.iter().enumerate().filter_map(|(id, node)| match node {
            GraphNode::Approval(spec) => Some((id, spec)),
            _ => None,
        })
    }

    pub fn task_nodes(&self) -> impl Iterator<Item = (GraphNodeId, TaskType)> + '_ {
        self.nodes.iter().enumerate().filter_map(|(id, node)| match node {
            GraphNode::Task { task_type, .. } => Some((id, *task_type)),
            _ => None,
        })
    }
}

/// Incremental construction of a [`FlowGraph`]
///
/// Nodes are only ever linked forward through the returned ids, so a graph
/// can be assembled from its last node backwards.
#[derive(Debug, Default)]
pub struct FlowGraphBuilder {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    entry: Option<GraphNodeId>,
}

impl FlowGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(
        &mut self,
        task_type: TaskType,
        target_task_id: Option<i64>,
        strategy: ExecutionStrategy,
    ) -> GraphNodeId {
        self.push(GraphNode::Task {
            task_type,
            target_task_id,
            strategy,
        })
    }

    pub fn add_approval(&mut self, spec: ApprovalSpec) -> GraphNodeId {
        self.push(GraphNode::Approval(spec))
    }

    pub fn add_gateway(&mut self, name: impl Into<String>) -> GraphNodeId {
        self.push(GraphNode::Gateway { name: name.into() })
    }

    /// Defaults to the node added first
    pub fn set_entry(&mut self, node: GraphNodeId) -> &mut Self {
        self.entry = Some(node);
        self
    }

    fn push(&mut self, node: GraphNode) -> GraphNodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn connect(&mut self, from: GraphNodeId, to: GraphNodeId) -> &mut Self {
        self.edges.push(GraphEdge {
            from,
            to: Some(to),
            condition: None,
        });
        self
    }

    pub fn connect_if(
        &mut self,
        from: GraphNodeId,
        to: GraphNodeId,
        condition: &str,
    ) -> FlowResult<&mut Self> {
        self.edges.push(GraphEdge {
            from,
            to: Some(to),
            condition: Some(Condition::parse(condition)?),
        });
        Ok(self)
    }

    pub fn connect_end(&mut self, from: GraphNodeId) -> &mut Self {
        self.edges.push(GraphEdge {
            from,
            to: None,
            condition: None,
        });
        self
    }

    pub fn connect_end_if(&mut self, from: GraphNodeId, condition: &str) -> FlowResult<&mut Self> {
        self.edges.push(GraphEdge {
            from,
            to: None,
            condition: Some(Condition::parse(condition)?),
        });
        Ok(self)
    }

    /// Validate and freeze the graph
    ///
    /// Every node but the entry must be reachable through an edge and every
    /// node must leave somewhere. Only gateways route on conditions, with at
    /// most one default edge each.
    pub fn build(self) -> FlowResult<FlowGraph> {
        if self.nodes.is_empty() {
            return Err(FlowError::Validation("A flow needs at least one node".into()));
        }
        let entry = self.entry.unwrap_or(0);
        if entry >= self.nodes.len() {
            return Err(FlowError::Validation(format!("Entry node {entry} does not exist")));
        }

        for edge in &self.edges {
            let in_range = edge.from < self.nodes.len()
                && edge.to.map(|to| to < self.nodes.len()).unwrap_or(true);
            if !in_range {
                return Err(FlowError::Validation(format!(
                    "Edge {:?} references an unknown node",
                    edge
                )));
            }
            if edge.to == Some(entry) {
                return Err(FlowError::Validation("No edge may lead back to the entry node".into()));
            }
        }

        for (id, node) in self.nodes.iter().enumerate() {
            let outgoing: Vec<&GraphEdge> = self.edges.iter().filter(|e| e.from == id).collect();
            if outgoing.is_empty() {
                return Err(FlowError::Validation(format!(
                    "Node {id} ({}) has no outgoing edge",
                    node.label()
                )));
            }
            if id != entry && !self.edges.iter().any(|e| e.to == Some(id)) {
                return Err(FlowError::Validation(format!(
                    "Node {id} ({}) is not reachable",
                    node.label()
                )));
            }
            if node.is_gateway() {
                let defaults = outgoing.iter().filter(|e| e.condition.is_none()).count();
                if defaults > 1 {
                    return Err(FlowError::Validation(format!(
                        "Gateway {id} has {defaults} default edges"
                    )));
                }
            } else if outgoing.len() != 1 || outgoing[0].condition.is_some() {
                return Err(FlowError::Validation(format!(
                    "Node {id} ({}) must have exactly one unconditional edge",
                    node.label()
                )));
            }
        }

        Ok(FlowGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry,
        })
    }
}
