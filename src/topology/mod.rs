//! # Topology
//!
//! Flow graphs: their in-memory form, the builder that derives them from a
//! creation request and the risk-level routing table, and their persistence
//! as node instances bound to a deployed process definition.

pub mod builder;
pub mod graph;
pub mod materialize;

pub use builder::{TopologyBuilder, TopologyPlan};
pub use graph::{ApprovalSpec, FlowGraph, FlowGraphBuilder, GraphEdge, GraphNode, GraphNodeId};
pub use materialize::{materialize, MaterializedFlow};
