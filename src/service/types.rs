use serde::{Deserialize, Serialize};

use crate::models::{FlowInstance, NodeInstance, User};

/// A flow with its nodes, the users who may act on it now and its target task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowInstanceDetail {
    pub flow: FlowInstance,
    pub nodes: Vec<NodeInstance>,
    /// Candidates of the flow's actionable approval node, ordered by user id
    pub candidates: Vec<User>,
    pub task_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMetaInfo {
    pub pending_approval_count: usize,
}

/// Per-flow outcome of a batch cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResult {
    pub flow_instance_id: i64,
    pub succeeded: bool,
    pub message: Option<String>,
}

impl CancelResult {
    pub fn ok(flow_instance_id: i64) -> Self {
        Self {
            flow_instance_id,
            succeeded: true,
            message: None,
        }
    }

    pub fn failed(flow_instance_id: i64, message: impl Into<String>) -> Self {
        Self {
            flow_instance_id,
            succeeded: false,
            message: Some(message.into()),
        }
    }
}
