//! # Node Instances
//!
//! One step of a flow instance's graph. Task, Approval and Gateway nodes are
//! variants of a single tagged enum; status changes go through the per-type
//! state machines in [`crate::state_machine`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::task::TaskType;
use crate::state_machine::states::FlowNodeStatus;

/// Discriminator of the node variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    ServiceTask,
    ApprovalTask,
    Gateway,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceTask => "SERVICE_TASK",
            Self::ApprovalTask => "APPROVAL_TASK",
            Self::Gateway => "GATEWAY",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SERVICE_TASK" => Ok(Self::ServiceTask),
            "APPROVAL_TASK" => Ok(Self::ApprovalTask),
            "GATEWAY" => Ok(Self::Gateway),
            _ => Err(format!("Invalid node kind: {s}")),
        }
    }
}

/// How a task node starts once the engine reaches it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStrategy {
    /// Handed to the async router immediately
    #[default]
    Auto,
    /// Parks in PENDING until a user confirms execution
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: i64,
    pub flow_instance_id: i64,
    pub status: FlowNodeStatus,
    pub task_type: TaskType,
    /// The unit of real work; `None` for nodes that carry no target task
    pub target_task_id: Option<i64>,
    pub strategy: ExecutionStrategy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalNode {
    pub id: i64,
    pub flow_instance_id: i64,
    pub status: FlowNodeStatus,
    pub auto_approve: bool,
    /// Seconds an EXECUTING approval may wait before it expires
    pub expire_interval_secs: Option<i64>,
    pub external_approval_id: Option<i64>,
    /// Correlation id of the instance opened in the external approval system
    pub external_flow_instance_id: Option<String>,
    pub operator_id: Option<i64>,
    pub comment: Option<String>,
    /// When the node last entered EXECUTING
    pub entered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalNode {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match (self.entered_at, self.expire_interval_secs) {
            (Some(entered), Some(secs)) if secs > 0 => {
                now >= entered + chrono::Duration::seconds(secs)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayNode {
    pub id: i64,
    pub flow_instance_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A node instance of any type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeInstance {
    Task(TaskNode),
    Approval(ApprovalNode),
    Gateway(GatewayNode),
}

impl NodeInstance {
    pub fn id(&self) -> i64 {
        match self {
            Self::Task(node) => node.id,
            Self::Approval(node) => node.id,
            Self::Gateway(node) => node.id,
        }
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        match self {
            Self::Task(node) => node.id = id,
            Self::Approval(node) => node.id = id,
            Self::Gateway(node) => node.id = id,
        }
    }

    pub fn flow_instance_id(&self) -> i64 {
        match self {
            Self::Task(node) => node.flow_instance_id,
            Self::Approval(node) => node.flow_instance_id,
            Self::Gateway(node) => node.flow_instance_id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Task(_) => NodeKind::ServiceTask,
            Self::Approval(_) => NodeKind::ApprovalTask,
            Self::Gateway(_) => NodeKind::Gateway,
        }
    }

    /// Gateways are stateless and report `None`
    pub fn status(&self) -> Option<FlowNodeStatus> {
        match self {
            Self::Task(node) => Some(node.status),
            Self::Approval(node) => Some(node.status),
            Self::Gateway(_) => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status().map(|s| s.is_active()).unwrap_or(false)
    }

    pub fn as_task(&self) -> Option<&TaskNode> {
        match self {
            Self::Task(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_approval(&self) -> Option<&ApprovalNode> {
        match self {
            Self::Approval(node) => Some(node),
            _ => None,
        }
    }

    pub fn into_task(self) -> Option<TaskNode> {
        match self {
            Self::Task(node) => Some(node),
            _ => None,
        }
    }

    pub fn into_approval(self) -> Option<ApprovalNode> {
        match self {
            Self::Approval(node) => Some(node),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval(entered_at: Option<DateTime<Utc>>, expire: Option<i64>) -> ApprovalNode {
        let now = Utc::now();
        ApprovalNode {
            id: 1,
            flow_instance_id: 1,
            status: FlowNodeStatus::Executing,
            auto_approve: false,
            expire_interval_secs: expire,
            external_approval_id: None,
            external_flow_instance_id: None,
            operator_id: None,
            comment: None,
            entered_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_approval_expiry_window() {
        let now = Utc::now();
        let entered = now - chrono::Duration::seconds(120);

        assert!(approval(Some(entered), Some(60)).is_expired_at(now));
        assert!(!approval(Some(entered), Some(600)).is_expired_at(now));
        assert!(!approval(None, Some(60)).is_expired_at(now));
        assert!(!approval(Some(entered), None).is_expired_at(now));
        assert!(!approval(Some(entered), Some(0)).is_expired_at(now));
    }

    #[test]
    fn test_gateway_has_no_status() {
        let gateway = NodeInstance::Gateway(GatewayNode {
            id: 3,
            flow_instance_id: 1,
            created_at: Utc::now(),
        });
        assert_eq!(gateway.kind(), NodeKind::Gateway);
        assert_eq!(gateway.status(), None);
        assert!(!gateway.is_active());
    }

    #[test]
    fn test_node_serialization_is_tagged() {
        let node = NodeInstance::Approval(approval(None, None));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "APPROVAL");
        assert_eq!(json["status"], "EXECUTING");
    }
}
