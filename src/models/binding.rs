use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::node::NodeKind;

/// Kind of process-engine element a node is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementKind {
    ServiceTask,
    UserTask,
    ExclusiveGateway,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceTask => "SERVICE_TASK",
            Self::UserTask => "USER_TASK",
            Self::ExclusiveGateway => "EXCLUSIVE_GATEWAY",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SERVICE_TASK" => Ok(Self::ServiceTask),
            "USER_TASK" => Ok(Self::UserTask),
            "EXCLUSIVE_GATEWAY" => Ok(Self::ExclusiveGateway),
            _ => Err(format!("Invalid element kind: {s}")),
        }
    }
}

/// Binding of a node instance to one process-engine activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementBinding {
    pub id: i64,
    pub flow_instance_id: i64,
    pub node_id: i64,
    pub node_kind: NodeKind,
    pub element_kind: ElementKind,
    pub activity_id: String,
    pub name: String,
}
