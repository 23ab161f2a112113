//! # Flow Instance Model
//!
//! One end-to-end run of an approval-gated workflow. Flow instances are never
//! deleted; they only reach a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskType;
use crate::state_machine::states::FlowStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowInstance {
    pub id: i64,
    pub name: String,
    /// Task type of the flow's target task
    pub task_type: TaskType,
    pub status: FlowStatus,
    pub creator_id: i64,
    pub organization_id: i64,
    pub project_id: Option<i64>,
    /// Link to the flow that spawned this one (chained flows)
    pub parent_instance_id: Option<i64>,
    pub description: Option<String>,
    pub process_instance_id: Option<String>,
    pub process_definition_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New flow instance for insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFlowInstance {
    pub name: String,
    pub task_type: TaskType,
    pub creator_id: i64,
    pub organization_id: i64,
    pub project_id: Option<i64>,
    pub parent_instance_id: Option<i64>,
    pub description: Option<String>,
}

impl NewFlowInstance {
    pub fn into_instance(self, id: i64, now: DateTime<Utc>) -> FlowInstance {
        FlowInstance {
            id,
            name: self.name,
            task_type: self.task_type,
            status: FlowStatus::Created,
            creator_id: self.creator_id,
            organization_id: self.organization_id,
            project_id: self.project_id,
            parent_instance_id: self.parent_instance_id,
            description: self.description,
            process_instance_id: None,
            process_definition_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
