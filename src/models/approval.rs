//! # Approval Policy and Candidates
//!
//! A risk level selects one `ApprovalFlowConfig`; each of its node configs
//! becomes one approval node whose candidates are persisted as
//! `ApprovalCandidate` rows.

use serde::{Deserialize, Serialize};

/// Risk classification that selects an approval chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskLevel {
    pub id: i64,
    /// Value compared against the `risklevel` variable by the risk gateway
    pub level: i32,
    pub name: String,
    pub approval_flow_config: ApprovalFlowConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalFlowConfig {
    pub id: i64,
    pub name: String,
    /// Ordered approval chain
    pub nodes: Vec<ApprovalNodeConfig>,
    pub approval_expiration_interval_secs: i64,
    pub execution_expiration_interval_secs: i64,
    pub wait_execution_expiration_interval_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalNodeConfig {
    /// Resource role whose holders may approve (project- or database-scoped)
    pub resource_role_id: Option<i64>,
    /// Organization-wide role whose holders may approve
    pub role_id: Option<i64>,
    pub auto_approval: bool,
    /// Approval is delegated to an external approval system
    pub external_approval_id: Option<i64>,
}

/// One candidate entry of an approval node
///
/// Exactly one of `role_id` / `resource_role_identifier` is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalCandidate {
    pub approval_instance_id: i64,
    pub flow_instance_id: i64,
    pub role_id: Option<i64>,
    /// `"{resourceId}:{resourceRoleId}"`
    pub resource_role_identifier: Option<String>,
}

/// Candidate reference before it is attached to a persisted approval node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateRef {
    Role(i64),
    ResourceRole(String),
}

impl CandidateRef {
    pub fn into_candidate(self, approval_instance_id: i64, flow_instance_id: i64) -> ApprovalCandidate {
        let (role_id, resource_role_identifier) = match self {
            Self::Role(id) => (Some(id), None),
            Self::ResourceRole(identifier) => (None, Some(identifier)),
        };
        ApprovalCandidate {
            approval_instance_id,
            flow_instance_id,
            role_id,
            resource_role_identifier,
        }
    }
}

/// Builds a `"{resourceId}:{resourceRoleId}"` identifier
pub fn resource_role_identifier(resource_id: i64, resource_role_id: i64) -> String {
    format!("{resource_id}:{resource_role_id}")
}
