//! # Approval Permission Resolver
//!
//! Who may act on which approval node. A user reaches an approval node
//! through two independent routes whose results are unioned:
//!
//! 1. an organization-wide role listed among the node's candidates
//! 2. a resource role held on the concrete resource (project or database)
//!    the node's candidates are scoped to
//!
//! Nothing is cached; every answer is recomputed from the store and the
//! directory so a decision is never served from stale state.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::directory::RoleDirectory;
use crate::error::FlowResult;
use crate::models::{ApprovalNode, FlowInstanceFilter, NodeInstance, User};
use crate::state_machine::FlowNodeStatus;
use crate::store::{chunked, FlowTransaction};

/// Approval statuses a decision can still be made in
pub const ACTIONABLE_APPROVAL_STATUSES: [FlowNodeStatus; 2] =
    [FlowNodeStatus::Executing, FlowNodeStatus::WaitForConfirm];

#[derive(Debug, Clone)]
pub struct ApprovalPermissionResolver {
    directory: Arc<dyn RoleDirectory>,
    max_in_clause_size: usize,
}

impl ApprovalPermissionResolver {
    pub fn new(directory: Arc<dyn RoleDirectory>, max_in_clause_size: usize) -> Self {
        Self {
            directory,
            max_in_clause_size,
        }
    }

    pub fn directory(&self) -> &Arc<dyn RoleDirectory> {
        &self.directory
    }

    async fn candidate_approval_ids(
        &self,
        tx: &mut dyn FlowTransaction,
        user: &User,
    ) -> FlowResult<BTreeSet<i64>> {
        let mut ids = BTreeSet::new();

        let role_ids = self.directory.user_role_ids(user.id).await?;
        for chunk in chunked(&role_ids, self.max_in_clause_size) {
            ids.extend(tx.approval_ids_by_role_ids(chunk).await?);
        }

        let identifiers: Vec<String> = self
            .directory
            .user_resource_roles(user.id)
            .await?
            .iter()
            .map(|grant| grant.identifier())
            .collect();
        for chunk in chunked(&identifiers, self.max_in_clause_size) {
            ids.extend(tx.approval_ids_by_resource_role_identifiers(chunk).await?);
        }

        Ok(ids)
    }

    /// Approval nodes the user can decide right now, inside their organization
    pub async fn approvable_approval_nodes(
        &self,
        tx: &mut dyn FlowTransaction,
        user: &User,
    ) -> FlowResult<Vec<ApprovalNode>> {
        let ids: Vec<i64> = self.candidate_approval_ids(tx, user).await?.into_iter().collect();
        let mut nodes = Vec::new();
        for chunk in chunked(&ids, self.max_in_clause_size) {
            nodes.extend(
                tx.find_approval_nodes(chunk)
                    .await?
                    .into_iter()
                    .filter(|node| ACTIONABLE_APPROVAL_STATUSES.contains(&node.status)),
            );
        }
        if nodes.is_empty() {
            return Ok(nodes);
        }

        let flow_ids: Vec<i64> = nodes
            .iter()
            .map(|node| node.flow_instance_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut in_organization = HashSet::new();
        for chunk in chunked(&flow_ids, self.max_in_clause_size) {
            let filter = FlowInstanceFilter {
                organization_id: Some(user.organization_id),
                ids: Some(chunk.to_vec()),
                ..FlowInstanceFilter::default()
            };
            in_organization.extend(tx.list_flow_instances(&filter).await?.into_iter().map(|f| f.id));
        }
        nodes.retain(|node| in_organization.contains(&node.flow_instance_id));

        debug!(
            user_id = user.id,
            approvable = nodes.len(),
            "Resolved approvable approval nodes"
        );
        Ok(nodes)
    }

    pub async fn approvable_flow_instance_ids(
        &self,
        tx: &mut dyn FlowTransaction,
        user: &User,
    ) -> FlowResult<BTreeSet<i64>> {
        Ok(self
            .approvable_approval_nodes(tx, user)
            .await?
            .into_iter()
            .map(|node| node.flow_instance_id)
            .collect())
    }

    pub async fn is_approvable(
        &self,
        tx: &mut dyn FlowTransaction,
        user: &User,
        approval_node_id: i64,
    ) -> FlowResult<bool> {
        Ok(self
            .approvable_approval_nodes(tx, user)
            .await?
            .iter()
            .any(|node| node.id == approval_node_id))
    }

    /// Users entitled to approve, or who already decided, per flow instance
    ///
    /// candidates of every approval node → role / resource-role holders →
    /// user records, re-keyed by flow instance with set union.
    pub async fn candidates_by_flow_instance_ids(
        &self,
        tx: &mut dyn FlowTransaction,
        flow_instance_ids: &[i64],
    ) -> FlowResult<HashMap<i64, HashSet<User>>> {
        if flow_instance_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut approvals: Vec<ApprovalNode> = Vec::new();
        for chunk in chunked(flow_instance_ids, self.max_in_clause_size) {
            approvals.extend(
                tx.list_nodes_by_flows(chunk)
                    .await?
                    .into_iter()
                    .filter_map(NodeInstance::into_approval),
            );
        }
        if approvals.is_empty() {
            return Ok(HashMap::new());
        }

        let approval_ids: Vec<i64> = approvals.iter().map(|a| a.id).collect();
        let mut candidates = Vec::new();
        for chunk in chunked(&approval_ids, self.max_in_clause_size) {
            candidates.extend(tx.list_candidates_by_approval_ids(chunk).await?);
        }

        let role_ids: Vec<i64> = candidates
            .iter()
            .filter_map(|c| c.role_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let identifiers: Vec<String> = candidates
            .iter()
            .filter_map(|c| c.resource_role_identifier.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let by_role = if role_ids.is_empty() {
            HashMap::new()
        } else {
            self.directory.user_ids_by_role_ids(&role_ids).await?
        };
        let by_identifier = if identifiers.is_empty() {
            HashMap::new()
        } else {
            self.directory
                .user_ids_by_resource_role_identifiers(&identifiers)
                .await?
        };

        let mut user_ids_by_flow: HashMap<i64, HashSet<i64>> = HashMap::new();
        for candidate in &candidates {
            let entry = user_ids_by_flow.entry(candidate.flow_instance_id).or_default();
            if let Some(holders) = candidate.role_id.and_then(|id| by_role.get(&id)) {
                entry.extend(holders.iter().copied());
            }
            if let Some(holders) = candidate
                .resource_role_identifier
                .as_ref()
                .and_then(|identifier| by_identifier.get(identifier))
            {
                entry.extend(holders.iter().copied());
            }
        }
        for approval in &approvals {
            if let Some(operator_id) = approval.operator_id {
                user_ids_by_flow
                    .entry(approval.flow_instance_id)
                    .or_default()
                    .insert(operator_id);
            }
        }

        let all_user_ids: Vec<i64> = user_ids_by_flow
            .values()
            .flatten()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if all_user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let users: HashMap<i64, User> = self
            .directory
            .users_by_ids(&all_user_ids)
            .await?
            .into_iter()
            .map(|user| (user.id, user))
            .collect();

        Ok(user_ids_by_flow
            .into_iter()
            .map(|(flow_id, ids)| {
                let records = ids.iter().filter_map(|id| users.get(id).cloned()).collect();
                (flow_id, records)
            })
            .filter(|(_, records): &(i64, HashSet<User>)| !records.is_empty())
            .collect())
    }
}
