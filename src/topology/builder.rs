//! # Topology Builder
//!
//! Turns a creation request plus the organization's risk-level routing table
//! into a [`FlowGraph`]:
//!
//! ```text
//! pre-check ─▶ risk gateway ─${risklevel == n}─▶ approval ─▶ gateway ─${approved}─▶ … ─▶ [rollback] ─▶ task ─▶ end
//!                                                              └─${!approved}─▶ end
//! ```
//!
//! Every branch is assembled right to left: the task chain first, then each
//! approval node of the chain from the last to the first, so every node is
//! only ever linked to something that already exists.

use std::sync::Arc;
use tracing::{debug, warn};

use super::graph::{ApprovalSpec, FlowGraph, FlowGraphBuilder, GraphNodeId};
use crate::approval::RoleDirectory;
use crate::constants::variables;
use crate::engine::condition::equals_condition;
use crate::error::{FlowError, FlowResult};
use crate::models::approval::resource_role_identifier;
use crate::models::{
    ApprovalFlowConfig, ApprovalNodeConfig, CandidateRef, ExecutionStrategy, ResourceType,
    RiskLevel, TaskType,
};

const APPROVED: &str = "${approved}";
const DISAPPROVED: &str = "${!approved}";

/// The shape-relevant facts of one creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    pub task_type: TaskType,
    pub target_task_id: i64,
    pub strategy: ExecutionStrategy,
    pub pre_check_task_id: Option<i64>,
    pub rollback_task_id: Option<i64>,
    /// Chained task nodes sharing the target task; one per ordered database
    /// group of a multi-database change
    pub task_node_count: usize,
    pub project_id: Option<i64>,
    /// Databases the change touches, for database-scoped resource roles
    pub database_ids: Vec<i64>,
}

impl TopologyPlan {
    pub fn new(task_type: TaskType, target_task_id: i64) -> Self {
        Self {
            task_type,
            target_task_id,
            strategy: ExecutionStrategy::Auto,
            pre_check_task_id: None,
            rollback_task_id: None,
            task_node_count: 1,
            project_id: None,
            database_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    directory: Arc<dyn RoleDirectory>,
}

impl TopologyBuilder {
    pub fn new(directory: Arc<dyn RoleDirectory>) -> Self {
        Self { directory }
    }

    /// Pre-check, risk routing and one approval chain per risk level
    pub async fn risk_gated(
        &self,
        plan: &TopologyPlan,
        risk_levels: &[RiskLevel],
    ) -> FlowResult<FlowGraph> {
        let pre_check_task_id = plan.pre_check_task_id.ok_or_else(|| {
            FlowError::Validation("A risk-gated flow needs a pre-check task".into())
        })?;
        if risk_levels.is_empty() {
            return Err(FlowError::Validation(format!(
                "No risk level is configured for {}",
                plan.task_type
            )));
        }
        let mut levels: Vec<&RiskLevel> = risk_levels.iter().collect();
        levels.sort_by_key(|level| level.level);

        let mut builder = FlowGraphBuilder::new();
        let pre_check = builder.add_task(
            TaskType::PreCheck,
            Some(pre_check_task_id),
            ExecutionStrategy::Auto,
        );
        let risk_gateway = builder.add_gateway("risk_level");
        builder.connect(pre_check, risk_gateway);

        // The lowest level doubles as the default route
        for (index, level) in levels.iter().enumerate() {
            let head = self
                .branch(&mut builder, plan, &level.approval_flow_config)
                .await?;
            if index == 0 {
                builder.connect(risk_gateway, head);
            } else {
                builder.connect_if(
                    risk_gateway,
                    head,
                    &equals_condition(variables::RISK_LEVEL, i64::from(level.level)),
                )?;
            }
            debug!(
                risk_level = level.level,
                approval_nodes = level.approval_flow_config.nodes.len(),
                "Built risk branch"
            );
        }

        builder.set_entry(pre_check);
        builder.build()
    }

    /// Task chain only: `[rollback] → task… → end`
    pub fn without_approval(plan: &TopologyPlan) -> FlowResult<FlowGraph> {
        let mut builder = FlowGraphBuilder::new();
        let head = Self::task_chain(&mut builder, plan);
        builder.set_entry(head);
        builder.build()
    }

    async fn branch(
        &self,
        builder: &mut FlowGraphBuilder,
        plan: &TopologyPlan,
        config: &ApprovalFlowConfig,
    ) -> FlowResult<GraphNodeId> {
        let mut next = Self::task_chain(builder, plan);
        let expire_interval_secs = Some(config.approval_expiration_interval_secs).filter(|s| *s > 0);

        for (position, node_config) in config.nodes.iter().enumerate().rev() {
            let candidates = self
                .candidates_for(node_config, plan.project_id, &plan.database_ids)
                .await?;
            if candidates.is_empty() && !node_config.auto_approval {
                warn!(
                    approval_flow_config_id = config.id,
                    position = position,
                    "Approval node has no candidates and can only be decided with skip-auth"
                );
            }
            let approval = builder.add_approval(ApprovalSpec {
                auto_approve: node_config.auto_approval,
                expire_interval_secs,
                external_approval_id: node_config.external_approval_id,
                candidates,
            });
            let gateway = builder.add_gateway(format!("approval_{position}"));
            builder.connect(approval, gateway);
            builder.connect_if(gateway, next, APPROVED)?;
            builder.connect_end_if(gateway, DISAPPROVED)?;
            next = approval;
        }
        Ok(next)
    }

    fn task_chain(builder: &mut FlowGraphBuilder, plan: &TopologyPlan) -> GraphNodeId {
        let mut next: Option<GraphNodeId> = None;
        for _ in 0..plan.task_node_count.max(1) {
            let node = builder.add_task(plan.task_type, Some(plan.target_task_id), plan.strategy);
            match next {
                Some(target) => builder.connect(node, target),
                None => builder.connect_end(node),
            };
            next = Some(node);
        }

        let mut head = next.unwrap_or_default();
        if let Some(rollback_task_id) = plan.rollback_task_id {
            let rollback = builder.add_task(
                TaskType::GenerateRollback,
                Some(rollback_task_id),
                ExecutionStrategy::Auto,
            );
            builder.connect(rollback, head);
            head = rollback;
        }
        head
    }

    /// Candidate references of one approval node
    ///
    /// A database-scoped resource role yields one identifier per touched
    /// database, any other resource role one for the project.
    pub async fn candidates_for(
        &self,
        config: &ApprovalNodeConfig,
        project_id: Option<i64>,
        database_ids: &[i64],
    ) -> FlowResult<Vec<CandidateRef>> {
        let mut candidates = Vec::new();

        if let Some(resource_role_id) = config.resource_role_id {
            let role = self
                .directory
                .resource_roles_by_ids(&[resource_role_id])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| FlowError::not_found("ResourceRole", "id", resource_role_id))?;
            match role.resource_type {
                ResourceType::Database => candidates.extend(database_ids.iter().map(|db| {
                    CandidateRef::ResourceRole(resource_role_identifier(*db, resource_role_id))
                })),
                ResourceType::Project => match project_id {
                    Some(project_id) => candidates.push(CandidateRef::ResourceRole(
                        resource_role_identifier(project_id, resource_role_id),
                    )),
                    None => warn!(
                        resource_role_id = resource_role_id,
                        "Project resource role configured for a request without a project"
                    ),
                },
            }
        }
        if let Some(role_id) = config.role_id {
            candidates.push(CandidateRef::Role(role_id));
        }
        Ok(candidates)
    }
}
