//! # Flow Instance Service
//!
//! Creation, cancellation, approval decisions and read projections of flow
//! instances.
//!
//! ## Transactions
//!
//! Every operation runs in a single store transaction. Jobs produced by an
//! operation are handed to the router only after its commit, and requests
//! relayed to another node are sent with no transaction open.
//!
//! ## Cancellation
//!
//! Cancelling always ends with the flow CANCELLED. The active node decides
//! the route: an approval or a PENDING task is cancelled here, an EXECUTING
//! task is cancelled on the node running it. When the preconditions of
//! neither route hold, or the owning node cannot be reached, the flow status
//! is overwritten directly.

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::context::RequestContext;
use super::types::{CancelResult, FlowInstanceDetail, FlowMetaInfo};
use super::ServiceComponents;
use crate::approval::{ApprovalPermissionResolver, ACTIONABLE_APPROVAL_STATUSES};
use crate::constants::{limits, variables};
use crate::dispatch::FlowCommand;
use crate::engine::Variables;
use crate::error::{verify_singleton, FlowError, FlowResult};
use crate::events::FlowEvent;
use crate::logging::{log_error, log_flow_operation};
use crate::models::{
    ApprovalNode, CreateFlowInstanceReq, ExecutorInfo, FlowInstance, FlowInstanceFilter,
    FlowInstanceQuery, NewFlowInstance, NewTask, NodeInstance, Page, RiskLevel, TaskEntity,
    TaskParameters, TaskType,
};
use crate::sql::split_sql;
use crate::state_machine::{FlowNodeStatus, FlowStatus};
use crate::store::FlowTransaction;
use crate::topology::{materialize, TopologyBuilder, TopologyPlan};

/// Route a cancellation takes once the active node is known
enum CancelRoute {
    Local,
    Remote(ExecutorInfo),
    Forced(String),
}

#[derive(Clone)]
pub struct FlowInstanceService {
    components: ServiceComponents,
    resolver: ApprovalPermissionResolver,
    topology: TopologyBuilder,
    /// terminate id -> results, `None` while the batch is still running
    batch_cancels: Arc<DashMap<String, Option<Vec<CancelResult>>>>,
}

impl std::fmt::Debug for FlowInstanceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowInstanceService")
            .field("components", &self.components)
            .field("batch_cancels", &self.batch_cancels.len())
            .finish_non_exhaustive()
    }
}

impl FlowInstanceService {
    pub fn new(components: ServiceComponents) -> Self {
        let resolver = ApprovalPermissionResolver::new(
            Arc::clone(&components.directory),
            components.config.heartbeat.max_in_clause_size,
        );
        let topology = TopologyBuilder::new(Arc::clone(&components.directory));
        Self {
            components,
            resolver,
            topology,
            batch_cancels: Arc::new(DashMap::new()),
        }
    }

    pub fn resolver(&self) -> &ApprovalPermissionResolver {
        &self.resolver
    }

    /// Create a risk-gated flow: pre-check, risk routing, approvals, task
    #[instrument(skip(self, ctx, req), fields(task_type = %req.task_type, user_id = ctx.user_id()))]
    pub async fn create(
        &self,
        ctx: &RequestContext,
        req: CreateFlowInstanceReq,
    ) -> FlowResult<FlowInstance> {
        self.validate(&req)?;
        let risk_levels = self
            .components
            .risk_levels
            .risk_levels(ctx.organization_id(), req.task_type)
            .await?;
        self.create_flow(ctx, req, Some(risk_levels)).await
    }

    /// Create a flow that runs its task chain with no pre-check or approval
    #[instrument(skip(self, ctx, req), fields(task_type = %req.task_type, user_id = ctx.user_id()))]
    pub async fn create_without_approval(
        &self,
        ctx: &RequestContext,
        req: CreateFlowInstanceReq,
    ) -> FlowResult<FlowInstance> {
        self.validate(&req)?;
        self.create_flow(ctx, req, None).await
    }

    fn validate(&self, req: &CreateFlowInstanceReq) -> FlowResult<()> {
        let limits = &self.components.config.flow_task;
        let check_sql = |sql: &str| -> FlowResult<()> {
            if sql.len() > limits.sql_content_max_length {
                return Err(FlowError::OverLimit {
                    metric: limits::SQL_CONTENT_LENGTH,
                    limit: limits.sql_content_max_length as u64,
                    message: format!("SQL content is {} bytes long", sql.len()),
                });
            }
            Ok(())
        };

        match &req.parameters {
            TaskParameters::DatabaseChange(p) => check_sql(&p.sql_content)?,
            TaskParameters::MultipleDatabaseChange(p) => {
                if p.ordered_database_ids.iter().all(Vec::is_empty) {
                    return Err(FlowError::Validation(
                        "A multiple database change needs at least one database".into(),
                    ));
                }
                check_sql(&p.sql_content)?;
            }
            TaskParameters::Export(p) => {
                if !p.export_all_objects && p.export_db_objects.len() > limits.max_export_objects {
                    return Err(FlowError::OverLimit {
                        metric: limits::EXPORT_OBJECT_COUNT,
                        limit: limits.max_export_objects as u64,
                        message: format!("{} objects selected for export", p.export_db_objects.len()),
                    });
                }
            }
            TaskParameters::Import(p) => {
                if p.import_file_names.is_empty() {
                    return Err(FlowError::Validation("No file to import".into()));
                }
            }
            TaskParameters::ApplyDatabasePermission(p) => {
                if p.databases.is_empty() {
                    return Err(FlowError::Validation("No database to apply for".into()));
                }
                if p.databases.len() > limits.max_apply_databases {
                    return Err(FlowError::OverLimit {
                        metric: limits::APPLY_DATABASE_COUNT,
                        limit: limits.max_apply_databases as u64,
                        message: format!("{} databases requested", p.databases.len()),
                    });
                }
            }
            TaskParameters::ApplyTablePermission(p) => {
                if p.tables.is_empty() {
                    return Err(FlowError::Validation("No table to apply for".into()));
                }
                let databases: HashSet<i64> = p.tables.iter().map(|t| t.database_id).collect();
                if databases.len() > limits.max_apply_databases {
                    return Err(FlowError::OverLimit {
                        metric: limits::APPLY_DATABASE_COUNT,
                        limit: limits.max_apply_databases as u64,
                        message: format!("tables span {} databases", databases.len()),
                    });
                }
            }
            TaskParameters::StructureComparison(_) | TaskParameters::Generic(_) => {}
        }
        Ok(())
    }

    async fn create_flow(
        &self,
        ctx: &RequestContext,
        req: CreateFlowInstanceReq,
        risk_levels: Option<Vec<RiskLevel>>,
    ) -> FlowResult<FlowInstance> {
        let lifecycle = &self.components.lifecycle;
        let mut tx = self.components.store.begin().await?;

        let flow = tx
            .insert_flow_instance(NewFlowInstance {
                name: req.flow_instance_name(),
                task_type: req.task_type,
                creator_id: ctx.user_id(),
                organization_id: ctx.organization_id(),
                project_id: req.project_id,
                parent_instance_id: req.parent_flow_instance_id,
                description: req.description.clone(),
            })
            .await?;
        let target = tx.insert_task(self.new_task(ctx, &req, req.task_type)).await?;

        let mut plan = TopologyPlan::new(req.task_type, target.id);
        plan.strategy = req.execution_strategy;
        plan.project_id = req.project_id;
        plan.database_ids = req.touched_database_ids();
        if let TaskParameters::MultipleDatabaseChange(p) = &req.parameters {
            plan.task_node_count = p.ordered_database_ids.len().max(1);
        }
        if req.generates_rollback_plan() {
            let rollback = tx
                .insert_task(self.new_task(ctx, &req, TaskType::GenerateRollback))
                .await?;
            plan.rollback_task_id = Some(rollback.id);
        }

        let graph = match &risk_levels {
            Some(levels) => {
                let pre_check = tx
                    .insert_task(self.new_task(ctx, &req, TaskType::PreCheck))
                    .await?;
                plan.pre_check_task_id = Some(pre_check.id);
                self.topology.risk_gated(&plan, levels).await?
            }
            None => TopologyBuilder::without_approval(&plan)?,
        };

        let materialized = materialize(
            tx.as_mut(),
            &flow,
            &graph,
            lifecycle.engine().as_ref(),
            lifecycle.adapter(),
        )
        .await?;
        let started = lifecycle
            .engine()
            .start(
                tx.as_mut(),
                &materialized.process_definition_id,
                self.start_variables(ctx, &req, &flow, &plan),
            )
            .await?;
        lifecycle
            .adapter()
            .set_process_instance_id(tx.as_mut(), flow.id, &started.process_instance_id)
            .await?;
        let jobs = lifecycle
            .apply(tx.as_mut(), &flow, &started.process_instance_id, started.events)
            .await?;
        let flow = find_flow(tx.as_mut(), flow.id).await?;
        tx.commit().await?;

        self.components.router.submit_all(jobs);
        self.components.publisher.publish(FlowEvent::FlowCreated {
            flow_instance_id: flow.id,
            task_type: flow.task_type,
            creator_id: flow.creator_id,
        });
        info!(
            flow_instance_id = flow.id,
            task_type = %flow.task_type,
            status = %flow.status,
            nodes = materialized.nodes.len(),
            "✅ Flow instance created"
        );
        log_flow_operation(
            "create",
            Some(flow.id),
            Some(ctx.user_id()),
            flow.status.as_str(),
            Some(&format!("target_task_id={}", target.id)),
        );
        Ok(flow)
    }

    fn new_task(&self, ctx: &RequestContext, req: &CreateFlowInstanceReq, task_type: TaskType) -> NewTask {
        NewTask {
            task_type,
            creator_id: ctx.user_id(),
            organization_id: ctx.organization_id(),
            project_id: req.project_id,
            connection_id: req.connection_id,
            database_id: req.database_id,
            database_name: req.database_name.clone(),
            parameters: req.parameters.to_json(),
            submitter: Some(self.components.forwarder.checker().local().clone()),
            execution_expiration_interval_secs: self
                .components
                .config
                .flow_task
                .default_execution_expiration_hours
                * 3600,
        }
    }

    fn start_variables(
        &self,
        ctx: &RequestContext,
        req: &CreateFlowInstanceReq,
        flow: &FlowInstance,
        plan: &TopologyPlan,
    ) -> Variables {
        let mut vars = Variables::new()
            .with(variables::FLOW_INSTANCE_ID, flow.id)
            .with(variables::TASK_ID, plan.target_task_id)
            .with(variables::CREATOR_ID, ctx.user_id())
            .with(variables::ORGANIZATION_ID, ctx.organization_id())
            .with(variables::SITE_URL, self.components.config.node.site_url.clone());
        if let Some(id) = plan.pre_check_task_id {
            vars.set(variables::PRE_CHECK_TASK_ID, id);
        }
        if let Some(id) = plan.rollback_task_id {
            vars.set(variables::ROLLBACK_TASK_ID, id);
        }
        if let Some(id) = req.connection_id {
            vars.set(variables::CONNECTION_ID, id);
        }
        if let Some(id) = req.database_id {
            vars.set(variables::DATABASE_ID, id);
        }
        if let Some(name) = &req.database_name {
            vars.set(variables::DATABASE_NAME, name.clone());
        }

        match &req.parameters {
            TaskParameters::DatabaseChange(p) => {
                vars.set(
                    variables::SQL_STATEMENTS,
                    split_sql(req.dialect, &p.sql_content, &p.delimiter),
                );
            }
            TaskParameters::MultipleDatabaseChange(p) => {
                vars.set(
                    variables::SQL_STATEMENTS,
                    split_sql(req.dialect, &p.sql_content, &p.delimiter),
                );
                for (index, group) in p.ordered_database_ids.iter().enumerate() {
                    vars.set(
                        format!("{}{index}", variables::DATABASE_GROUP_PREFIX),
                        group.clone(),
                    );
                }
            }
            _ => {}
        }
        vars
    }

    /// Cancel a flow
    ///
    /// Cancelling a CANCELLED flow returns it unchanged; a COMPLETED flow
    /// cannot be cancelled.
    #[instrument(skip(self, ctx), fields(user_id = ctx.user_id(), forwarded = ctx.forwarded))]
    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        flow_instance_id: i64,
        skip_auth: bool,
    ) -> FlowResult<FlowInstance> {
        let lifecycle = &self.components.lifecycle;
        let mut tx = self.components.store.begin().await?;
        let flow = find_visible_flow(tx.as_mut(), ctx, flow_instance_id).await?;
        if !skip_auth && flow.creator_id != ctx.user_id() {
            return Err(FlowError::AccessDenied(format!(
                "Only the creator may cancel flow instance {flow_instance_id}"
            )));
        }
        match flow.status {
            FlowStatus::Completed => return Err(FlowError::FinishedTaskNotTerminable(flow.id)),
            status if status.is_terminal() => return Ok(flow),
            _ => {}
        }

        let route = self.cancel_route(tx.as_mut(), ctx, &flow).await?;
        match route {
            CancelRoute::Local => {
                lifecycle.cancel_flow(tx.as_mut(), &flow).await?;
                tx.commit().await?;
                self.components.active.cancel(flow.id);
            }
            CancelRoute::Remote(target) => {
                drop(tx);
                let command = FlowCommand::Cancel { skip_auth };
                match self
                    .components
                    .forwarder
                    .forward_typed::<FlowInstance>(&target, flow.id, &command, ctx)
                    .await
                {
                    Ok(remote) => {
                        log_flow_operation("cancel", Some(flow.id), Some(ctx.user_id()), "forwarded", None);
                        return Ok(remote);
                    }
                    // Only a node we could not talk to is overridden; its
                    // own answer, such as a finished task, goes to the caller
                    Err(e @ FlowError::RemoteDispatch { .. }) => {
                        warn!(
                            flow_instance_id = flow.id,
                            error = %e,
                            "Owning node unreachable, forcing flow to CANCELLED"
                        );
                        log_error(
                            "FlowInstanceService",
                            "cancel",
                            &e.to_string(),
                            Some(&format!("flow_instance_id={}", flow.id)),
                        );
                        let mut tx = self.components.store.begin().await?;
                        let forced = lifecycle
                            .force_unfinished_status(tx.as_mut(), flow.id, FlowStatus::Cancelled)
                            .await?;
                        tx.commit().await?;
                        if !forced {
                            let current = self.reload(flow.id).await?;
                            log_flow_operation(
                                "cancel",
                                Some(flow.id),
                                Some(ctx.user_id()),
                                "already_finished",
                                Some(current.status.as_str()),
                            );
                            return match current.status {
                                FlowStatus::Completed => {
                                    Err(FlowError::FinishedTaskNotTerminable(flow.id))
                                }
                                _ => Ok(current),
                            };
                        }
                    }
                    Err(e) => {
                        log_flow_operation(
                            "cancel",
                            Some(flow.id),
                            Some(ctx.user_id()),
                            "rejected_by_owner",
                            Some(e.kind()),
                        );
                        return Err(e);
                    }
                }
            }
            CancelRoute::Forced(reason) => {
                warn!(
                    flow_instance_id = flow.id,
                    reason = %reason,
                    "No cancellable node, forcing flow to CANCELLED"
                );
                lifecycle.force_status(tx.as_mut(), flow.id, FlowStatus::Cancelled).await?;
                tx.commit().await?;
                self.components.active.cancel(flow.id);
            }
        }

        self.components
            .publisher
            .publish(FlowEvent::FlowCancelled { flow_instance_id: flow.id });
        log_flow_operation("cancel", Some(flow.id), Some(ctx.user_id()), "cancelled", None);
        self.reload(flow.id).await
    }

    async fn cancel_route(
        &self,
        tx: &mut dyn FlowTransaction,
        ctx: &RequestContext,
        flow: &FlowInstance,
    ) -> FlowResult<CancelRoute> {
        let nodes = tx.list_nodes(flow.id).await?;
        let active: Vec<&NodeInstance> = nodes.iter().filter(|n| n.is_active()).collect();
        let node = match active.as_slice() {
            [node] => *node,
            other => return Ok(CancelRoute::Forced(format!("{} active nodes", other.len()))),
        };

        match node {
            NodeInstance::Approval(_) => Ok(CancelRoute::Local),
            NodeInstance::Task(task) if task.status == FlowNodeStatus::Pending => Ok(CancelRoute::Local),
            NodeInstance::Task(task) if task.status == FlowNodeStatus::Executing => {
                let Some(task_id) = task.target_task_id else {
                    return Ok(CancelRoute::Forced("executing node has no target task".into()));
                };
                let target = tx
                    .find_task(task_id)
                    .await?
                    .ok_or_else(|| FlowError::not_found("Task", "id", task_id))?;
                Ok(self
                    .components
                    .forwarder
                    .remote_target(ctx, target.executor.as_ref())
                    .map_or(CancelRoute::Local, CancelRoute::Remote))
            }
            other => Ok(CancelRoute::Forced(format!(
                "node {} is {:?}",
                other.id(),
                other.status()
            ))),
        }
    }

    /// Cancel `ids` one by one in the background; returns the terminate id
    /// to poll [`Self::batch_cancel_result`] with
    pub fn start_batch_cancel(&self, ctx: &RequestContext, ids: Vec<i64>) -> String {
        let terminate_id = Uuid::new_v4().to_string();
        self.batch_cancels.insert(terminate_id.clone(), None);

        let service = self.clone();
        let ctx = ctx.clone();
        let key = terminate_id.clone();
        tokio::spawn(async move {
            let mut results = Vec::with_capacity(ids.len());
            for id in ids {
                match service.cancel(&ctx, id, false).await {
                    Ok(_) => results.push(CancelResult::ok(id)),
                    Err(e) => {
                        warn!(flow_instance_id = id, error = %e, "Batch cancellation failed for flow");
                        results.push(CancelResult::failed(id, e.to_string()));
                    }
                }
            }
            info!(terminate_id = %key, flows = results.len(), "Batch cancellation finished");
            service.batch_cancels.insert(key, Some(results));
        });
        terminate_id
    }

    /// Empty until the batch finished; the results are handed out once
    pub fn batch_cancel_result(&self, terminate_id: &str) -> FlowResult<Vec<CancelResult>> {
        let finished = self
            .batch_cancels
            .get(terminate_id)
            .map(|entry| entry.value().is_some());
        match finished {
            None => Err(FlowError::not_found("BatchCancel", "terminate_id", terminate_id)),
            Some(false) => Ok(Vec::new()),
            Some(true) => Ok(self
                .batch_cancels
                .remove(terminate_id)
                .and_then(|(_, results)| results)
                .unwrap_or_default()),
        }
    }

    pub async fn approve(
        &self,
        ctx: &RequestContext,
        flow_instance_id: i64,
        message: Option<String>,
        skip_auth: bool,
    ) -> FlowResult<FlowInstance> {
        self.decide(ctx, flow_instance_id, message, skip_auth, true).await
    }

    pub async fn reject(
        &self,
        ctx: &RequestContext,
        flow_instance_id: i64,
        message: Option<String>,
        skip_auth: bool,
    ) -> FlowResult<FlowInstance> {
        self.decide(ctx, flow_instance_id, message, skip_auth, false).await
    }

    #[instrument(skip(self, ctx, message), fields(user_id = ctx.user_id(), forwarded = ctx.forwarded))]
    async fn decide(
        &self,
        ctx: &RequestContext,
        flow_instance_id: i64,
        message: Option<String>,
        skip_auth: bool,
        approved: bool,
    ) -> FlowResult<FlowInstance> {
        let mut tx = self.components.store.begin().await?;
        let flow = find_visible_flow(tx.as_mut(), ctx, flow_instance_id).await?;
        let actionable: Vec<ApprovalNode> = tx
            .list_nodes(flow.id)
            .await?
            .into_iter()
            .filter_map(NodeInstance::into_approval)
            .filter(|node| ACTIONABLE_APPROVAL_STATUSES.contains(&node.status))
            .collect();
        let approval = verify_singleton(
            actionable,
            &format!("Actionable approval node of flow instance {}", flow.id),
        )?;
        if !skip_auth && !self.resolver.is_approvable(tx.as_mut(), &ctx.user, approval.id).await? {
            return Err(FlowError::AccessDenied(format!(
                "User {} cannot approve flow instance {}",
                ctx.user_id(),
                flow.id
            )));
        }

        // The uploaded import file lives on the submitting node
        if flow.task_type == TaskType::Import {
            let task = target_task(tx.as_mut(), flow.id).await?;
            if let Some(target) = self
                .components
                .forwarder
                .remote_target(ctx, task.submitter.as_ref())
            {
                drop(tx);
                let command = if approved {
                    FlowCommand::Approve { message, skip_auth: true }
                } else {
                    FlowCommand::Reject { message, skip_auth: true }
                };
                return self
                    .components
                    .forwarder
                    .forward_typed(&target, flow.id, &command, ctx)
                    .await;
            }
        }

        let jobs = self
            .components
            .lifecycle
            .complete_approval(
                tx.as_mut(),
                &flow,
                approval.clone(),
                approved,
                Some(ctx.user_id()),
                message,
            )
            .await?;
        let flow = find_flow(tx.as_mut(), flow.id).await?;
        tx.commit().await?;

        self.components.router.submit_all(jobs);
        let event = if approved {
            FlowEvent::FlowApproved {
                flow_instance_id: flow.id,
                approval_node_id: approval.id,
                operator_id: Some(ctx.user_id()),
            }
        } else {
            self.components.lifecycle.cancel_external(&approval).await;
            FlowEvent::FlowRejected {
                flow_instance_id: flow.id,
                approval_node_id: approval.id,
                operator_id: Some(ctx.user_id()),
            }
        };
        self.components.publisher.publish(event);
        log_flow_operation(
            if approved { "approve" } else { "reject" },
            Some(flow.id),
            Some(ctx.user_id()),
            flow.status.as_str(),
            Some(&format!("approval_node_id={}", approval.id)),
        );
        Ok(flow)
    }

    pub async fn get_status(&self, ctx: &RequestContext, flow_instance_id: i64) -> FlowResult<FlowStatus> {
        let mut tx = self.components.store.begin().await?;
        Ok(find_visible_flow(tx.as_mut(), ctx, flow_instance_id).await?.status)
    }

    /// Flows of the caller's organization; unless `contains_all` is set they
    /// are restricted to flows the caller created, can approve now, or either
    /// when neither flag is given
    pub async fn list(
        &self,
        ctx: &RequestContext,
        query: &FlowInstanceQuery,
    ) -> FlowResult<Page<FlowInstance>> {
        let base = FlowInstanceFilter {
            organization_id: Some(ctx.organization_id()),
            ids: query.flow_instance_id.map(|id| vec![id]),
            creator_id: None,
            statuses: query.statuses.clone(),
            task_type: query.task_type,
            parent_instance_id: query.parent_instance_id,
            project_ids: query.project_ids.clone(),
            created_after: query.start_time,
            created_before: query.end_time,
        };

        let mut tx = self.components.store.begin().await?;
        if query.contains_all {
            let flows = tx.list_flow_instances(&base).await?;
            return Ok(Page::paginate(flows, &query.pagination));
        }

        let (by_creator, by_approver) =
            match (query.created_by_current_user, query.approve_by_current_user) {
                (false, false) => (true, true),
                flags => flags,
            };
        let mut merged: BTreeMap<i64, FlowInstance> = BTreeMap::new();
        if by_creator {
            let filter = FlowInstanceFilter {
                creator_id: Some(ctx.user_id()),
                ..base.clone()
            };
            merged.extend(tx.list_flow_instances(&filter).await?.into_iter().map(|f| (f.id, f)));
        }
        if by_approver {
            let approvable = self
                .resolver
                .approvable_flow_instance_ids(tx.as_mut(), &ctx.user)
                .await?;
            let ids = match &base.ids {
                Some(ids) => ids.iter().copied().filter(|id| approvable.contains(id)).collect(),
                None => approvable.into_iter().collect(),
            };
            let filter = FlowInstanceFilter {
                ids: Some(ids),
                ..base
            };
            merged.extend(tx.list_flow_instances(&filter).await?.into_iter().map(|f| (f.id, f)));
        }

        let flows: Vec<FlowInstance> = merged.into_values().rev().collect();
        Ok(Page::paginate(flows, &query.pagination))
    }

    pub async fn detail(
        &self,
        ctx: &RequestContext,
        flow_instance_id: i64,
    ) -> FlowResult<FlowInstanceDetail> {
        let mut tx = self.components.store.begin().await?;
        let flow = find_visible_flow(tx.as_mut(), ctx, flow_instance_id).await?;
        let nodes = tx.list_nodes(flow.id).await?;
        let mut candidates: Vec<_> = self
            .resolver
            .candidates_by_flow_instance_ids(tx.as_mut(), &[flow.id])
            .await?
            .remove(&flow.id)
            .unwrap_or_default()
            .into_iter()
            .collect();
        candidates.sort_by_key(|user| user.id);
        let task_id = target_task_ids(&nodes).into_iter().next();
        Ok(FlowInstanceDetail {
            flow,
            nodes,
            candidates,
            task_id,
        })
    }

    pub async fn get_task_by_flow_instance_id(&self, flow_instance_id: i64) -> FlowResult<TaskEntity> {
        let mut tx = self.components.store.begin().await?;
        target_task(tx.as_mut(), flow_instance_id).await
    }

    pub async fn get_meta_info(&self, ctx: &RequestContext) -> FlowResult<FlowMetaInfo> {
        let mut tx = self.components.store.begin().await?;
        let pending = self
            .resolver
            .approvable_approval_nodes(tx.as_mut(), &ctx.user)
            .await?;
        Ok(FlowMetaInfo {
            pending_approval_count: pending.len(),
        })
    }

    pub async fn list_unfinished(&self, ctx: &RequestContext) -> FlowResult<Vec<FlowInstance>> {
        let filter = FlowInstanceFilter {
            organization_id: Some(ctx.organization_id()),
            creator_id: Some(ctx.user_id()),
            statuses: FlowStatus::all()
                .iter()
                .copied()
                .filter(FlowStatus::is_active)
                .collect(),
            ..FlowInstanceFilter::default()
        };
        let mut tx = self.components.store.begin().await?;
        tx.list_flow_instances(&filter).await
    }

    /// Cancel the flows whose tasks run on this node; used before the node
    /// exits. Returns the flows that were cancelled.
    pub async fn cancel_active_on_shutdown(&self) -> Vec<i64> {
        let mut cancelled = Vec::new();
        for flow_instance_id in self.components.active.flow_instance_ids() {
            match self.cancel_here(flow_instance_id).await {
                Ok(true) => cancelled.push(flow_instance_id),
                Ok(false) => {}
                Err(e) => {
                    log_error(
                        "FlowInstanceService",
                        "cancel_active_on_shutdown",
                        &e.to_string(),
                        Some(&format!("flow_instance_id={flow_instance_id}")),
                    );
                }
            }
        }
        if !cancelled.is_empty() {
            info!(flows = cancelled.len(), "🛑 Cancelled running flows before shutdown");
        }
        cancelled
    }

    async fn cancel_here(&self, flow_instance_id: i64) -> FlowResult<bool> {
        let mut tx = self.components.store.begin().await?;
        let flow = find_flow(tx.as_mut(), flow_instance_id).await?;
        if flow.status.is_terminal() {
            return Ok(false);
        }
        self.components.lifecycle.cancel_flow(tx.as_mut(), &flow).await?;
        tx.commit().await?;
        self.components.active.cancel(flow_instance_id);
        self.components
            .publisher
            .publish(FlowEvent::FlowCancelled { flow_instance_id });
        Ok(true)
    }

    async fn reload(&self, flow_instance_id: i64) -> FlowResult<FlowInstance> {
        let mut tx = self.components.store.begin().await?;
        find_flow(tx.as_mut(), flow_instance_id).await
    }
}

pub(crate) async fn find_flow(
    tx: &mut dyn FlowTransaction,
    flow_instance_id: i64,
) -> FlowResult<FlowInstance> {
    tx.find_flow_instance(flow_instance_id)
        .await?
        .ok_or_else(|| FlowError::not_found("FlowInstance", "id", flow_instance_id))
}

/// Flows of another organization are reported as missing
pub(crate) async fn find_visible_flow(
    tx: &mut dyn FlowTransaction,
    ctx: &RequestContext,
    flow_instance_id: i64,
) -> FlowResult<FlowInstance> {
    let flow = find_flow(tx, flow_instance_id).await?;
    if flow.organization_id != ctx.organization_id() {
        return Err(FlowError::not_found("FlowInstance", "id", flow_instance_id));
    }
    Ok(flow)
}

/// Distinct target tasks of the non-auxiliary task nodes
fn target_task_ids(nodes: &[NodeInstance]) -> Vec<i64> {
    nodes
        .iter()
        .filter_map(NodeInstance::as_task)
        .filter(|node| !node.task_type.is_auxiliary())
        .filter_map(|node| node.target_task_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// The single target task a flow works on
pub(crate) async fn target_task(
    tx: &mut dyn FlowTransaction,
    flow_instance_id: i64,
) -> FlowResult<TaskEntity> {
    let nodes = tx.list_nodes(flow_instance_id).await?;
    let task_id = verify_singleton(
        target_task_ids(&nodes),
        &format!("Target task of flow instance {flow_instance_id}"),
    )?;
    tx.find_task(task_id)
        .await?
        .ok_or_else(|| FlowError::not_found("Task", "id", task_id))
}
