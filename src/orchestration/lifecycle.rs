//! # Flow Lifecycle
//!
//! The binding points between process runs and node instances. Every engine
//! event that parks a run on a task or approval moves the matching node,
//! every decision or task outcome advances the run, and the flow status is
//! re-projected from its nodes after each step.
//!
//! All methods work inside the caller's transaction and never commit. Jobs
//! returned to the caller must only be submitted after the commit.

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::approval::ExternalApprovalClient;
use crate::constants::variables;
use crate::engine::{EngineEvent, ProcessEngine, ProcessEngineAdapter, Variables};
use crate::error::{verify, FlowError, FlowResult};
use crate::execution::TaskJob;
use crate::models::{
    ApprovalNode, ElementKind, ExecutionStrategy, FlowInstance, NodeInstance, NodeKind, TaskNode,
    TaskStatus,
};
use crate::state_machine::projection::active_nodes;
use crate::state_machine::{
    project_flow_status, project_running_status, transition, FlowNodeStatus, FlowStatus,
    NodeEvent,
};
use crate::store::FlowTransaction;

#[derive(Clone)]
pub struct FlowLifecycle {
    engine: Arc<dyn ProcessEngine>,
    adapter: ProcessEngineAdapter,
    external: Arc<dyn ExternalApprovalClient>,
}

impl std::fmt::Debug for FlowLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowLifecycle")
            .field("engine", &self.engine)
            .field("external", &self.external)
            .finish()
    }
}

impl FlowLifecycle {
    pub fn new(
        engine: Arc<dyn ProcessEngine>,
        external: Arc<dyn ExternalApprovalClient>,
    ) -> Self {
        Self {
            engine,
            adapter: ProcessEngineAdapter::new(),
            external,
        }
    }

    pub fn engine(&self) -> &Arc<dyn ProcessEngine> {
        &self.engine
    }

    pub fn adapter(&self) -> &ProcessEngineAdapter {
        &self.adapter
    }

    /// Apply engine events to the flow's nodes; returns the task jobs that
    /// became ready
    pub async fn apply(
        &self,
        tx: &mut dyn FlowTransaction,
        flow: &FlowInstance,
        process_instance_id: &str,
        events: Vec<EngineEvent>,
    ) -> FlowResult<Vec<TaskJob>> {
        let mut queue: VecDeque<EngineEvent> = events.into();
        let mut jobs = Vec::new();

        while let Some(event) = queue.pop_front() {
            let activity_id = match event {
                EngineEvent::ActivityStarted { activity_id, .. } => activity_id,
                EngineEvent::ProcessEnded { end_activity_id } => {
                    debug!(
                        flow_instance_id = flow.id,
                        end_activity_id = %end_activity_id,
                        "Process run ended"
                    );
                    continue;
                }
                _ => continue,
            };

            let mut node = self
                .adapter
                .node_by_activity_id(tx, flow.id, &activity_id)
                .await?;
            match node.kind() {
                NodeKind::ServiceTask => {
                    let auto = node
                        .as_task()
                        .map(|task| task.strategy == ExecutionStrategy::Auto)
                        .unwrap_or(false);
                    transition(&mut node, &NodeEvent::Enter)?;
                    if auto {
                        transition(&mut node, &NodeEvent::Start)?;
                    }
                    save(tx, &node).await?;
                    if let (true, Some(task)) = (auto, node.as_task()) {
                        jobs.push(job_for(flow, process_instance_id, task, &activity_id)?);
                    }
                }
                NodeKind::ApprovalTask => {
                    transition(&mut node, &NodeEvent::Start)?;
                    let Some(approval) = node.into_approval() else {
                        continue;
                    };
                    if approval.auto_approve {
                        let mut node = NodeInstance::Approval(approval);
                        transition(&mut node, &NodeEvent::Approve)?;
                        save(tx, &node).await?;
                        info!(
                            flow_instance_id = flow.id,
                            node_id = node.id(),
                            "✅ Approval node auto-approved"
                        );
                        let more = self
                            .engine
                            .complete(
                                tx,
                                process_instance_id,
                                &activity_id,
                                Variables::new().with(variables::APPROVED, true),
                            )
                            .await?;
                        queue.extend(more);
                    } else {
                        let approval = self.open_external(tx, flow, process_instance_id, approval).await?;
                        save(tx, &NodeInstance::Approval(approval)).await?;
                    }
                }
                NodeKind::Gateway => {
                    return Err(FlowError::consistency(format!(
                        "Gateway activity {activity_id} reported as a wait state"
                    )));
                }
            }
        }

        self.sync_flow_status(tx, flow.id).await?;
        Ok(jobs)
    }

    async fn open_external(
        &self,
        tx: &mut dyn FlowTransaction,
        flow: &FlowInstance,
        process_instance_id: &str,
        mut approval: ApprovalNode,
    ) -> FlowResult<ApprovalNode> {
        let Some(external_approval_id) = approval.external_approval_id else {
            return Ok(approval);
        };
        let variables = self.engine.variables(tx, process_instance_id).await?;
        match self
            .external
            .create(external_approval_id, flow.id, &variables)
            .await
        {
            Ok(correlation) => approval.external_flow_instance_id = correlation,
            Err(e) => warn!(
                flow_instance_id = flow.id,
                external_approval_id = external_approval_id,
                error = %e,
                "Opening external approval failed"
            ),
        }
        Ok(approval)
    }

    /// Best-effort cancellation of an approval's external counterpart
    pub async fn cancel_external(&self, approval: &ApprovalNode) {
        if let (Some(id), Some(correlation)) = (
            approval.external_approval_id,
            approval.external_flow_instance_id.as_deref(),
        ) {
            if let Err(e) = self.external.cancel(id, correlation).await {
                warn!(
                    flow_instance_id = approval.flow_instance_id,
                    external_approval_id = id,
                    error = %e,
                    "Cancelling external approval failed"
                );
            }
        }
    }

    /// Record an approval decision and advance the run
    ///
    /// A rejection routes the run down the disapproval edge, which ends it.
    pub async fn complete_approval(
        &self,
        tx: &mut dyn FlowTransaction,
        flow: &FlowInstance,
        mut approval: ApprovalNode,
        approved: bool,
        operator_id: Option<i64>,
        comment: Option<String>,
    ) -> FlowResult<Vec<TaskJob>> {
        approval.operator_id = operator_id;
        approval.comment = comment;
        let mut node = NodeInstance::Approval(approval);
        let event = if approved {
            NodeEvent::Approve
        } else {
            NodeEvent::Reject
        };
        transition(&mut node, &event)?;
        save(tx, &node).await?;

        let process_instance_id = self.adapter.require_process_instance_id(tx, flow.id).await?;
        let activity_id = self
            .adapter
            .activity_id(tx, flow.id, node.id(), NodeKind::ApprovalTask, ElementKind::UserTask)
            .await?;
        let events = self
            .engine
            .complete(
                tx,
                &process_instance_id,
                &activity_id,
                Variables::new().with(variables::APPROVED, approved),
            )
            .await?;
        self.apply(tx, flow, &process_instance_id, events).await
    }

    /// Move a task node out of EXECUTING and advance or end the run
    pub async fn finish_task(
        &self,
        tx: &mut dyn FlowTransaction,
        job: &TaskJob,
        node: TaskNode,
        event: NodeEvent,
        output: Variables,
    ) -> FlowResult<Vec<TaskJob>> {
        let flow = tx
            .find_flow_instance(job.flow_instance_id)
            .await?
            .ok_or_else(|| FlowError::not_found("FlowInstance", "id", job.flow_instance_id))?;

        let mut node = NodeInstance::Task(node);
        let status = transition(&mut node, &event)?;
        save(tx, &node).await?;

        if status == FlowNodeStatus::Completed {
            let events = self
                .engine
                .complete(tx, &job.process_instance_id, &job.activity_id, output)
                .await?;
            return self.apply(tx, &flow, &job.process_instance_id, events).await;
        }

        self.engine.terminate(tx, &job.process_instance_id).await?;
        self.sync_flow_status(tx, flow.id).await?;
        Ok(Vec::new())
    }

    /// Confirm a manual task parked in PENDING
    pub async fn confirm_task(
        &self,
        tx: &mut dyn FlowTransaction,
        flow: &FlowInstance,
        node: TaskNode,
    ) -> FlowResult<TaskJob> {
        let mut node = NodeInstance::Task(node);
        transition(&mut node, &NodeEvent::Confirm)?;
        save(tx, &node).await?;

        let process_instance_id = self.adapter.require_process_instance_id(tx, flow.id).await?;
        let activity_id = self
            .adapter
            .activity_id(tx, flow.id, node.id(), NodeKind::ServiceTask, ElementKind::ServiceTask)
            .await?;
        self.sync_flow_status(tx, flow.id).await?;

        let task = node
            .as_task()
            .ok_or_else(|| FlowError::Internal("Confirmed node is not a task".into()))?;
        job_for(flow, &process_instance_id, task, &activity_id)
    }

    /// Cancel every active node of a flow, end its run and force the flow to
    /// CANCELLED; returns the nodes that were cancelled
    pub async fn cancel_flow(
        &self,
        tx: &mut dyn FlowTransaction,
        flow: &FlowInstance,
    ) -> FlowResult<Vec<NodeInstance>> {
        let nodes = tx.list_nodes(flow.id).await?;
        let mut cancelled = Vec::new();
        let mut task_ids = Vec::new();

        for mut node in nodes.into_iter().filter(NodeInstance::is_active) {
            transition(&mut node, &NodeEvent::Cancel)?;
            save(tx, &node).await?;
            match &node {
                NodeInstance::Task(task) => task_ids.extend(task.target_task_id),
                NodeInstance::Approval(approval) => self.cancel_external(approval).await,
                NodeInstance::Gateway(_) => {}
            }
            cancelled.push(node);
        }

        if !task_ids.is_empty() {
            let running: Vec<i64> = tx
                .find_tasks(&task_ids)
                .await?
                .into_iter()
                .filter(|task| !task.status.is_terminal())
                .map(|task| task.id)
                .collect();
            if !running.is_empty() {
                tx.update_task_statuses(&running, TaskStatus::Canceled).await?;
            }
        }

        if let Some(process_instance_id) = flow.process_instance_id.as_deref() {
            self.engine.terminate(tx, process_instance_id).await?;
        }
        self.force_status(tx, flow.id, FlowStatus::Cancelled).await?;
        Ok(cancelled)
    }

    /// Re-project the flow status from its nodes
    ///
    /// A terminal flow is never changed; more than one active node is a
    /// consistency violation.
    pub async fn sync_flow_status(
        &self,
        tx: &mut dyn FlowTransaction,
        flow_instance_id: i64,
    ) -> FlowResult<FlowStatus> {
        let flow = tx
            .find_flow_instance(flow_instance_id)
            .await?
            .ok_or_else(|| FlowError::not_found("FlowInstance", "id", flow_instance_id))?;
        if flow.status.is_terminal() {
            return Ok(flow.status);
        }

        let nodes = tx.list_nodes(flow_instance_id).await?;
        let active = active_nodes(&nodes).len();
        verify(
            active <= 1,
            format!("Flow instance {flow_instance_id} has {active} current nodes"),
        )?;

        let status = project_flow_status(&nodes)
            .or_else(|| project_running_status(&nodes))
            .unwrap_or(flow.status);
        if status != flow.status {
            self.force_status(tx, flow_instance_id, status).await?;
            debug!(
                flow_instance_id = flow_instance_id,
                from = %flow.status,
                to = %status,
                "Flow status projected"
            );
        }
        Ok(status)
    }

    /// Overwrite the flow status without consulting its nodes
    pub async fn force_status(
        &self,
        tx: &mut dyn FlowTransaction,
        flow_instance_id: i64,
        status: FlowStatus,
    ) -> FlowResult<()> {
        let affected = tx.update_flow_status(flow_instance_id, status).await?;
        verify(
            affected == 1,
            format!("Updating status of flow {flow_instance_id} affected {affected} rows"),
        )
    }

    /// Like `force_status`, but a flow that already finished keeps its
    /// status. Returns whether the flow was changed.
    pub async fn force_unfinished_status(
        &self,
        tx: &mut dyn FlowTransaction,
        flow_instance_id: i64,
        status: FlowStatus,
    ) -> FlowResult<bool> {
        let affected = tx
            .update_unfinished_flow_status(flow_instance_id, status)
            .await?;
        if affected == 0 {
            debug!(
                flow_instance_id = flow_instance_id,
                status = %status,
                "Flow already finished, status left alone"
            );
        }
        Ok(affected == 1)
    }
}

async fn save(tx: &mut dyn FlowTransaction, node: &NodeInstance) -> FlowResult<()> {
    let affected = tx.update_node(node).await?;
    verify(
        affected == 1,
        format!("Updating node {} affected {affected} rows", node.id()),
    )
}

fn job_for(
    flow: &FlowInstance,
    process_instance_id: &str,
    node: &TaskNode,
    activity_id: &str,
) -> FlowResult<TaskJob> {
    let task_id = node.target_task_id.ok_or_else(|| {
        FlowError::consistency(format!("Task node {} has no target task", node.id))
    })?;
    Ok(TaskJob {
        flow_instance_id: flow.id,
        flow_task_type: flow.task_type,
        node_id: node.id,
        task_type: node.task_type,
        task_id,
        process_instance_id: process_instance_id.to_string(),
        activity_id: activity_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::NoopExternalApprovalClient;
    use crate::engine::GraphProcessEngine;
    use crate::models::{NewFlowInstance, TaskType};
    use crate::store::{FlowStore, InMemoryFlowStore};
    use crate::topology::{materialize, TopologyBuilder, TopologyPlan};

    fn lifecycle() -> FlowLifecycle {
        FlowLifecycle::new(
            Arc::new(GraphProcessEngine::new()),
            Arc::new(NoopExternalApprovalClient),
        )
    }

    async fn started_flow(
        tx: &mut dyn FlowTransaction,
        lifecycle: &FlowLifecycle,
        strategy: ExecutionStrategy,
    ) -> (FlowInstance, Vec<TaskJob>) {
        let flow = tx
            .insert_flow_instance(NewFlowInstance {
                name: "flow".into(),
                task_type: TaskType::Async,
                creator_id: 1,
                organization_id: 1,
                project_id: None,
                parent_instance_id: None,
                description: None,
            })
            .await
            .unwrap();
        let mut plan = TopologyPlan::new(TaskType::Async, 10);
        plan.strategy = strategy;
        let graph = TopologyBuilder::without_approval(&plan).unwrap();
        let materialized = materialize(
            tx,
            &flow,
            &graph,
            lifecycle.engine().as_ref(),
            lifecycle.adapter(),
        )
        .await
        .unwrap();
        let started = lifecycle
            .engine()
            .start(tx, &materialized.process_definition_id, Variables::new())
            .await
            .unwrap();
        lifecycle
            .adapter()
            .set_process_instance_id(tx, flow.id, &started.process_instance_id)
            .await
            .unwrap();
        let flow = tx.find_flow_instance(flow.id).await.unwrap().unwrap();
        let jobs = lifecycle
            .apply(tx, &flow, &started.process_instance_id, started.events)
            .await
            .unwrap();
        (flow, jobs)
    }

    #[tokio::test]
    async fn test_auto_task_runs_to_completion() {
        let store = InMemoryFlowStore::new();
        let lifecycle = lifecycle();
        let mut tx = store.begin().await.unwrap();

        let (flow, jobs) = started_flow(tx.as_mut(), &lifecycle, ExecutionStrategy::Auto).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].task_id, 10);
        assert_eq!(
            tx.find_flow_instance(flow.id).await.unwrap().unwrap().status,
            FlowStatus::Executing
        );

        let node = tx
            .find_node(NodeKind::ServiceTask, jobs[0].node_id)
            .await
            .unwrap()
            .and_then(NodeInstance::into_task)
            .unwrap();
        let next = lifecycle
            .finish_task(tx.as_mut(), &jobs[0], node, NodeEvent::Complete, Variables::new())
            .await
            .unwrap();
        assert!(next.is_empty());
        assert_eq!(
            tx.find_flow_instance(flow.id).await.unwrap().unwrap().status,
            FlowStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_manual_task_waits_for_confirmation() {
        let store = InMemoryFlowStore::new();
        let lifecycle = lifecycle();
        let mut tx = store.begin().await.unwrap();

        let (flow, jobs) = started_flow(tx.as_mut(), &lifecycle, ExecutionStrategy::Manual).await;
        assert!(jobs.is_empty());
        let flow = tx.find_flow_instance(flow.id).await.unwrap().unwrap();
        assert_eq!(flow.status, FlowStatus::WaitForExecution);

        let node = tx
            .list_nodes(flow.id)
            .await
            .unwrap()
            .into_iter()
            .find_map(NodeInstance::into_task)
            .unwrap();
        assert_eq!(node.status, FlowNodeStatus::Pending);
        let job = lifecycle.confirm_task(tx.as_mut(), &flow, node).await.unwrap();
        assert_eq!(job.flow_instance_id, flow.id);
        assert_eq!(
            tx.find_flow_instance(flow.id).await.unwrap().unwrap().status,
            FlowStatus::Executing
        );
    }

    #[tokio::test]
    async fn test_failed_task_fails_flow_and_terminal_flow_is_kept() {
        let store = InMemoryFlowStore::new();
        let lifecycle = lifecycle();
        let mut tx = store.begin().await.unwrap();

        let (flow, jobs) = started_flow(tx.as_mut(), &lifecycle, ExecutionStrategy::Auto).await;
        let node = tx
            .find_node(NodeKind::ServiceTask, jobs[0].node_id)
            .await
            .unwrap()
            .and_then(NodeInstance::into_task)
            .unwrap();
        lifecycle
            .finish_task(
                tx.as_mut(),
                &jobs[0],
                node,
                NodeEvent::Fail("boom".into()),
                Variables::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            tx.find_flow_instance(flow.id).await.unwrap().unwrap().status,
            FlowStatus::ExecutionFailed
        );

        lifecycle
            .force_status(tx.as_mut(), flow.id, FlowStatus::Cancelled)
            .await
            .unwrap();
        let status = lifecycle.sync_flow_status(tx.as_mut(), flow.id).await.unwrap();
        assert_eq!(status, FlowStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_flow_cancels_active_node() {
        let store = InMemoryFlowStore::new();
        let lifecycle = lifecycle();
        let mut tx = store.begin().await.unwrap();

        let (flow, _) = started_flow(tx.as_mut(), &lifecycle, ExecutionStrategy::Manual).await;
        let flow = tx.find_flow_instance(flow.id).await.unwrap().unwrap();
        let cancelled = lifecycle.cancel_flow(tx.as_mut(), &flow).await.unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].status(), Some(FlowNodeStatus::Cancelled));
        assert_eq!(
            tx.find_flow_instance(flow.id).await.unwrap().unwrap().status,
            FlowStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_forced_cancel_leaves_a_completed_flow_alone() {
        let store = InMemoryFlowStore::new();
        let lifecycle = lifecycle();
        let mut tx = store.begin().await.unwrap();

        let (flow, jobs) = started_flow(tx.as_mut(), &lifecycle, ExecutionStrategy::Auto).await;
        let node = tx
            .find_node(NodeKind::ServiceTask, jobs[0].node_id)
            .await
            .unwrap()
            .and_then(NodeInstance::into_task)
            .unwrap();
        lifecycle
            .finish_task(tx.as_mut(), &jobs[0], node, NodeEvent::Complete, Variables::new())
            .await
            .unwrap();

        let forced = lifecycle
            .force_unfinished_status(tx.as_mut(), flow.id, FlowStatus::Cancelled)
            .await
            .unwrap();
        assert!(!forced);
        assert_eq!(
            tx.find_flow_instance(flow.id).await.unwrap().unwrap().status,
            FlowStatus::Completed
        );

        let running = tx
            .insert_flow_instance(NewFlowInstance {
                name: "running".into(),
                task_type: TaskType::Async,
                creator_id: 1,
                organization_id: 1,
                project_id: None,
                parent_instance_id: None,
                description: None,
            })
            .await
            .unwrap();
        assert!(lifecycle
            .force_unfinished_status(tx.as_mut(), running.id, FlowStatus::Cancelled)
            .await
            .unwrap());
        assert_eq!(
            tx.find_flow_instance(running.id).await.unwrap().unwrap().status,
            FlowStatus::Cancelled
        );
    }
}
