//! # Heartbeat Recovery Scheduler
//!
//! Background service that fails flows whose executing task stopped sending
//! heartbeats, typically because the node running it crashed.
//!
//! ## Recovery Pass
//!
//! 1. Find task nodes in EXECUTING status that point at a target task
//! 2. Fetch the target tasks whose last heartbeat is older than the timeout,
//!    in IN-clause sized batches
//! 3. In one transaction, mark those nodes FAILED, their flows
//!    EXECUTION_FAILED and the target tasks FAILED, batching writes the same
//!    way
//!
//! A failed pass is rolled back as a whole and retried a bounded number of
//! times within the same tick; anything left over is picked up on the next
//! tick.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::HeartbeatConfig;
use crate::error::FlowResult;
use crate::logging::log_error;
use crate::models::{NodeKind, TaskStatus};
use crate::state_machine::{FlowNodeStatus, FlowStatus};
use crate::store::{chunked, FlowStore};

/// What one recovery pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub flow_instance_ids: Vec<i64>,
    pub node_ids: Vec<i64>,
    pub task_ids: Vec<i64>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.flow_instance_ids.is_empty()
    }
}

#[derive(Clone)]
pub struct HeartbeatRecoveryScheduler {
    store: Arc<dyn FlowStore>,
    config: HeartbeatConfig,
}

// Manual Debug implementation because the store is a trait object
impl std::fmt::Debug for HeartbeatRecoveryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatRecoveryScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HeartbeatRecoveryScheduler {
    #[must_use]
    pub fn new(store: Arc<dyn FlowStore>, config: HeartbeatConfig) -> Self {
        Self { store, config }
    }

    /// Run recovery passes until the task is aborted
    ///
    /// The scan interval never drops below three heartbeat intervals.
    pub async fn run(&self) {
        let scan_interval = self.config.effective_scan_interval();
        let mut timer = interval(scan_interval);

        info!(
            scan_interval_secs = scan_interval.as_secs(),
            timeout_secs = self.config.timeout_secs,
            max_in_clause_size = self.config.max_in_clause_size,
            "💓 Starting heartbeat recovery scheduler"
        );

        loop {
            timer.tick().await;
            self.tick().await;
        }
    }

    /// One tick: a recovery pass with bounded retries
    pub async fn tick(&self) -> Option<RecoveryReport> {
        let attempts = self.config.attempts_per_tick.max(1);
        for attempt in 1..=attempts {
            match self.recover_once().await {
                Ok(report) => {
                    if report.is_empty() {
                        debug!("No stale tasks detected this cycle");
                    } else {
                        info!(
                            flows = report.flow_instance_ids.len(),
                            nodes = report.node_ids.len(),
                            tasks = report.task_ids.len(),
                            "Failed flows with stale task heartbeats"
                        );
                    }
                    return Some(report);
                }
                Err(e) if attempt < attempts && !e.is_fatal() => {
                    warn!(attempt = attempt, error = %e, "Heartbeat recovery pass failed, retrying");
                    tokio::time::sleep(self.config.retry_backoff()).await;
                }
                Err(e) => {
                    error!(attempt = attempt, error = %e, "Heartbeat recovery pass failed");
                    log_error("HeartbeatRecoveryScheduler", "tick", &e.to_string(), None);
                    return None;
                }
            }
        }
        None
    }

    /// A single all-or-nothing recovery pass
    pub async fn recover_once(&self) -> FlowResult<RecoveryReport> {
        let batch = self.config.max_in_clause_size.max(1);
        let before = Utc::now()
            - chrono::Duration::from_std(self.config.timeout())
                .unwrap_or_else(|_| chrono::Duration::seconds(self.config.timeout_secs as i64));

        let mut tx = self.store.begin().await?;

        // target task id -> executing nodes pointing at it
        let mut nodes_by_task: BTreeMap<i64, Vec<(i64, i64)>> = BTreeMap::new();
        for node in tx.list_task_nodes_by_status(FlowNodeStatus::Executing).await? {
            if let Some(task_id) = node.target_task_id {
                nodes_by_task
                    .entry(task_id)
                    .or_default()
                    .push((node.id, node.flow_instance_id));
            }
        }
        if nodes_by_task.is_empty() {
            return Ok(RecoveryReport::default());
        }

        let task_ids: Vec<i64> = nodes_by_task.keys().copied().collect();
        let mut stale = BTreeSet::new();
        for ids in chunked(&task_ids, batch) {
            for task in tx.find_stale_tasks(ids, before).await? {
                stale.insert(task.id);
            }
        }
        if stale.is_empty() {
            return Ok(RecoveryReport::default());
        }

        let mut node_ids = BTreeSet::new();
        let mut flow_ids = BTreeSet::new();
        for task_id in &stale {
            for (node_id, flow_id) in nodes_by_task.get(task_id).into_iter().flatten() {
                node_ids.insert(*node_id);
                flow_ids.insert(*flow_id);
            }
        }
        let report = RecoveryReport {
            flow_instance_ids: flow_ids.into_iter().collect(),
            node_ids: node_ids.into_iter().collect(),
            task_ids: stale.into_iter().collect(),
        };

        for ids in chunked(&report.node_ids, batch) {
            tx.update_node_statuses(NodeKind::ServiceTask, ids, FlowNodeStatus::Failed)
                .await?;
        }
        for ids in chunked(&report.flow_instance_ids, batch) {
            tx.update_flow_statuses(ids, FlowStatus::ExecutionFailed).await?;
        }
        for ids in chunked(&report.task_ids, batch) {
            tx.update_task_statuses(ids, TaskStatus::Failed).await?;
        }
        tx.commit().await?;

        for flow_instance_id in &report.flow_instance_ids {
            warn!(
                flow_instance_id = *flow_instance_id,
                "💔 Flow failed after its task heartbeat went stale"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionStrategy, NewFlowInstance, NewTask, NodeInstance, TaskNode, TaskType};
    use crate::store::InMemoryFlowStore;
    use serde_json::json;

    async fn executing_flow(store: &InMemoryFlowStore, heartbeat_age_secs: i64) -> (i64, i64) {
        let mut tx = store.begin().await.unwrap();
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
        tx.update_flow_status(flow.id, FlowStatus::Executing).await.unwrap();
        let mut task = tx
            .insert_task(NewTask {
                task_type: TaskType::Async,
                creator_id: 1,
                organization_id: 1,
                project_id: None,
                connection_id: None,
                database_id: None,
                database_name: None,
                parameters: json!({}),
                submitter: None,
                execution_expiration_interval_secs: 3600,
            })
            .await
            .unwrap();
        task.status = TaskStatus::Running;
        task.last_heartbeat_at = Some(Utc::now() - chrono::Duration::seconds(heartbeat_age_secs));
        tx.update_task(&task).await.unwrap();
        let now = Utc::now();
        let node = tx
            .insert_node(NodeInstance::Task(TaskNode {
                id: 0,
                flow_instance_id: flow.id,
                status: FlowNodeStatus::Executing,
                task_type: TaskType::Async,
                target_task_id: Some(task.id),
                strategy: ExecutionStrategy::Auto,
                created_at: now,
                updated_at: now,
            }))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        (flow.id, node.id())
    }

    #[tokio::test]
    async fn test_only_stale_flows_fail() {
        let store = InMemoryFlowStore::new();
        let (stale_flow, stale_node) = executing_flow(&store, 600).await;
        let (fresh_flow, _) = executing_flow(&store, 1).await;

        let config = HeartbeatConfig {
            interval_secs: 5,
            timeout_secs: 60,
            max_in_clause_size: 1,
            ..HeartbeatConfig::default()
        };
        let scheduler = HeartbeatRecoveryScheduler::new(Arc::new(store.clone()), config);
        let report = scheduler.recover_once().await.unwrap();
        assert_eq!(report.flow_instance_ids, vec![stale_flow]);
        assert_eq!(report.node_ids, vec![stale_node]);

        let mut tx = store.begin().await.unwrap();
        let stale = tx.find_flow_instance(stale_flow).await.unwrap().unwrap();
        let fresh = tx.find_flow_instance(fresh_flow).await.unwrap().unwrap();
        assert_eq!(stale.status, FlowStatus::ExecutionFailed);
        assert_eq!(fresh.status, FlowStatus::Executing);
        drop(tx);

        let again = scheduler.recover_once().await.unwrap();
        assert!(again.is_empty());
    }
}
