//! Periodic scan that moves approvals left undecided past their window to
//! WAIT_FOR_CONFIRM. Approvers can still decide them afterwards.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::interval;
use tracing::{debug, error, info};

use super::lifecycle::FlowLifecycle;
use crate::config::ExpirationConfig;
use crate::error::{verify, FlowResult};
use crate::models::NodeInstance;
use crate::state_machine::{transition, FlowNodeStatus, NodeEvent};
use crate::store::FlowStore;

#[derive(Clone)]
pub struct ApprovalExpirationScanner {
    store: Arc<dyn FlowStore>,
    lifecycle: FlowLifecycle,
    config: ExpirationConfig,
}

impl std::fmt::Debug for ApprovalExpirationScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalExpirationScanner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ApprovalExpirationScanner {
    pub fn new(store: Arc<dyn FlowStore>, lifecycle: FlowLifecycle, config: ExpirationConfig) -> Self {
        Self {
            store,
            lifecycle,
            config,
        }
    }

    pub async fn run(&self) {
        let mut timer = interval(self.config.scan_interval());
        info!(
            scan_interval_secs = self.config.scan_interval().as_secs(),
            "⏰ Starting approval expiration scanner"
        );
        loop {
            timer.tick().await;
            if let Err(e) = self.expire_once(Utc::now()).await {
                error!(error = %e, "Approval expiration scan failed");
            }
        }
    }

    /// Expire every approval whose window elapsed by `now`; returns the
    /// affected flow instance ids
    pub async fn expire_once(&self, now: DateTime<Utc>) -> FlowResult<Vec<i64>> {
        let mut tx = self.store.begin().await?;
        let expired: Vec<_> = tx
            .list_approval_nodes_by_status(&[FlowNodeStatus::Executing])
            .await?
            .into_iter()
            .filter(|approval| approval.is_expired_at(now))
            .collect();
        if expired.is_empty() {
            debug!("No expired approvals this cycle");
            return Ok(Vec::new());
        }

        let mut flow_ids = Vec::with_capacity(expired.len());
        for approval in expired {
            let flow_instance_id = approval.flow_instance_id;
            let mut node = NodeInstance::Approval(approval);
            transition(&mut node, &NodeEvent::Timeout)?;
            let affected = tx.update_node(&node).await?;
            verify(affected == 1, format!("Expiring approval {} affected {affected} rows", node.id()))?;
            self.lifecycle
                .sync_flow_status(tx.as_mut(), flow_instance_id)
                .await?;
            flow_ids.push(flow_instance_id);
        }
        tx.commit().await?;

        info!(flows = flow_ids.len(), "Approvals expired to WAIT_FOR_CONFIRM");
        Ok(flow_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::NoopExternalApprovalClient;
    use crate::engine::GraphProcessEngine;
    use crate::models::{ApprovalNode, NewFlowInstance, TaskType};
    use crate::state_machine::FlowStatus;
    use crate::store::InMemoryFlowStore;

    #[tokio::test]
    async fn test_elapsed_approval_waits_for_confirm() {
        let store = InMemoryFlowStore::new();
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
        tx.update_flow_status(flow.id, FlowStatus::Approving).await.unwrap();
        let now = Utc::now();
        tx.insert_node(NodeInstance::Approval(ApprovalNode {
            id: 0,
            flow_instance_id: flow.id,
            status: FlowNodeStatus::Executing,
            auto_approve: false,
            expire_interval_secs: Some(60),
            external_approval_id: None,
            external_flow_instance_id: None,
            operator_id: None,
            comment: None,
            entered_at: Some(now - chrono::Duration::seconds(120)),
            created_at: now,
            updated_at: now,
        }))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let scanner = ApprovalExpirationScanner::new(
            Arc::new(store.clone()),
            FlowLifecycle::new(
                Arc::new(GraphProcessEngine::new()),
                Arc::new(NoopExternalApprovalClient),
            ),
            ExpirationConfig::default(),
        );
        assert_eq!(scanner.expire_once(now).await.unwrap(), vec![flow.id]);
        assert!(scanner.expire_once(now).await.unwrap().is_empty());

        let mut tx = store.begin().await.unwrap();
        let flow = tx.find_flow_instance(flow.id).await.unwrap().unwrap();
        assert_eq!(flow.status, FlowStatus::WaitForConfirm);
    }
}
