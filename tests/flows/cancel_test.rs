use anyhow::{bail, Result};
use std::time::Duration;

use flowgate_core::error::FlowError;
use flowgate_core::models::NodeInstance;
use flowgate_core::state_machine::{FlowNodeStatus, FlowStatus};

use crate::common::*;

#[tokio::test]
async fn test_cancel_pending_approval_is_idempotent() -> Result<()> {
    let cluster = ClusterBuilder::new(1).with_approval().build().await?;
    let flows = cluster.node(0).flows();

    let flow = flows.create(&creator(), async_change("select 1")).await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;

    let cancelled = flows.cancel(&creator(), flow.id, false).await?;
    assert_eq!(cancelled.status, FlowStatus::Cancelled);
    let approval = cluster
        .nodes_of(flow.id)
        .await?
        .into_iter()
        .find_map(NodeInstance::into_approval)
        .expect("approval node");
    assert_eq!(approval.status, FlowNodeStatus::Cancelled);

    let again = flows.cancel(&creator(), flow.id, false).await?;
    assert_eq!(again.status, FlowStatus::Cancelled);
    assert_eq!(again.updated_at, cancelled.updated_at);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_only_the_creator_cancels_without_skip_auth() -> Result<()> {
    let cluster = ClusterBuilder::new(1).with_approval().build().await?;
    let flows = cluster.node(0).flows();

    let flow = flows.create(&creator(), async_change("select 1")).await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;

    let denied = flows.cancel(&approver(), flow.id, false).await;
    assert!(matches!(denied, Err(FlowError::AccessDenied(_))), "{denied:?}");

    let hidden = flows.cancel(&foreigner(), flow.id, true).await;
    assert!(matches!(hidden, Err(FlowError::NotFound { .. })), "{hidden:?}");

    let cancelled = flows.cancel(&approver(), flow.id, true).await?;
    assert_eq!(cancelled.status, FlowStatus::Cancelled);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_completed_flow_cannot_be_cancelled() -> Result<()> {
    let cluster = ClusterBuilder::new(1).build().await?;
    let flows = cluster.node(0).flows();

    let flow = flows
        .create_without_approval(&creator(), async_change("select 1"))
        .await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Completed).await?;

    let result = flows.cancel(&creator(), flow.id, false).await;
    assert!(
        matches!(result, Err(FlowError::FinishedTaskNotTerminable(id)) if id == flow.id),
        "{result:?}"
    );

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_stops_a_task_running_on_this_node() -> Result<()> {
    let blocking = BlockingExecutor::default();
    let cluster = ClusterBuilder::new(1)
        .with_registry(registry_with(blocking.clone()))
        .build()
        .await?;
    let node = cluster.node(0);

    let flow = node
        .flows()
        .create_without_approval(&creator(), async_change("alter table orders add c int"))
        .await?;
    cluster.wait_for_running_task(flow.id).await?;
    assert!(node.active_tasks().contains(flow.id));

    let cancelled = node.flows().cancel(&creator(), flow.id, false).await?;
    assert_eq!(cancelled.status, FlowStatus::Cancelled);

    let task_node = cluster
        .nodes_of(flow.id)
        .await?
        .into_iter()
        .filter_map(NodeInstance::into_task)
        .find(|task| task.target_task_id.is_some())
        .expect("task node");
    assert_eq!(task_node.status, FlowNodeStatus::Cancelled);

    // The runner observes the signal and discards the outcome
    let mut waited = Duration::ZERO;
    while node.active_tasks().contains(flow.id) {
        if waited > Duration::from_secs(5) {
            bail!("job of flow instance {} never stopped", flow.id);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    assert_eq!(
        node.flows().get_status(&creator(), flow.id).await?,
        FlowStatus::Cancelled
    );
    assert_eq!(blocking.started(), 1);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_batch_cancel_reports_each_flow_once() -> Result<()> {
    let cluster = ClusterBuilder::new(1).with_approval().build().await?;
    let flows = cluster.node(0).flows();

    let first = flows.create(&creator(), async_change("select 1")).await?;
    let second = flows.create(&creator(), async_change("select 2")).await?;
    for id in [first.id, second.id] {
        cluster.wait_for_status(0, id, FlowStatus::Approving).await?;
    }
    let missing = second.id + 1_000;

    let terminate_id = flows.start_batch_cancel(&creator(), vec![first.id, missing, second.id]);
    let mut results = Vec::new();
    for _ in 0..250 {
        results = flows.batch_cancel_result(&terminate_id)?;
        if !results.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let outcome: Vec<(i64, bool)> = results
        .iter()
        .map(|r| (r.flow_instance_id, r.succeeded))
        .collect();
    assert_eq!(outcome, vec![(first.id, true), (missing, false), (second.id, true)]);
    assert!(results[1].message.is_some());

    // Results are handed out once
    assert!(matches!(
        flows.batch_cancel_result(&terminate_id),
        Err(FlowError::NotFound { .. })
    ));
    assert!(matches!(
        flows.batch_cancel_result("no-such-batch"),
        Err(FlowError::NotFound { .. })
    ));
    for id in [first.id, second.id] {
        assert_eq!(flows.get_status(&creator(), id).await?, FlowStatus::Cancelled);
    }

    cluster.shutdown().await;
    Ok(())
}
