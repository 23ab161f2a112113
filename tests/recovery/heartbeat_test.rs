use anyhow::Result;
use chrono::Utc;

use flowgate_core::models::{NodeInstance, TaskStatus};
use flowgate_core::state_machine::{FlowNodeStatus, FlowStatus};
use flowgate_core::store::FlowStore;

use crate::common::*;

#[tokio::test]
async fn test_stale_heartbeat_fails_the_flow() -> Result<()> {
    let blocking = BlockingExecutor::default();
    let cluster = ClusterBuilder::new(1)
        .with_registry(registry_with(blocking.clone()))
        .build()
        .await?;
    let node = cluster.node(0);

    let flow = node
        .flows()
        .create_without_approval(&creator(), async_change("update orders set a = 1"))
        .await?;
    let mut task = cluster.wait_for_running_task(flow.id).await?;

    // A fresh heartbeat is left alone
    let report = node.heartbeat_scheduler().recover_once().await?;
    assert!(report.is_empty());

    // Simulate the executing node going silent
    let silent_since = Utc::now() - chrono::Duration::hours(1);
    task.last_heartbeat_at = Some(silent_since);
    task.updated_at = silent_since;
    let mut tx = cluster.store.begin().await?;
    tx.update_task(&task).await?;
    tx.commit().await?;

    let report = node
        .heartbeat_scheduler()
        .tick()
        .await
        .expect("recovery pass succeeds");
    assert_eq!(report.flow_instance_ids, vec![flow.id]);
    assert_eq!(report.task_ids, vec![task.id]);

    assert_eq!(
        node.flows().get_status(&creator(), flow.id).await?,
        FlowStatus::ExecutionFailed
    );
    assert_eq!(cluster.target_task(flow.id).await?.status, TaskStatus::Failed);
    let failed = cluster
        .nodes_of(flow.id)
        .await?
        .into_iter()
        .filter_map(NodeInstance::into_task)
        .filter(|n| n.status == FlowNodeStatus::Failed)
        .count();
    assert_eq!(failed, 1);

    // A late finish from the silent executor changes nothing
    blocking.release();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(
        node.flows().get_status(&creator(), flow.id).await?,
        FlowStatus::ExecutionFailed
    );

    // Nothing is left to recover
    assert!(node.heartbeat_scheduler().recover_once().await?.is_empty());

    cluster.shutdown().await;
    Ok(())
}
