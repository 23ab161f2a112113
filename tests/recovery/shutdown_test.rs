use anyhow::Result;

use flowgate_core::state_machine::FlowStatus;

use crate::common::*;

#[tokio::test]
async fn test_shutdown_cancels_flows_running_here() -> Result<()> {
    let cluster = ClusterBuilder::new(2)
        .with_registry(registry_with(BlockingExecutor::default()))
        .build()
        .await?;

    let running = cluster
        .node(0)
        .flows()
        .create_without_approval(&creator(), async_change("update orders set a = 1"))
        .await?;
    cluster.wait_for_running_task(running.id).await?;

    let mut cluster = cluster;
    let mut stopped = cluster.nodes.remove(0);
    stopped.shutdown().await;

    assert_eq!(
        cluster.node(0).flows().get_status(&creator(), running.id).await?,
        FlowStatus::Cancelled
    );

    cluster.shutdown().await;
    Ok(())
}
