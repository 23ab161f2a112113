use anyhow::Result;
use chrono::Utc;

use flowgate_core::models::NodeInstance;
use flowgate_core::state_machine::{FlowNodeStatus, FlowStatus};

use crate::common::*;

#[tokio::test]
async fn test_undecided_approval_waits_for_confirmation() -> Result<()> {
    let cluster = ClusterBuilder::new(1).with_approval().build().await?;
    let node = cluster.node(0);

    let flow = node.flows().create(&creator(), async_change("select 1")).await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;

    // Inside the window nothing expires
    assert!(node.expiration_scanner().expire_once(Utc::now()).await?.is_empty());

    let later = Utc::now() + chrono::Duration::hours(2);
    let expired = node.expiration_scanner().expire_once(later).await?;
    assert_eq!(expired, vec![flow.id]);
    assert_eq!(
        node.flows().get_status(&creator(), flow.id).await?,
        FlowStatus::WaitForConfirm
    );
    let approval = cluster
        .nodes_of(flow.id)
        .await?
        .into_iter()
        .find_map(NodeInstance::into_approval)
        .expect("approval node");
    assert_eq!(approval.status, FlowNodeStatus::WaitForConfirm);

    // An expired approval expires once
    assert!(node.expiration_scanner().expire_once(later).await?.is_empty());

    // and can still be decided
    node.flows().approve(&approver(), flow.id, None, false).await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Completed).await?;

    cluster.shutdown().await;
    Ok(())
}
