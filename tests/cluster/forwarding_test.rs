//! Operations on a task are served by the node that owns it, whichever node
//! the caller reached.

use anyhow::{bail, Result};
use std::time::Duration;

use flowgate_core::constants::DEFAULT_LOG_CONTENT;
use flowgate_core::error::FlowError;
use flowgate_core::execution::LogLevel;
use flowgate_core::models::NodeInstance;
use flowgate_core::state_machine::{FlowNodeStatus, FlowStatus};

use crate::common::*;

async fn wait_until_idle(cluster: &TestCluster, index: usize, flow_instance_id: i64) -> Result<()> {
    for _ in 0..250 {
        if !cluster.node(index).active_tasks().contains(flow_instance_id) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("job of flow instance {flow_instance_id} is still running on node {index}")
}

#[tokio::test]
async fn test_cancel_is_relayed_to_the_executing_node() -> Result<()> {
    let cluster = ClusterBuilder::new(2)
        .with_registry(registry_with(BlockingExecutor::default()))
        .build()
        .await?;
    let owner = cluster.info(0);

    let flow = cluster
        .node(0)
        .flows()
        .create_without_approval(&creator(), async_change("optimize table orders"))
        .await?;
    let task = cluster.wait_for_running_task(flow.id).await?;
    assert_eq!(task.executor, Some(owner.clone()));

    let cancelled = cluster.node(1).flows().cancel(&creator(), flow.id, false).await?;
    assert_eq!(cancelled.status, FlowStatus::Cancelled);
    assert_eq!(cluster.dispatcher.calls_to(&owner), 1);
    assert_eq!(cluster.dispatcher.calls_to(&cluster.info(1)), 0);

    // The owning node stopped its own job
    wait_until_idle(&cluster, 0, flow.id).await?;

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_relayed_after_the_task_finished_reports_it_finished() -> Result<()> {
    let blocking = BlockingExecutor::default();
    let cluster = ClusterBuilder::new(2)
        .with_registry(registry_with(blocking.clone()))
        .build()
        .await?;
    let owner = cluster.info(0);

    let flow = cluster
        .node(0)
        .flows()
        .create_without_approval(&creator(), async_change("optimize table orders"))
        .await?;
    cluster.wait_for_running_task(flow.id).await?;

    // The task finishes while the cancel is on its way to the owner
    let store = cluster.store.clone();
    let flow_instance_id = flow.id;
    cluster.dispatcher.before_next_forward(async move {
        blocking.release();
        TestCluster::wait_for_stored_status(store, flow_instance_id, FlowStatus::Completed)
            .await
            .expect("flow completes once released");
    });

    let result = cluster.node(1).flows().cancel(&creator(), flow.id, false).await;
    assert!(
        matches!(result, Err(FlowError::FinishedTaskNotTerminable(id)) if id == flow.id),
        "{result:?}"
    );
    assert_eq!(cluster.dispatcher.calls_to(&owner), 1);
    assert_eq!(
        cluster.node(1).flows().get_status(&creator(), flow.id).await?,
        FlowStatus::Completed
    );

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unreachable_owner_still_cancels_the_flow() -> Result<()> {
    let cluster = ClusterBuilder::new(2)
        .with_registry(registry_with(BlockingExecutor::default()))
        .build()
        .await?;
    let owner = cluster.info(0);

    let flow = cluster
        .node(0)
        .flows()
        .create_without_approval(&creator(), async_change("optimize table orders"))
        .await?;
    cluster.wait_for_running_task(flow.id).await?;
    cluster.dispatcher.disconnect(&owner);

    let cancelled = cluster.node(1).flows().cancel(&creator(), flow.id, false).await?;
    assert_eq!(cancelled.status, FlowStatus::Cancelled);
    assert_eq!(cluster.dispatcher.calls_to(&owner), 1);

    // Only the flow is forced; the node row is left as the owner last wrote it
    let task_id = cluster.target_task(flow.id).await?.id;
    let task_node = cluster
        .nodes_of(flow.id)
        .await?
        .into_iter()
        .filter_map(NodeInstance::into_task)
        .find(|node| node.target_task_id == Some(task_id))
        .expect("task node");
    assert_eq!(task_node.status, FlowNodeStatus::Executing);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_import_is_approved_on_the_submitting_node() -> Result<()> {
    let cluster = ClusterBuilder::new(2).with_approval().build().await?;
    let submitter = cluster.info(0);

    let flow = cluster
        .node(0)
        .flows()
        .create(&creator(), import_files(&["orders.csv"]))
        .await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;

    cluster
        .node(1)
        .flows()
        .approve(&approver(), flow.id, None, false)
        .await?;
    assert_eq!(cluster.dispatcher.calls_to(&submitter), 1);
    cluster.wait_for_status(1, flow.id, FlowStatus::Completed).await?;

    let task = cluster.target_task(flow.id).await?;
    assert_eq!(task.submitter, Some(submitter.clone()));
    assert_eq!(task.executor, Some(submitter));

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_import_approval_is_checked_before_relaying() -> Result<()> {
    let cluster = ClusterBuilder::new(2).with_approval().build().await?;

    let flow = cluster
        .node(0)
        .flows()
        .create(&creator(), import_files(&["orders.csv"]))
        .await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;

    let denied = cluster
        .node(1)
        .flows()
        .reject(&bystander(), flow.id, None, false)
        .await;
    assert!(matches!(denied, Err(FlowError::AccessDenied(_))), "{denied:?}");
    assert!(cluster.dispatcher.calls().is_empty());

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_logs_are_read_where_the_task_ran() -> Result<()> {
    let cluster = ClusterBuilder::new(2).build().await?;

    let flow = cluster
        .node(0)
        .flows()
        .create_without_approval(&creator(), async_change("select 1"))
        .await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Completed).await?;
    let task = cluster.target_task(flow.id).await?;

    let log = cluster
        .node(1)
        .tasks()
        .get_log(&creator(), flow.id, LogLevel::All)
        .await?;
    assert!(log.contains(&format!("echo task {}", task.id)), "{log}");

    let warnings = cluster
        .node(0)
        .tasks()
        .get_log(&creator(), flow.id, LogLevel::Warn)
        .await?;
    assert_eq!(warnings, DEFAULT_LOG_CONTENT);

    let file = cluster.node(1).tasks().download_log(&creator(), flow.id).await?;
    assert_eq!(file.file_name, format!("task_{}.log", task.id));
    assert!(String::from_utf8_lossy(&file.content).contains("echo task"));
    assert_eq!(cluster.dispatcher.calls_to(&cluster.info(0)), 2);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_result_files_are_served_by_their_owner() -> Result<()> {
    let cluster = ClusterBuilder::new(2).build().await?;

    let flow = cluster
        .node(0)
        .flows()
        .create_without_approval(&creator(), async_change("select * from orders"))
        .await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Completed).await?;
    let task = cluster.target_task(flow.id).await?;

    let dir = cluster.data_dir(0, task.id);
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join("orders.csv"), b"id,state\n1,paid\n").await?;

    let file = cluster
        .node(1)
        .tasks()
        .download(&creator(), flow.id, "orders.csv")
        .await?;
    assert_eq!(file.file_name, "orders.csv");
    assert_eq!(file.content, b"id,state\n1,paid\n".to_vec());

    let local = cluster
        .node(0)
        .tasks()
        .download(&creator(), flow.id, "missing.csv")
        .await;
    assert!(matches!(local, Err(FlowError::NotFound { .. })), "{local:?}");

    let relayed = cluster
        .node(1)
        .tasks()
        .download(&creator(), flow.id, "missing.csv")
        .await;
    // The owner's NotFound comes back as itself
    match relayed {
        Err(FlowError::NotFound { resource, value, .. }) => {
            assert_eq!(resource, "File");
            assert_eq!(value, "missing.csv");
        }
        other => panic!("unexpected {other:?}"),
    }

    let escaped = cluster
        .node(1)
        .tasks()
        .download(&creator(), flow.id, "../orders.csv")
        .await;
    assert!(matches!(escaped, Err(FlowError::Validation(_))), "{escaped:?}");

    cluster.shutdown().await;
    Ok(())
}
