use anyhow::Result;

use flowgate_core::error::FlowError;
use flowgate_core::models::{ExecutionStrategy, NodeInstance, TaskStatus};
use flowgate_core::state_machine::{FlowNodeStatus, FlowStatus};

use crate::common::*;

#[tokio::test]
async fn test_manual_task_waits_for_its_creator() -> Result<()> {
    let echo = EchoExecutor::default();
    let cluster = ClusterBuilder::new(1)
        .with_registry(registry_with(echo.clone()))
        .build()
        .await?;
    let node = cluster.node(0);

    let mut req = async_change("create index idx_orders_state on orders(state)");
    req.execution_strategy = ExecutionStrategy::Manual;
    let flow = node.flows().create_without_approval(&creator(), req).await?;
    assert_eq!(flow.status, FlowStatus::WaitForExecution);

    let pending = cluster
        .nodes_of(flow.id)
        .await?
        .into_iter()
        .filter_map(NodeInstance::into_task)
        .find(|task| task.strategy == ExecutionStrategy::Manual)
        .expect("manual task node");
    assert_eq!(pending.status, FlowNodeStatus::Pending);
    assert_eq!(cluster.target_task(flow.id).await?.status, TaskStatus::Prepared);
    assert_eq!(echo.runs(), 0);

    let denied = node.tasks().execute_task(&bystander(), flow.id).await;
    assert!(matches!(denied, Err(FlowError::AccessDenied(_))), "{denied:?}");

    let confirmed = node.tasks().execute_task(&creator(), flow.id).await?;
    assert_eq!(confirmed.status, FlowStatus::Executing);
    cluster.wait_for_status(0, flow.id, FlowStatus::Completed).await?;
    assert_eq!(echo.runs(), 1);

    let again = node.tasks().execute_task(&creator(), flow.id).await;
    assert!(matches!(again, Err(FlowError::Validation(_))), "{again:?}");

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_manual_task_can_be_cancelled_before_execution() -> Result<()> {
    let cluster = ClusterBuilder::new(1).build().await?;
    let node = cluster.node(0);

    let mut req = async_change("truncate table carts");
    req.execution_strategy = ExecutionStrategy::Manual;
    let flow = node.flows().create_without_approval(&creator(), req).await?;
    assert_eq!(flow.status, FlowStatus::WaitForExecution);

    let cancelled = node.flows().cancel(&creator(), flow.id, false).await?;
    assert_eq!(cancelled.status, FlowStatus::Cancelled);
    assert_eq!(cluster.target_task(flow.id).await?.status, TaskStatus::Canceled);

    let late = node.tasks().execute_task(&creator(), flow.id).await;
    assert!(late.is_err());

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_multiple_database_change_runs_one_node_per_group() -> Result<()> {
    use flowgate_core::models::request::MultipleDatabaseChangeParameters;
    use flowgate_core::models::{CreateFlowInstanceReq, TaskParameters, TaskType};

    let cluster = ClusterBuilder::new(1).build().await?;
    let req = CreateFlowInstanceReq::new(
        TaskType::MultipleAsync,
        TaskParameters::MultipleDatabaseChange(MultipleDatabaseChangeParameters {
            ordered_database_ids: vec![vec![1, 2], vec![3]],
            sql_content: "update config set v = 2".to_string(),
            delimiter: ";".to_string(),
            manual_timeout_millis: 0,
        }),
    );
    let flow = cluster
        .node(0)
        .flows()
        .create_without_approval(&creator(), req)
        .await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Completed).await?;

    let task_nodes: Vec<_> = cluster
        .nodes_of(flow.id)
        .await?
        .into_iter()
        .filter_map(NodeInstance::into_task)
        .filter(|task| task.task_type == TaskType::MultipleAsync)
        .collect();
    assert_eq!(task_nodes.len(), 2);
    assert!(task_nodes.iter().all(|t| t.status == FlowNodeStatus::Completed));

    // The second run saw the first one completed
    let result = cluster.target_task(flow.id).await?.result.expect("result");
    assert_eq!(result["sequence"], 1);

    cluster.shutdown().await;
    Ok(())
}
