//! Risk-gated flows from creation through approval to a finished task.

use anyhow::Result;
use flowgate_core::error::FlowError;
use flowgate_core::execution::{ExecutorRegistry, TaskNodeExecutor};
use flowgate_core::models::{NodeInstance, TaskStatus, TaskType};
use flowgate_core::state_machine::{FlowNodeStatus, FlowStatus};

use crate::common::*;

#[tokio::test]
async fn test_approved_flow_runs_its_task_to_completion() -> Result<()> {
    let cluster = ClusterBuilder::new(1).with_approval().build().await?;
    let node = cluster.node(0);

    let flow = node
        .flows()
        .create(&creator(), async_change("update orders set state = 1; delete from carts"))
        .await?;
    assert_eq!(flow.creator_id, CREATOR_ID);
    cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;

    assert_eq!(node.flows().get_meta_info(&approver()).await?.pending_approval_count, 1);
    assert_eq!(node.flows().get_meta_info(&bystander()).await?.pending_approval_count, 0);

    let detail = node.flows().detail(&creator(), flow.id).await?;
    let candidate_ids: Vec<i64> = detail.candidates.iter().map(|u| u.id).collect();
    assert_eq!(candidate_ids, vec![APPROVER_ID]);

    let approved = node
        .flows()
        .approve(&approver(), flow.id, Some("looks fine".into()), false)
        .await?;
    assert_ne!(approved.status, FlowStatus::Approving);
    cluster.wait_for_status(0, flow.id, FlowStatus::Completed).await?;

    let task = cluster.target_task(flow.id).await?;
    assert_eq!(task.task_type, TaskType::Async);
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.executor.as_ref(), Some(node.local()));
    assert_eq!(task.submitter.as_ref(), Some(node.local()));
    let result = task.result.expect("task result recorded");
    assert_eq!(result["task_id"], task.id);

    let approval = cluster
        .nodes_of(flow.id)
        .await?
        .into_iter()
        .find_map(NodeInstance::into_approval)
        .expect("approval node");
    assert_eq!(approval.status, FlowNodeStatus::Approved);
    assert_eq!(approval.operator_id, Some(APPROVER_ID));
    assert_eq!(approval.comment.as_deref(), Some("looks fine"));

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_only_candidates_may_decide() -> Result<()> {
    let cluster = ClusterBuilder::new(1).with_approval().build().await?;
    let flows = cluster.node(0).flows();

    let flow = flows.create(&creator(), async_change("select 1")).await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;

    let denied = flows.approve(&bystander(), flow.id, None, false).await;
    assert!(matches!(denied, Err(FlowError::AccessDenied(_))), "{denied:?}");
    let denied = flows.reject(&creator(), flow.id, None, false).await;
    assert!(matches!(denied, Err(FlowError::AccessDenied(_))), "{denied:?}");

    // Skipping the check lets anyone in the organization decide
    flows.approve(&bystander(), flow.id, None, true).await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Completed).await?;

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_rejected_flow_never_runs_its_task() -> Result<()> {
    let echo = EchoExecutor::default();
    let cluster = ClusterBuilder::new(1)
        .with_approval()
        .with_registry(registry_with(echo.clone()))
        .build()
        .await?;
    let flows = cluster.node(0).flows();

    let flow = flows.create(&creator(), async_change("drop table orders")).await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;

    let rejected = flows
        .reject(&approver(), flow.id, Some("too risky".into()), false)
        .await?;
    assert_eq!(rejected.status, FlowStatus::Rejected);
    assert_eq!(echo.runs(), 0);
    assert_eq!(cluster.target_task(flow.id).await?.executor, None);

    // Nothing is left to decide
    let again = flows.approve(&approver(), flow.id, None, false).await;
    assert!(again.is_err());

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_low_risk_flow_skips_approval() -> Result<()> {
    let cluster = ClusterBuilder::new(1).build().await?;

    let flow = cluster
        .node(0)
        .flows()
        .create(&creator(), async_change("insert into audit values (1)"))
        .await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Completed).await?;

    let nodes = cluster.nodes_of(flow.id).await?;
    assert!(nodes.iter().all(|n| n.as_approval().is_none()));
    let pre_check = nodes
        .iter()
        .filter_map(NodeInstance::as_task)
        .find(|task| task.task_type == TaskType::PreCheck)
        .expect("pre-check node");
    assert_eq!(pre_check.status, FlowNodeStatus::Completed);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_pre_check_fails_the_flow() -> Result<()> {
    let mut registry = registry_with(EchoExecutor::default());
    registry.register(TaskType::PreCheck, || {
        Box::new(FailingExecutor {
            message: "sql check service unavailable",
        }) as Box<dyn TaskNodeExecutor>
    });
    let cluster = ClusterBuilder::new(1)
        .with_approval()
        .with_registry(registry)
        .build()
        .await?;

    let flow = cluster
        .node(0)
        .flows()
        .create(&creator(), async_change("select 1"))
        .await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::PreCheckFailed).await?;

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_failing_task_fails_the_flow() -> Result<()> {
    let cluster = ClusterBuilder::new(1)
        .with_registry(registry_with(FailingExecutor {
            message: "lock wait timeout exceeded",
        }))
        .build()
        .await?;

    let flow = cluster
        .node(0)
        .flows()
        .create_without_approval(&creator(), async_change("update orders set a = 1"))
        .await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::ExecutionFailed).await?;

    let task = cluster.target_task(flow.id).await?;
    assert_eq!(task.status, TaskStatus::Failed);
    let message = task.result.expect("failure recorded")["error"]
        .as_str()
        .map(str::to_string);
    assert!(message.is_some_and(|m| m.contains("lock wait timeout")));

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_task_without_executor_fails_the_flow() -> Result<()> {
    let cluster = ClusterBuilder::new(1)
        .with_registry(ExecutorRegistry::new())
        .build()
        .await?;

    let flow = cluster
        .node(0)
        .flows()
        .create_without_approval(&creator(), async_change("select 1"))
        .await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::ExecutionFailed).await?;

    cluster.shutdown().await;
    Ok(())
}

fn approval_statuses(nodes: &[NodeInstance]) -> Vec<FlowNodeStatus> {
    nodes
        .iter()
        .filter_map(NodeInstance::as_approval)
        .map(|approval| approval.status)
        .collect()
}

fn count(statuses: &[FlowNodeStatus], status: FlowNodeStatus) -> usize {
    statuses.iter().filter(|s| **s == status).count()
}

/// Levels 1, 2 and 3 guarded by one, two and three approvals
fn tiered_cluster(resolved_level: i32) -> ClusterBuilder {
    ClusterBuilder::new(1).with_risk_levels(
        vec![
            unguarded_level(0),
            dba_chain_level(1, 1),
            dba_chain_level(2, 2),
            dba_chain_level(3, 3),
        ],
        resolved_level,
    )
}

#[tokio::test]
async fn test_risk_level_routes_to_its_approval_chain() -> Result<()> {
    let echo = EchoExecutor::default();
    let cluster = tiered_cluster(2)
        .with_registry(registry_with(echo.clone()))
        .build()
        .await?;
    let flows = cluster.node(0).flows();

    let flow = flows.create(&creator(), async_change("alter table orders drop c")).await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;
    let statuses = approval_statuses(&cluster.nodes_of(flow.id).await?);
    assert_eq!(statuses.len(), 6, "{statuses:?}");
    assert_eq!(count(&statuses, FlowNodeStatus::Executing), 1, "{statuses:?}");

    // The first of two approvals leaves the flow waiting on the second
    let first = flows.approve(&approver(), flow.id, Some("step one".into()), false).await?;
    assert_eq!(first.status, FlowStatus::Approving);
    let statuses = approval_statuses(&cluster.nodes_of(flow.id).await?);
    assert_eq!(count(&statuses, FlowNodeStatus::Approved), 1, "{statuses:?}");
    assert_eq!(count(&statuses, FlowNodeStatus::Executing), 1, "{statuses:?}");
    assert_eq!(echo.runs(), 0);

    flows.approve(&approver(), flow.id, Some("step two".into()), false).await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Completed).await?;
    assert_eq!(echo.runs(), 1);

    // Levels 1 and 3 were never entered
    let statuses = approval_statuses(&cluster.nodes_of(flow.id).await?);
    assert_eq!(count(&statuses, FlowNodeStatus::Approved), 2, "{statuses:?}");
    assert_eq!(count(&statuses, FlowNodeStatus::Created), 4, "{statuses:?}");

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_rejection_mid_chain_stops_the_flow() -> Result<()> {
    let echo = EchoExecutor::default();
    let cluster = tiered_cluster(2)
        .with_registry(registry_with(echo.clone()))
        .build()
        .await?;
    let flows = cluster.node(0).flows();

    let flow = flows.create(&creator(), async_change("truncate table carts")).await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;
    flows.approve(&approver(), flow.id, None, false).await?;

    let rejected = flows
        .reject(&approver(), flow.id, Some("not this week".into()), false)
        .await?;
    assert_eq!(rejected.status, FlowStatus::Rejected);
    assert_eq!(echo.runs(), 0);
    assert_eq!(cluster.target_task(flow.id).await?.executor, None);

    let nodes = cluster.nodes_of(flow.id).await?;
    let statuses = approval_statuses(&nodes);
    assert_eq!(count(&statuses, FlowNodeStatus::Approved), 1, "{statuses:?}");
    assert_eq!(count(&statuses, FlowNodeStatus::Rejected), 1, "{statuses:?}");
    let untouched = nodes
        .iter()
        .filter_map(NodeInstance::as_task)
        .filter(|task| task.task_type != TaskType::PreCheck)
        .all(|task| task.status == FlowNodeStatus::Created);
    assert!(untouched);

    cluster.shutdown().await;
    Ok(())
}
