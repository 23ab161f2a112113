//! Runs against the database in `DATABASE_URL`; skipped when it is unset.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use flowgate_core::approval::{InMemoryRoleDirectory, StaticRiskLevelSource};
use flowgate_core::bootstrap::{postgres_store, FlowgateNode, NodeDependencies};
use flowgate_core::config::{DatabaseConfig, FlowgateConfig};
use flowgate_core::models::{NewFlowInstance, TaskStatus, TaskType};
use flowgate_core::state_machine::FlowStatus;

use crate::common::*;

fn database_config() -> Option<DatabaseConfig> {
    let url = std::env::var("DATABASE_URL").ok()?;
    Some(DatabaseConfig {
        url: Some(url),
        max_connections: 4,
    })
}

#[tokio::test]
async fn test_uncommitted_transaction_leaves_no_trace() -> Result<()> {
    let Some(database) = database_config() else {
        eprintln!("DATABASE_URL not set, skipping");
        return Ok(());
    };
    let store = postgres_store(&database).await?;

    let mut tx = store.begin().await?;
    let flow = tx
        .insert_flow_instance(NewFlowInstance {
            name: "rolled_back".into(),
            task_type: TaskType::Async,
            creator_id: CREATOR_ID,
            organization_id: ORGANIZATION_ID,
            project_id: None,
            parent_instance_id: None,
            description: None,
        })
        .await?;
    tx.rollback().await?;

    let mut tx = store.begin().await?;
    assert!(tx.find_flow_instance(flow.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_flow_completes_on_postgres() -> Result<()> {
    let Some(database) = database_config() else {
        eprintln!("DATABASE_URL not set, skipping");
        return Ok(());
    };
    let workspace = tempfile::TempDir::new()?;
    let mut config = FlowgateConfig::default();
    config.heartbeat.enabled = false;
    config.expiration.enabled = false;
    config.task_log.log_root = workspace.path().join("log");
    config.task_log.data_root = workspace.path().join("data");
    config.database = database.clone();

    let deps = NodeDependencies::new(
        postgres_store(&database).await?,
        Arc::new(InMemoryRoleDirectory::new()),
        Arc::new(StaticRiskLevelSource::new(vec![unguarded_level(0)])),
        Arc::new(LoopbackDispatcher::default()),
    )
    .with_registry(registry_with(EchoExecutor::default()));
    let mut node = FlowgateNode::bootstrap(config, deps).await?;

    let flow = node
        .flows()
        .create(&creator(), async_change("select 1; select 2"))
        .await?;
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = node.flows().get_status(&creator(), flow.id).await?;
        if status == FlowStatus::Completed {
            break;
        }
        assert!(Instant::now() < deadline, "flow stuck in {status}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let task = node.flows().get_task_by_flow_instance_id(flow.id).await?;
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.executor.as_ref(), Some(node.local()));

    node.shutdown().await;
    Ok(())
}
