use anyhow::Result;

use flowgate_core::error::FlowError;
use flowgate_core::models::request::{ExportParameters, DbObject};
use flowgate_core::models::{CreateFlowInstanceReq, FlowInstanceQuery, TaskParameters, TaskType};
use flowgate_core::state_machine::FlowStatus;

use crate::common::*;

fn ids(page: &flowgate_core::models::Page<flowgate_core::models::FlowInstance>) -> Vec<i64> {
    page.items.iter().map(|flow| flow.id).collect()
}

#[tokio::test]
async fn test_list_scopes_flows_to_the_caller() -> Result<()> {
    let cluster = ClusterBuilder::new(1).with_approval().build().await?;
    let flows = cluster.node(0).flows();

    let mine = flows.create(&creator(), async_change("select 1")).await?;
    let theirs = flows.create(&bystander(), async_change("select 2")).await?;
    for id in [mine.id, theirs.id] {
        cluster.wait_for_status(0, id, FlowStatus::Approving).await?;
    }

    // Neither flag given: created by me or approvable by me
    let default = FlowInstanceQuery::default();
    assert_eq!(ids(&flows.list(&creator(), &default).await?), vec![mine.id]);
    assert_eq!(
        ids(&flows.list(&approver(), &default).await?),
        vec![theirs.id, mine.id]
    );

    let created_only = FlowInstanceQuery {
        created_by_current_user: true,
        ..FlowInstanceQuery::default()
    };
    assert!(flows.list(&approver(), &created_only).await?.items.is_empty());

    let approvable_only = FlowInstanceQuery {
        approve_by_current_user: true,
        flow_instance_id: Some(mine.id),
        ..FlowInstanceQuery::default()
    };
    assert_eq!(ids(&flows.list(&approver(), &approvable_only).await?), vec![mine.id]);

    let everything = FlowInstanceQuery {
        contains_all: true,
        ..FlowInstanceQuery::default()
    };
    assert_eq!(flows.list(&bystander(), &everything).await?.total, 2);
    assert_eq!(flows.list(&foreigner(), &everything).await?.total, 0);

    let unfinished = flows.list_unfinished(&creator()).await?;
    assert_eq!(unfinished.iter().map(|f| f.id).collect::<Vec<_>>(), vec![mine.id]);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_other_organizations_see_nothing() -> Result<()> {
    let cluster = ClusterBuilder::new(1).with_approval().build().await?;
    let node = cluster.node(0);

    let flow = node.flows().create(&creator(), async_change("select 1")).await?;
    cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;

    let status = node.flows().get_status(&foreigner(), flow.id).await;
    assert!(matches!(status, Err(FlowError::NotFound { .. })), "{status:?}");
    let detail = node.flows().detail(&foreigner(), flow.id).await;
    assert!(matches!(detail, Err(FlowError::NotFound { .. })), "{detail:?}");
    let decided = node.flows().approve(&foreigner(), flow.id, None, true).await;
    assert!(matches!(decided, Err(FlowError::NotFound { .. })), "{decided:?}");
    let result = node.tasks().get_result(&foreigner(), flow.id).await;
    assert!(matches!(result, Err(FlowError::NotFound { .. })), "{result:?}");

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_requests_over_limits() -> Result<()> {
    let cluster = ClusterBuilder::new(1)
        .configure(|config| {
            config.flow_task.sql_content_max_length = 64;
            config.flow_task.max_export_objects = 3;
        })
        .build()
        .await?;
    let node = cluster.node(0);
    let limits = node.config().flow_task.clone();

    let long_sql = "x".repeat(limits.sql_content_max_length + 1);
    let result = node.flows().create(&creator(), async_change(&long_sql)).await;
    assert!(
        matches!(result, Err(FlowError::OverLimit { metric: "sql_content_length", .. })),
        "{result:?}"
    );

    let objects = (0..=limits.max_export_objects)
        .map(|i| DbObject {
            name: format!("table_{i}"),
            object_type: "TABLE".to_string(),
        })
        .collect();
    let export = CreateFlowInstanceReq::new(
        TaskType::Export,
        TaskParameters::Export(ExportParameters {
            export_db_objects: objects,
            export_all_objects: false,
        }),
    );
    let result = node.flows().create(&creator(), export.clone()).await;
    assert!(
        matches!(result, Err(FlowError::OverLimit { metric: "export_object_count", .. })),
        "{result:?}"
    );

    // Exporting everything is not capped by the object list
    let mut export_all = export;
    if let TaskParameters::Export(p) = &mut export_all.parameters {
        p.export_all_objects = true;
    }
    node.flows().create(&creator(), export_all).await?;

    let result = node.flows().create(&creator(), import_files(&[])).await;
    assert!(matches!(result, Err(FlowError::Validation(_))), "{result:?}");

    let unlisted = FlowInstanceQuery {
        contains_all: true,
        task_type: Some(TaskType::Async),
        ..FlowInstanceQuery::default()
    };
    assert_eq!(node.flows().list(&creator(), &unlisted).await?.total, 0);

    cluster.shutdown().await;
    Ok(())
}
