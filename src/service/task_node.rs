//! Node-local task resources: manual execution confirmation, task logs and
//! downloadable result files. Whatever lives on another node's disk is
//! fetched from that node.

use std::path::{Component, Path};
use tracing::info;

use super::context::RequestContext;
use super::flow_instance::{find_flow, find_visible_flow, target_task};
use super::ServiceComponents;
use crate::constants::DEFAULT_LOG_CONTENT;
use crate::dispatch::{BinaryDataResult, FlowCommand};
use crate::error::{verify_singleton, FlowError, FlowResult};
use crate::execution::{read_log_tail, task_log_path, LogLevel};
use crate::logging::log_flow_operation;
use crate::models::{ExecutionStrategy, FlowInstance, NodeInstance, TaskEntity, TaskType};
use crate::state_machine::FlowNodeStatus;

#[derive(Debug, Clone)]
pub struct TaskNodeService {
    components: ServiceComponents,
}

impl TaskNodeService {
    pub fn new(components: ServiceComponents) -> Self {
        Self { components }
    }

    /// Confirm the manual task a flow is waiting on and hand it to the router
    pub async fn execute_task(
        &self,
        ctx: &RequestContext,
        flow_instance_id: i64,
    ) -> FlowResult<FlowInstance> {
        let mut tx = self.components.store.begin().await?;
        let flow = find_visible_flow(tx.as_mut(), ctx, flow_instance_id).await?;
        if !ctx.forwarded && flow.creator_id != ctx.user_id() {
            return Err(FlowError::AccessDenied(format!(
                "Only the creator may execute flow instance {flow_instance_id}"
            )));
        }

        let task = target_task(tx.as_mut(), flow.id).await?;
        if task.task_type == TaskType::Import {
            if let Some(target) = self
                .components
                .forwarder
                .remote_target(ctx, task.submitter.as_ref())
            {
                drop(tx);
                return self
                    .components
                    .forwarder
                    .forward_typed(&target, flow.id, &FlowCommand::Execute, ctx)
                    .await;
            }
        }

        let waiting: Vec<_> = tx
            .list_nodes(flow.id)
            .await?
            .into_iter()
            .filter_map(NodeInstance::into_task)
            .filter(|node| {
                node.status == FlowNodeStatus::Pending && node.strategy == ExecutionStrategy::Manual
            })
            .collect();
        if waiting.is_empty() {
            return Err(FlowError::Validation(format!(
                "Flow instance {} has no task waiting for execution",
                flow.id
            )));
        }
        let node = verify_singleton(waiting, &format!("Pending task node of flow instance {}", flow.id))?;

        let job = self
            .components
            .lifecycle
            .confirm_task(tx.as_mut(), &flow, node)
            .await?;
        let flow = find_flow(tx.as_mut(), flow.id).await?;
        tx.commit().await?;

        self.components.router.submit_all(vec![job]);
        log_flow_operation("execute", Some(flow.id), Some(ctx.user_id()), flow.status.as_str(), None);
        Ok(flow)
    }

    async fn load_task(&self, ctx: &RequestContext, flow_instance_id: i64) -> FlowResult<TaskEntity> {
        let mut tx = self.components.store.begin().await?;
        find_visible_flow(tx.as_mut(), ctx, flow_instance_id).await?;
        target_task(tx.as_mut(), flow_instance_id).await
    }

    /// Tail of the task log at `level`, read where the task ran
    pub async fn get_log(
        &self,
        ctx: &RequestContext,
        flow_instance_id: i64,
        level: LogLevel,
    ) -> FlowResult<String> {
        let task = self.load_task(ctx, flow_instance_id).await?;
        if let Some(target) = self
            .components
            .forwarder
            .remote_target(ctx, task.executor.as_ref())
        {
            return self
                .components
                .forwarder
                .forward_typed(&target, flow_instance_id, &FlowCommand::GetLog { level }, ctx)
                .await;
        }

        let config = &self.components.config.task_log;
        let path = task_log_path(&config.log_root, &task, level);
        Ok(read_log_tail(&path, config.max_lines, config.max_bytes)
            .await?
            .unwrap_or_else(|| DEFAULT_LOG_CONTENT.to_string()))
    }

    /// The complete task log as a file
    pub async fn download_log(
        &self,
        ctx: &RequestContext,
        flow_instance_id: i64,
    ) -> FlowResult<BinaryDataResult> {
        let task = self.load_task(ctx, flow_instance_id).await?;
        if let Some(target) = self
            .components
            .forwarder
            .remote_target(ctx, task.executor.as_ref())
        {
            return self
                .components
                .forwarder
                .forward_binary(&target, flow_instance_id, &FlowCommand::DownloadLog, ctx)
                .await;
        }

        let path = task_log_path(&self.components.config.task_log.log_root, &task, LogLevel::All);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                DEFAULT_LOG_CONTENT.as_bytes().to_vec()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(BinaryDataResult {
            file_name: format!("task_{}.log", task.id),
            content,
        })
    }

    /// A result file of the task, served by the node that holds it
    pub async fn download(
        &self,
        ctx: &RequestContext,
        flow_instance_id: i64,
        file_name: &str,
    ) -> FlowResult<BinaryDataResult> {
        validate_file_name(file_name)?;
        let task = self.load_task(ctx, flow_instance_id).await?;
        let owner = self.components.forwarder.checker().owner_of(&task);
        if let Some(target) = self.components.forwarder.remote_target(ctx, owner) {
            let command = FlowCommand::Download {
                file_name: file_name.to_string(),
            };
            return self
                .components
                .forwarder
                .forward_binary(&target, flow_instance_id, &command, ctx)
                .await;
        }

        let path = self
            .components
            .config
            .task_log
            .data_root
            .join(task.id.to_string())
            .join(file_name);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FlowError::not_found("File", "name", file_name));
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            flow_instance_id = flow_instance_id,
            task_id = task.id,
            file_name = %file_name,
            bytes = content.len(),
            "Serving task file"
        );
        Ok(BinaryDataResult {
            file_name: file_name.to_string(),
            content,
        })
    }

    pub async fn get_result(
        &self,
        ctx: &RequestContext,
        flow_instance_id: i64,
    ) -> FlowResult<Option<serde_json::Value>> {
        Ok(self.load_task(ctx, flow_instance_id).await?.result)
    }
}

/// A bare file name: no separators, no parent or root components
fn validate_file_name(file_name: &str) -> FlowResult<()> {
    let mut components = Path::new(file_name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_normal || file_name.contains(['/', '\\']) {
        return Err(FlowError::Validation(format!(
            "Illegal file name: {file_name}"
        )));
    }
    Ok(())
}
