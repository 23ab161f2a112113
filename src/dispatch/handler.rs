//! Serving side of cross-node forwarding: decodes a relayed request, runs it
//! against the local services and encodes the outcome.

use tracing::{debug, warn};

use super::command::{user_from_request, FlowCommand};
use super::wire::{DispatchRequest, DispatchResponse};
use crate::error::FlowResult;
use crate::models::ExecutorInfo;
use crate::service::{FlowInstanceService, RequestContext, TaskNodeService};

#[derive(Debug, Clone)]
pub struct FlowCommandHandler {
    flows: FlowInstanceService,
    tasks: TaskNodeService,
    local: ExecutorInfo,
}

impl FlowCommandHandler {
    pub fn new(flows: FlowInstanceService, tasks: TaskNodeService, local: ExecutorInfo) -> Self {
        Self {
            flows,
            tasks,
            local,
        }
    }

    /// Errors are returned as failure envelopes, never raised
    pub async fn handle(&self, request: DispatchRequest) -> DispatchResponse {
        match self.dispatch(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    path = %request.path,
                    error = %e,
                    "Forwarded request failed"
                );
                DispatchResponse::failure(&e, self.local.clone())
            }
        }
    }

    async fn dispatch(&self, request: &DispatchRequest) -> FlowResult<DispatchResponse> {
        let (flow_instance_id, command) = FlowCommand::from_request(request)?;
        let ctx = RequestContext::forwarded(user_from_request(request)?);
        debug!(
            flow_instance_id = flow_instance_id,
            command = command.name(),
            user_id = ctx.user_id(),
            "Serving forwarded request"
        );

        let origin = self.local.clone();
        match command {
            FlowCommand::Cancel { skip_auth } => DispatchResponse::success(
                &self.flows.cancel(&ctx, flow_instance_id, skip_auth).await?,
                origin,
            ),
            FlowCommand::Approve { message, skip_auth } => DispatchResponse::success(
                &self.flows.approve(&ctx, flow_instance_id, message, skip_auth).await?,
                origin,
            ),
            FlowCommand::Reject { message, skip_auth } => DispatchResponse::success(
                &self.flows.reject(&ctx, flow_instance_id, message, skip_auth).await?,
                origin,
            ),
            FlowCommand::Execute => DispatchResponse::success(
                &self.tasks.execute_task(&ctx, flow_instance_id).await?,
                origin,
            ),
            FlowCommand::GetLog { level } => DispatchResponse::success(
                &self.tasks.get_log(&ctx, flow_instance_id, level).await?,
                origin,
            ),
            FlowCommand::DownloadLog => Ok(DispatchResponse::attachment(
                self.tasks.download_log(&ctx, flow_instance_id).await?,
                origin,
            )),
            FlowCommand::Download { file_name } => Ok(DispatchResponse::attachment(
                self.tasks.download(&ctx, flow_instance_id, &file_name).await?,
                origin,
            )),
        }
    }
}
