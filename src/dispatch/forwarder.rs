use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

use super::checker::DispatchChecker;
use super::command::FlowCommand;
use super::dispatcher::RequestDispatcher;
use super::wire::{BinaryDataResult, DispatchResponse};
use crate::error::FlowResult;
use crate::logging::log_dispatch_operation;
use crate::models::ExecutorInfo;
use crate::service::RequestContext;

/// Decides where a command runs and relays it when that is another node
#[derive(Debug, Clone)]
pub struct FlowForwarder {
    checker: DispatchChecker,
    dispatcher: Arc<dyn RequestDispatcher>,
    forwarded_by_header: String,
}

impl FlowForwarder {
    pub fn new(
        checker: DispatchChecker,
        dispatcher: Arc<dyn RequestDispatcher>,
        forwarded_by_header: impl Into<String>,
    ) -> Self {
        Self {
            checker,
            dispatcher,
            forwarded_by_header: forwarded_by_header.into(),
        }
    }

    pub fn checker(&self) -> &DispatchChecker {
        &self.checker
    }

    /// Node a request must be relayed to, `None` to serve it here
    ///
    /// A request that already crossed a node boundary is always served where
    /// it landed.
    pub fn remote_target(
        &self,
        ctx: &RequestContext,
        owner: Option<&ExecutorInfo>,
    ) -> Option<ExecutorInfo> {
        if ctx.forwarded {
            return None;
        }
        owner
            .filter(|owner| !self.checker.is_this_machine(owner))
            .cloned()
    }

    pub async fn forward(
        &self,
        target: &ExecutorInfo,
        flow_instance_id: i64,
        command: &FlowCommand,
        ctx: &RequestContext,
    ) -> FlowResult<DispatchResponse> {
        let request = command.to_request(
            flow_instance_id,
            ctx,
            &self.forwarded_by_header,
            self.checker.local(),
        )?;
        info!(
            flow_instance_id = flow_instance_id,
            command = command.name(),
            host = %target.host,
            port = target.port,
            "🌉 Forwarding to owning node"
        );
        log_dispatch_operation(
            command.name(),
            &target.host,
            target.port,
            "forwarding",
            Some(&format!("flow_instance_id={flow_instance_id}")),
        );
        self.dispatcher.forward(target, request).await
    }

    pub async fn forward_typed<T: DeserializeOwned>(
        &self,
        target: &ExecutorInfo,
        flow_instance_id: i64,
        command: &FlowCommand,
        ctx: &RequestContext,
    ) -> FlowResult<T> {
        self.forward(target, flow_instance_id, command, ctx)
            .await?
            .content_by_type()
    }

    pub async fn forward_binary(
        &self,
        target: &ExecutorInfo,
        flow_instance_id: i64,
        command: &FlowCommand,
        ctx: &RequestContext,
    ) -> FlowResult<BinaryDataResult> {
        self.forward(target, flow_instance_id, command, ctx)
            .await?
            .binary()
    }
}
