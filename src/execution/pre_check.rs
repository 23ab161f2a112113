//! Built-in pre-check: classifies the requested change and publishes its
//! risk level for the risk gateway.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::executor::{ExecutionContext, ExecutionOutput, TaskNodeExecutor};
use crate::constants::variables;
use crate::engine::Variables;
use crate::error::FlowResult;
use crate::models::TaskEntity;

/// Source of the risk level of one request
#[async_trait]
pub trait RiskLevelResolver: Send + Sync + std::fmt::Debug {
    async fn resolve(&self, pre_check_task: &TaskEntity, variables: &Variables) -> FlowResult<i32>;
}

/// Resolves every request to the same level
#[derive(Debug, Clone, Copy)]
pub struct FixedRiskLevelResolver(pub i32);

#[async_trait]
impl RiskLevelResolver for FixedRiskLevelResolver {
    async fn resolve(&self, _: &TaskEntity, _: &Variables) -> FlowResult<i32> {
        Ok(self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PreCheckExecutor {
    resolver: Arc<dyn RiskLevelResolver>,
}

impl PreCheckExecutor {
    pub fn new(resolver: Arc<dyn RiskLevelResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl TaskNodeExecutor for PreCheckExecutor {
    async fn execute(&self, ctx: ExecutionContext) -> FlowResult<ExecutionOutput> {
        let level = self.resolver.resolve(&ctx.task, &ctx.variables).await?;
        info!(
            flow_instance_id = ctx.flow_instance_id,
            task_id = ctx.task.id,
            risk_level = level,
            "Pre-check resolved risk level"
        );
        if let Err(e) = ctx.log.info(&format!("Risk level resolved to {level}")).await {
            tracing::warn!(task_id = ctx.task.id, error = %e, "Writing task log failed");
        }
        Ok(ExecutionOutput::new()
            .with_result(json!({ "risk_level": level }))
            .with_variable(variables::RISK_LEVEL, level))
    }
}
