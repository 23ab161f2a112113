use async_trait::async_trait;
use std::fmt::Debug;
use tracing::debug;

use crate::engine::Variables;
use crate::error::FlowResult;

/// Third-party approval system an approval node may delegate to
///
/// Failures are never fatal for the flow: callers log them and carry on.
#[async_trait]
pub trait ExternalApprovalClient: Send + Sync + Debug {
    /// Open an approval instance; returns its correlation id
    async fn create(
        &self,
        external_approval_id: i64,
        flow_instance_id: i64,
        variables: &Variables,
    ) -> FlowResult<Option<String>>;

    async fn cancel(&self, external_approval_id: i64, external_flow_instance_id: &str)
        -> FlowResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExternalApprovalClient;

#[async_trait]
impl ExternalApprovalClient for NoopExternalApprovalClient {
    async fn create(
        &self,
        external_approval_id: i64,
        flow_instance_id: i64,
        _variables: &Variables,
    ) -> FlowResult<Option<String>> {
        debug!(
            external_approval_id = external_approval_id,
            flow_instance_id = flow_instance_id,
            "No external approval system configured"
        );
        Ok(None)
    }

    async fn cancel(
        &self,
        _external_approval_id: i64,
        _external_flow_instance_id: &str,
    ) -> FlowResult<()> {
        Ok(())
    }
}
