use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::FlowResult;
use crate::models::{RiskLevel, TaskType};

/// Source of the risk-level routing table of an organization
#[async_trait]
pub trait RiskLevelSource: Send + Sync + Debug {
    /// Risk levels with their approval chains, in any order
    async fn risk_levels(&self, organization_id: i64, task_type: TaskType)
        -> FlowResult<Vec<RiskLevel>>;
}

/// One routing table shared by every organization and task type
#[derive(Debug, Clone, Default)]
pub struct StaticRiskLevelSource {
    levels: Vec<RiskLevel>,
}

impl StaticRiskLevelSource {
    pub fn new(levels: Vec<RiskLevel>) -> Self {
        Self { levels }
    }
}

#[async_trait]
impl RiskLevelSource for StaticRiskLevelSource {
    async fn risk_levels(
        &self,
        _organization_id: i64,
        _task_type: TaskType,
    ) -> FlowResult<Vec<RiskLevel>> {
        Ok(self.levels.clone())
    }
}
