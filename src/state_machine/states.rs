use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Overall status of a flow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    /// Submitted; pre-check may still be running
    Created,
    /// An approval node is waiting for a decision
    Approving,
    /// An approval node expired without a decision
    WaitForConfirm,
    /// The target task waits for a manual execution confirmation
    WaitForExecution,
    /// The target task (or its rollback-plan task) is running
    Executing,
    Completed,
    Rejected,
    Cancelled,
    ExecutionFailed,
    ExecutionExpired,
    PreCheckFailed,
}

impl FlowStatus {
    /// Check if this is a terminal status (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Rejected
                | Self::Cancelled
                | Self::ExecutionFailed
                | Self::ExecutionExpired
                | Self::PreCheckFailed
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Approving => "APPROVING",
            Self::WaitForConfirm => "WAIT_FOR_CONFIRM",
            Self::WaitForExecution => "WAIT_FOR_EXECUTION",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::ExecutionExpired => "EXECUTION_EXPIRED",
            Self::PreCheckFailed => "PRE_CHECK_FAILED",
        }
    }

    pub fn all() -> &'static [FlowStatus] {
        &[
            Self::Created,
            Self::Approving,
            Self::WaitForConfirm,
            Self::WaitForExecution,
            Self::Executing,
            Self::Completed,
            Self::Rejected,
            Self::Cancelled,
            Self::ExecutionFailed,
            Self::ExecutionExpired,
            Self::PreCheckFailed,
        ]
    }
}

impl Default for FlowStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid flow status: {s}"))
    }
}

/// Status of a single Task or Approval node instance
///
/// Task nodes use CREATED/PENDING/EXECUTING/COMPLETED/FAILED/CANCELLED/EXPIRED,
/// approval nodes use CREATED/EXECUTING/WAIT_FOR_CONFIRM/APPROVED/REJECTED/CANCELLED.
/// Which transitions are legal is decided per node type by the state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowNodeStatus {
    /// Not reached yet
    Created,
    Pending,
    Executing,
    WaitForConfirm,
    Completed,
    Failed,
    Cancelled,
    Approved,
    Rejected,
    Expired,
}

impl FlowNodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::Failed
                | Self::Cancelled
                | Self::Approved
                | Self::Rejected
                | Self::Expired
        )
    }

    /// Reached and not finished: the node is the flow's current step
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Executing | Self::WaitForConfirm)
    }

    /// Never reached; an untaken branch stays dormant forever
    pub fn is_dormant(&self) -> bool {
        matches!(self, Self::Created)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Pending => "PENDING",
            Self::Executing => "EXECUTING",
            Self::WaitForConfirm => "WAIT_FOR_CONFIRM",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn all() -> &'static [FlowNodeStatus] {
        &[
            Self::Created,
            Self::Pending,
            Self::Executing,
            Self::WaitForConfirm,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
            Self::Approved,
            Self::Rejected,
            Self::Expired,
        ]
    }
}

impl Default for FlowNodeStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for FlowNodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowNodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid node status: {s}"))
    }
}
