use serde::{Deserialize, Serialize};

/// Events that can trigger node state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum NodeEvent {
    /// The engine reached an auto-executed task or an approval
    Start,
    /// The engine reached a task that waits for a manual confirmation
    Enter,
    /// A user confirmed execution of a pending manual task
    Confirm,
    /// Task work finished successfully
    Complete,
    /// Task work failed with error message
    Fail(String),
    /// Task work ran past its execution window
    Expire,
    /// Cancel the node (task abort or approval withdrawal)
    Cancel,
    /// Approval decision: approved
    Approve,
    /// Approval decision: rejected
    Reject,
    /// Approval window elapsed without a decision
    Timeout,
}

impl NodeEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Enter => "enter",
            Self::Confirm => "confirm",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Expire => "expire",
            Self::Cancel => "cancel",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Timeout => "timeout",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }
}
