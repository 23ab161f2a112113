use chrono::Utc;
use tracing::debug;

use super::errors::StateMachineError;
use super::events::NodeEvent;
use super::states::FlowNodeStatus;
use crate::models::node::NodeInstance;

/// Per-node-type status transition table
pub trait NodeStateMachine {
    fn node_type(&self) -> &'static str;

    /// Determine the target state for a given event, or reject the transition
    fn determine_target_state(
        &self,
        current: FlowNodeStatus,
        event: &NodeEvent,
    ) -> Result<FlowNodeStatus, StateMachineError>;

    fn can_transition(&self, current: FlowNodeStatus, event: &NodeEvent) -> bool {
        self.determine_target_state(current, event).is_ok()
    }

    fn invalid(&self, from: FlowNodeStatus, event: &NodeEvent) -> StateMachineError {
        StateMachineError::InvalidTransition {
            node_type: self.node_type(),
            from,
            event: event.event_type(),
        }
    }
}

/// Task nodes: `CREATED → PENDING → EXECUTING → {COMPLETED, FAILED, EXPIRED, CANCELLED}`,
/// plus `PENDING → CANCELLED` for work that never started.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateMachine;

impl NodeStateMachine for TaskStateMachine {
    fn node_type(&self) -> &'static str {
        "task"
    }

    fn determine_target_state(
        &self,
        current: FlowNodeStatus,
        event: &NodeEvent,
    ) -> Result<FlowNodeStatus, StateMachineError> {
        use FlowNodeStatus::*;

        let target = match (current, event) {
            (Created, NodeEvent::Enter) => Pending,
            (Pending, NodeEvent::Start) => Executing,
            (Pending, NodeEvent::Confirm) => Executing,
            (Pending, NodeEvent::Cancel) => Cancelled,
            (Executing, NodeEvent::Complete) => Completed,
            (Executing, NodeEvent::Fail(_)) => Failed,
            (Executing, NodeEvent::Expire) => Expired,
            (Executing, NodeEvent::Cancel) => Cancelled,
            _ => return Err(self.invalid(current, event)),
        };
        Ok(target)
    }
}

/// Approval nodes: `CREATED → EXECUTING → {APPROVED, REJECTED, CANCELLED}`,
/// with `EXECUTING → WAIT_FOR_CONFIRM` when the approval window elapses.
/// An expired approval can still be decided.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalStateMachine;

impl NodeStateMachine for ApprovalStateMachine {
    fn node_type(&self) -> &'static str {
        "approval"
    }

    fn determine_target_state(
        &self,
        current: FlowNodeStatus,
        event: &NodeEvent,
    ) -> Result<FlowNodeStatus, StateMachineError> {
        use FlowNodeStatus::*;

        let target = match (current, event) {
            (Created, NodeEvent::Start) => Executing,
            (Executing, NodeEvent::Timeout) => WaitForConfirm,
            (Executing | WaitForConfirm, NodeEvent::Approve) => Approved,
            (Executing | WaitForConfirm, NodeEvent::Reject) => Rejected,
            (Executing | WaitForConfirm, NodeEvent::Cancel) => Cancelled,
            _ => return Err(self.invalid(current, event)),
        };
        Ok(target)
    }
}

/// Apply `event` to a node in place, dispatching on the node variant
///
/// Returns the new status. Gateways are stateless and always rejected.
pub fn transition(
    node: &mut NodeInstance,
    event: &NodeEvent,
) -> Result<FlowNodeStatus, StateMachineError> {
    let now = Utc::now();
    let (from, to) = match node {
        NodeInstance::Task(task) => {
            let to = TaskStateMachine.determine_target_state(task.status, event)?;
            let from = std::mem::replace(&mut task.status, to);
            task.updated_at = now;
            (from, to)
        }
        NodeInstance::Approval(approval) => {
            let to = ApprovalStateMachine.determine_target_state(approval.status, event)?;
            let from = std::mem::replace(&mut approval.status, to);
            if to == FlowNodeStatus::Executing {
                approval.entered_at = Some(now);
            }
            approval.updated_at = now;
            (from, to)
        }
        NodeInstance::Gateway(_) => return Err(StateMachineError::StatelessNode),
    };

    debug!(
        node_id = node.id(),
        flow_instance_id = node.flow_instance_id(),
        from = %from,
        to = %to,
        event = event.event_type(),
        "Node transition"
    );
    Ok(to)
}
