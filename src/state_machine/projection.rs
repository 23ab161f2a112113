//! # Flow Status Projection
//!
//! A flow's status is a function of its node statuses. Running statuses
//! follow the single active node; terminal statuses are decided once no node
//! is active any more. Dormant nodes on untaken branches are ignored.

use super::states::{FlowNodeStatus, FlowStatus};
use crate::models::node::NodeInstance;
use crate::models::task::TaskType;

/// Nodes currently holding the flow's "current step"
pub fn active_nodes(nodes: &[NodeInstance]) -> Vec<&NodeInstance> {
    nodes.iter().filter(|node| node.is_active()).collect()
}

/// Status of a flow whose current step is `node`
pub fn running_status_for(node: &NodeInstance) -> Option<FlowStatus> {
    match node {
        NodeInstance::Approval(approval) => match approval.status {
            FlowNodeStatus::Executing => Some(FlowStatus::Approving),
            FlowNodeStatus::WaitForConfirm => Some(FlowStatus::WaitForConfirm),
            _ => None,
        },
        NodeInstance::Task(task) => {
            if task.task_type == TaskType::PreCheck && task.status.is_active() {
                return Some(FlowStatus::Created);
            }
            match task.status {
                FlowNodeStatus::Pending => Some(FlowStatus::WaitForExecution),
                FlowNodeStatus::Executing => Some(FlowStatus::Executing),
                _ => None,
            }
        }
        NodeInstance::Gateway(_) => None,
    }
}

/// Running status of a flow, `None` when no node is active
pub fn project_running_status(nodes: &[NodeInstance]) -> Option<FlowStatus> {
    active_nodes(nodes)
        .into_iter()
        .find_map(running_status_for)
}

/// Terminal status of a flow, `None` while any node is still active or
/// before any node has finished
pub fn project_flow_status(nodes: &[NodeInstance]) -> Option<FlowStatus> {
    let stateful: Vec<(&NodeInstance, FlowNodeStatus)> = nodes
        .iter()
        .filter_map(|node| node.status().map(|status| (node, status)))
        .collect();

    if stateful.iter().any(|(_, status)| status.is_active()) {
        return None;
    }
    if !stateful.iter().any(|(_, status)| status.is_terminal()) {
        return None;
    }

    let rejected = stateful.iter().any(|(node, status)| {
        matches!(node, NodeInstance::Approval(_)) && *status == FlowNodeStatus::Rejected
    });
    if rejected {
        return Some(FlowStatus::Rejected);
    }

    let finished_tasks: Vec<(TaskType, FlowNodeStatus)> = stateful
        .iter()
        .filter(|(_, status)| status.is_terminal())
        .filter_map(|(node, status)| node.as_task().map(|task| (task.task_type, *status)))
        .collect();

    if let Some((task_type, _)) = finished_tasks
        .iter()
        .find(|(_, status)| *status == FlowNodeStatus::Failed)
    {
        return Some(if *task_type == TaskType::PreCheck {
            FlowStatus::PreCheckFailed
        } else {
            FlowStatus::ExecutionFailed
        });
    }
    if finished_tasks
        .iter()
        .any(|(_, status)| *status == FlowNodeStatus::Expired)
    {
        return Some(FlowStatus::ExecutionExpired);
    }

    let main_tasks: Vec<FlowNodeStatus> = finished_tasks
        .iter()
        .filter(|(task_type, _)| !task_type.is_auxiliary())
        .map(|(_, status)| *status)
        .collect();
    if !main_tasks.is_empty() && main_tasks.iter().all(|s| *s == FlowNodeStatus::Completed) {
        return Some(FlowStatus::Completed);
    }

    Some(FlowStatus::Cancelled)
}

/// Whether a flow status is consistent with its nodes
///
/// A terminal flow must have no active node. A flow forced to CANCELLED by
/// the best-effort cancellation path is the documented exception and is not
/// checked here.
pub fn is_consistent(flow_status: FlowStatus, nodes: &[NodeInstance]) -> bool {
    if flow_status.is_terminal() {
        active_nodes(nodes).is_empty()
    } else {
        active_nodes(nodes).len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::node::{ApprovalNode, ExecutionStrategy, GatewayNode, TaskNode};
    use chrono::Utc;
    use FlowNodeStatus::*;

    fn task(task_type: TaskType, status: FlowNodeStatus) -> NodeInstance {
        let now = Utc::now();
        NodeInstance::Task(TaskNode {
            id: 0,
            flow_instance_id: 1,
            status,
            task_type,
            target_task_id: Some(1),
            strategy: ExecutionStrategy::Auto,
            created_at: now,
            updated_at: now,
        })
    }

    fn approval(status: FlowNodeStatus) -> NodeInstance {
        let now = Utc::now();
        NodeInstance::Approval(ApprovalNode {
            id: 0,
            flow_instance_id: 1,
            status,
            auto_approve: false,
            expire_interval_secs: None,
            external_approval_id: None,
            external_flow_instance_id: None,
            operator_id: None,
            comment: None,
            entered_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn gateway() -> NodeInstance {
        NodeInstance::Gateway(GatewayNode {
            id: 0,
            flow_instance_id: 1,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_running_status_follows_active_node() {
        let nodes = vec![
            task(TaskType::PreCheck, Completed),
            gateway(),
            approval(Approved),
            approval(Executing),
            task(TaskType::Async, Created),
        ];
        assert_eq!(project_running_status(&nodes), Some(FlowStatus::Approving));
        assert_eq!(project_flow_status(&nodes), None);

        let nodes = vec![task(TaskType::PreCheck, Executing), approval(Created)];
        assert_eq!(project_running_status(&nodes), Some(FlowStatus::Created));

        let nodes = vec![approval(Approved), task(TaskType::Async, Pending)];
        assert_eq!(project_running_status(&nodes), Some(FlowStatus::WaitForExecution));
    }

    #[test]
    fn test_completed_requires_main_task_completed() {
        let nodes = vec![
            task(TaskType::PreCheck, Completed),
            approval(Approved),
            task(TaskType::GenerateRollback, Completed),
            task(TaskType::Async, Completed),
            // Untaken risk branch
            approval(Created),
        ];
        assert_eq!(project_flow_status(&nodes), Some(FlowStatus::Completed));
    }

    #[test]
    fn test_rejection_wins() {
        let nodes = vec![
            task(TaskType::PreCheck, Completed),
            approval(Approved),
            approval(Rejected),
            task(TaskType::Async, Created),
        ];
        assert_eq!(project_flow_status(&nodes), Some(FlowStatus::Rejected));
    }

    #[test]
    fn test_failures() {
        let nodes = vec![task(TaskType::PreCheck, Failed), approval(Created)];
        assert_eq!(project_flow_status(&nodes), Some(FlowStatus::PreCheckFailed));

        let nodes = vec![approval(Approved), task(TaskType::Export, Failed)];
        assert_eq!(project_flow_status(&nodes), Some(FlowStatus::ExecutionFailed));

        let nodes = vec![approval(Approved), task(TaskType::Export, Expired)];
        assert_eq!(project_flow_status(&nodes), Some(FlowStatus::ExecutionExpired));
    }

    #[test]
    fn test_cancelled_projection() {
        let nodes = vec![task(TaskType::PreCheck, Completed), approval(Cancelled)];
        assert_eq!(project_flow_status(&nodes), Some(FlowStatus::Cancelled));

        let nodes = vec![
            task(TaskType::MultipleAsync, Completed),
            task(TaskType::MultipleAsync, Cancelled),
        ];
        assert_eq!(project_flow_status(&nodes), Some(FlowStatus::Cancelled));
    }

    #[test]
    fn test_never_terminal_while_active() {
        let nodes = vec![approval(Rejected), task(TaskType::Async, Executing)];
        assert_eq!(project_flow_status(&nodes), None);
        assert!(!is_consistent(FlowStatus::Rejected, &nodes));
        assert!(is_consistent(FlowStatus::Executing, &nodes));
    }

    #[test]
    fn test_nothing_finished_yet() {
        let nodes = vec![task(TaskType::PreCheck, Created), gateway()];
        assert_eq!(project_flow_status(&nodes), None);
        assert_eq!(project_running_status(&nodes), None);
    }
}
