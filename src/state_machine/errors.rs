use thiserror::Error;

use super::states::FlowNodeStatus;

/// Error types for node state machine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid {node_type} transition from {from} on event '{event}'")]
    InvalidTransition {
        node_type: &'static str,
        from: FlowNodeStatus,
        event: &'static str,
    },

    #[error("Gateway nodes carry no status")]
    StatelessNode,
}
