//! # Node State Machines
//!
//! Status machines for task and approval nodes plus the projection of node
//! statuses onto the owning flow instance.
//!
//! ## Architecture
//!
//! - `states`: `FlowStatus` and `FlowNodeStatus`
//! - `events`: `NodeEvent`, the triggers of node transitions
//! - `node_state_machine`: the shared `NodeStateMachine` trait, its task and
//!   approval implementations and `transition`, which dispatches on the node
//!   variant
//! - `projection`: flow status as a function of node statuses

pub mod errors;
pub mod events;
pub mod node_state_machine;
pub mod projection;
pub mod states;

pub use errors::StateMachineError;
pub use events::NodeEvent;
pub use node_state_machine::{transition, ApprovalStateMachine, NodeStateMachine, TaskStateMachine};
pub use projection::{project_flow_status, project_running_status};
pub use states::{FlowNodeStatus, FlowStatus};
