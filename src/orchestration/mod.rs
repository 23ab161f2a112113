//! # Orchestration
//!
//! The binding of process runs to node instances and the background loops
//! that mutate the same persisted state.
//!
//! ## Core Components
//!
//! - **FlowLifecycle**: applies engine events to nodes, records approval
//!   decisions and task outcomes, re-projects flow status
//! - **HeartbeatRecoveryScheduler**: fails flows whose task heartbeat went
//!   stale
//! - **ApprovalExpirationScanner**: moves undecided approvals past their
//!   window to WAIT_FOR_CONFIRM

pub mod expiration;
pub mod heartbeat;
pub mod lifecycle;

pub use expiration::ApprovalExpirationScanner;
pub use heartbeat::{HeartbeatRecoveryScheduler, RecoveryReport};
pub use lifecycle::FlowLifecycle;
