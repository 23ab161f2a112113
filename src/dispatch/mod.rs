//! # Cross-Node Dispatch
//!
//! Task work and its files live on the node that ran (or, for imports,
//! received) the task. Operations touching them are relayed to that node:
//!
//! - `checker`: which node owns a task
//! - `command`: the relayable flow commands and their request encoding
//! - `wire`: request / response envelopes and binary attachments
//! - `dispatcher`: the `RequestDispatcher` transport seam and its HTTP client
//! - `forwarder`: local-or-remote decision plus relaying
//! - `handler`: serves relayed requests against the local services

pub mod checker;
pub mod command;
pub mod dispatcher;
pub mod forwarder;
pub mod handler;
pub mod wire;

pub use checker::DispatchChecker;
pub use command::{user_from_request, FlowCommand, FLOW_INSTANCES_PATH};
pub use dispatcher::{HttpRequestDispatcher, RequestDispatcher};
pub use forwarder::FlowForwarder;
pub use handler::FlowCommandHandler;
pub use wire::{
    BinaryDataResult, DispatchMethod, DispatchRequest, DispatchResponse, ErrorDetail, ErrorResponse,
    SuccessResponse,
};
