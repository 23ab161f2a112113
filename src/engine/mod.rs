//! # Process Engine
//!
//! A narrow process-engine seam plus the hand-rolled graph walker behind it.
//! The orchestrator only ever deploys a definition, starts a run, completes
//! the wait state a run is parked on, terminates a run and reads its
//! variables; gateways are routed with the condition mini-language.
//!
//! ## Architecture
//!
//! - `condition`: `${name}`, `${!name}`, `${name == literal}` expressions
//! - `variables`: per-run variable bindings
//! - `definition`: deployable graphs of elements and sequence flows
//! - `gateway`: first-match route selection with default flows
//! - `process_engine`: the `ProcessEngine` trait and its events
//! - `graph_engine`: `GraphProcessEngine`, state persisted through the store
//! - `adapter`: identity binding between nodes and engine activities

pub mod adapter;
pub mod condition;
pub mod definition;
pub mod gateway;
pub mod graph_engine;
pub mod process_engine;
pub mod variables;

pub use adapter::ProcessEngineAdapter;
pub use condition::{Condition, ConditionError};
pub use definition::{ElementType, FlowElement, ProcessDefinition, ProcessDefinitionBuilder, SequenceFlow};
pub use gateway::select_route;
pub use graph_engine::GraphProcessEngine;
pub use process_engine::{EngineEvent, ProcessEngine, ProcessRun, ProcessStart};
pub use variables::Variables;
