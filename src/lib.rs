#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Flowgate Core
//!
//! Approval-gated orchestration of database change tickets.
//!
//! ## Overview
//!
//! A ticket (a SQL change, an import or export, a permission request, ...)
//! becomes a **flow instance**: a small graph of task, approval and gateway
//! nodes executed by an embedded BPMN-style process engine. A pre-check task
//! publishes the ticket's risk level, a gateway routes it to the approval
//! chain configured for that level, and once approved the target task runs on
//! one node of the cluster.
//!
//! ## Architecture
//!
//! - **State is authoritative in the store.** Node and flow statuses are
//!   persisted; the flow status is always re-projected from its nodes.
//! - **One transaction per operation.** Engine state lives behind the same
//!   [`store::FlowTransaction`], so the process run and the node rows commit
//!   or roll back together.
//! - **Execution affinity.** A running task's logs and files live on the node
//!   running it; operations on them are relayed to that node.
//! - **Background loops.** Stale heartbeats fail flows of crashed nodes, and
//!   undecided approvals expire to WAIT_FOR_CONFIRM.
//!
//! ## Module Organization
//!
//! - [`models`] - flow instances, nodes, tasks, approvals, requests
//! - [`state_machine`] - node transitions and flow status projection
//! - [`engine`] - process definitions, conditions and the graph engine
//! - [`topology`] - flow graphs built from requests and risk levels
//! - [`approval`] - candidate resolution, role directory, risk levels
//! - [`orchestration`] - lifecycle binding, heartbeat recovery, expiry
//! - [`execution`] - executors, worker pools, job runner, task logs
//! - [`dispatch`] - ownership checks and cross-node forwarding
//! - [`service`] - the caller-facing flow and task services
//! - [`store`] - in-memory and PostgreSQL persistence
//! - [`bootstrap`] - wiring one node together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowgate_core::approval::{InMemoryRoleDirectory, StaticRiskLevelSource};
//! use flowgate_core::bootstrap::{FlowgateNode, NodeDependencies};
//! use flowgate_core::config::FlowgateConfig;
//! use flowgate_core::dispatch::HttpRequestDispatcher;
//! use flowgate_core::store::InMemoryFlowStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FlowgateConfig::default();
//! let dispatcher = HttpRequestDispatcher::new(config.dispatch.clone())?;
//! let deps = NodeDependencies::new(
//!     Arc::new(InMemoryFlowStore::new()),
//!     Arc::new(InMemoryRoleDirectory::new()),
//!     Arc::new(StaticRiskLevelSource::new(Vec::new())),
//!     Arc::new(dispatcher),
//! );
//! let mut node = FlowgateNode::bootstrap(config, deps).await?;
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod service;
pub mod sql;
pub mod state_machine;
pub mod store;
pub mod topology;

pub use bootstrap::{FlowgateNode, NodeDependencies};
pub use config::{ConfigManager, FlowgateConfig};
pub use error::{FlowError, FlowResult};
pub use models::{CreateFlowInstanceReq, FlowInstance, TaskParameters, TaskType};
pub use service::{FlowInstanceService, RequestContext, TaskNodeService};
pub use state_machine::{FlowNodeStatus, FlowStatus};
