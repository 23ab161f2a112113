//! # Services
//!
//! The caller-facing façade over flows and the node-local resources of their
//! tasks. Every operation takes a [`RequestContext`]; requests that must run
//! on the node owning a task are relayed through the
//! [`FlowForwarder`](crate::dispatch::FlowForwarder).

pub mod context;
pub mod flow_instance;
pub mod task_node;
pub mod types;

use std::sync::Arc;

use crate::approval::{RiskLevelSource, RoleDirectory};
use crate::config::FlowgateConfig;
use crate::dispatch::FlowForwarder;
use crate::events::EventPublisher;
use crate::execution::{ActiveTasks, AsyncExecutionRouter};
use crate::orchestration::FlowLifecycle;
use crate::store::FlowStore;

pub use context::RequestContext;
pub use flow_instance::FlowInstanceService;
pub use task_node::TaskNodeService;
pub use types::{CancelResult, FlowInstanceDetail, FlowMetaInfo};

/// Shared collaborators the services are built from
#[derive(Clone)]
pub struct ServiceComponents {
    pub store: Arc<dyn FlowStore>,
    pub lifecycle: FlowLifecycle,
    pub directory: Arc<dyn RoleDirectory>,
    pub risk_levels: Arc<dyn RiskLevelSource>,
    pub forwarder: FlowForwarder,
    pub router: Arc<AsyncExecutionRouter>,
    pub active: ActiveTasks,
    pub publisher: EventPublisher,
    pub config: Arc<FlowgateConfig>,
}

impl std::fmt::Debug for ServiceComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceComponents")
            .field("store", &self.store)
            .field("forwarder", &self.forwarder)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
