//! # Node Bootstrap
//!
//! Wires one flowgate node from its configuration and the collaborators
//! supplied by the embedding application, and owns the background loops.
//!
//! ## Startup
//!
//! 1. Validate the configuration
//! 2. Register the built-in pre-check executor unless one was supplied
//! 3. Build the job runner and the execution router pools
//! 4. Build the services and the forwarded-request handler
//! 5. Spawn the heartbeat recovery scheduler and the approval expiration
//!    scanner when enabled
//!
//! ## Shutdown
//!
//! Flows running on this node are cancelled first, then the loops are
//! stopped and the router pools drained with a bounded wait.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::approval::{ExternalApprovalClient, NoopExternalApprovalClient, RiskLevelSource, RoleDirectory};
use crate::config::FlowgateConfig;
use crate::constants::DEFAULT_RISK_LEVEL;
use crate::dispatch::{DispatchChecker, FlowCommandHandler, FlowForwarder, RequestDispatcher};
use crate::engine::{GraphProcessEngine, ProcessEngine};
use crate::error::FlowResult;
use crate::events::EventPublisher;
use crate::execution::{
    ActiveTasks, AsyncExecutionRouter, ExecutorRegistry, FixedRiskLevelResolver, PreCheckExecutor,
    RiskLevelResolver, TaskJobRunner, TaskNodeExecutor,
};
use crate::models::{ExecutorInfo, TaskType};
use crate::orchestration::{ApprovalExpirationScanner, FlowLifecycle, HeartbeatRecoveryScheduler};
use crate::service::{FlowInstanceService, ServiceComponents, TaskNodeService};
use crate::store::FlowStore;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Collaborators a node is built from
pub struct NodeDependencies {
    pub store: Arc<dyn FlowStore>,
    pub directory: Arc<dyn RoleDirectory>,
    pub risk_levels: Arc<dyn RiskLevelSource>,
    pub dispatcher: Arc<dyn RequestDispatcher>,
    pub engine: Arc<dyn ProcessEngine>,
    pub external_approvals: Arc<dyn ExternalApprovalClient>,
    pub risk_level_resolver: Arc<dyn RiskLevelResolver>,
    pub registry: ExecutorRegistry,
}

impl NodeDependencies {
    /// Defaults: the graph engine, no external approval system, every
    /// pre-check resolving to the default risk level, no task executors
    pub fn new(
        store: Arc<dyn FlowStore>,
        directory: Arc<dyn RoleDirectory>,
        risk_levels: Arc<dyn RiskLevelSource>,
        dispatcher: Arc<dyn RequestDispatcher>,
    ) -> Self {
        Self {
            store,
            directory,
            risk_levels,
            dispatcher,
            engine: Arc::new(GraphProcessEngine::new()),
            external_approvals: Arc::new(NoopExternalApprovalClient),
            risk_level_resolver: Arc::new(FixedRiskLevelResolver(DEFAULT_RISK_LEVEL)),
            registry: ExecutorRegistry::new(),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn ProcessEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_external_approvals(mut self, client: Arc<dyn ExternalApprovalClient>) -> Self {
        self.external_approvals = client;
        self
    }

    pub fn with_risk_level_resolver(mut self, resolver: Arc<dyn RiskLevelResolver>) -> Self {
        self.risk_level_resolver = resolver;
        self
    }

    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = registry;
        self
    }
}

impl std::fmt::Debug for NodeDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDependencies")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// A running node
pub struct FlowgateNode {
    config: Arc<FlowgateConfig>,
    local: ExecutorInfo,
    store: Arc<dyn FlowStore>,
    flows: FlowInstanceService,
    tasks: TaskNodeService,
    handler: FlowCommandHandler,
    router: Arc<AsyncExecutionRouter>,
    publisher: EventPublisher,
    active: ActiveTasks,
    heartbeat: HeartbeatRecoveryScheduler,
    expiration: ApprovalExpirationScanner,
    loops: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for FlowgateNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowgateNode")
            .field("local", &self.local)
            .field("loops", &self.loops.len())
            .finish_non_exhaustive()
    }
}

impl FlowgateNode {
    pub async fn bootstrap(config: FlowgateConfig, deps: NodeDependencies) -> FlowResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let local = config.node.executor_info();
        info!(node = %local, "🚀 BOOTSTRAP: Starting flowgate node");

        let lifecycle = FlowLifecycle::new(deps.engine, deps.external_approvals);
        let active = ActiveTasks::new();
        let publisher = EventPublisher::new(EVENT_CHANNEL_CAPACITY);

        let mut registry = deps.registry;
        if !registry.supports(TaskType::PreCheck) {
            let resolver = deps.risk_level_resolver;
            registry.register(TaskType::PreCheck, move || {
                Box::new(PreCheckExecutor::new(Arc::clone(&resolver))) as Box<dyn TaskNodeExecutor>
            });
        }
        info!(registry = ?registry, "✅ BOOTSTRAP: Task executors registered");

        let runner = TaskJobRunner::new(
            Arc::clone(&deps.store),
            lifecycle.clone(),
            Arc::new(registry),
            active.clone(),
            publisher.clone(),
            local.clone(),
            config.heartbeat.clone(),
            config.task_log.clone(),
        );
        let router = AsyncExecutionRouter::new(&config.executor, Arc::new(runner));

        let forwarder = FlowForwarder::new(
            DispatchChecker::new(local.clone()),
            deps.dispatcher,
            config.dispatch.forwarded_by_header.clone(),
        );
        let components = ServiceComponents {
            store: Arc::clone(&deps.store),
            lifecycle: lifecycle.clone(),
            directory: deps.directory,
            risk_levels: deps.risk_levels,
            forwarder,
            router: Arc::clone(&router),
            active: active.clone(),
            publisher: publisher.clone(),
            config: Arc::clone(&config),
        };
        let flows = FlowInstanceService::new(components.clone());
        let tasks = TaskNodeService::new(components);
        let handler = FlowCommandHandler::new(flows.clone(), tasks.clone(), local.clone());

        let heartbeat = HeartbeatRecoveryScheduler::new(Arc::clone(&deps.store), config.heartbeat.clone());
        let expiration = ApprovalExpirationScanner::new(
            Arc::clone(&deps.store),
            lifecycle,
            config.expiration.clone(),
        );

        let mut loops = Vec::new();
        if config.heartbeat.enabled {
            let scheduler = heartbeat.clone();
            loops.push(tokio::spawn(async move { scheduler.run().await }));
        } else {
            warn!("Heartbeat recovery is disabled; flows of crashed nodes stay EXECUTING");
        }
        if config.expiration.enabled {
            let scanner = expiration.clone();
            loops.push(tokio::spawn(async move { scanner.run().await }));
        }

        info!(node = %local, loops = loops.len(), "✅ BOOTSTRAP: Flowgate node ready");
        Ok(Self {
            config,
            local,
            store: deps.store,
            flows,
            tasks,
            handler,
            router,
            publisher,
            active,
            heartbeat,
            expiration,
            loops,
        })
    }

    pub fn config(&self) -> &FlowgateConfig {
        &self.config
    }

    pub fn local(&self) -> &ExecutorInfo {
        &self.local
    }

    pub fn store(&self) -> &Arc<dyn FlowStore> {
        &self.store
    }

    pub fn flows(&self) -> &FlowInstanceService {
        &self.flows
    }

    pub fn tasks(&self) -> &TaskNodeService {
        &self.tasks
    }

    /// Entry point for requests relayed by other nodes
    pub fn handler(&self) -> &FlowCommandHandler {
        &self.handler
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn active_tasks(&self) -> &ActiveTasks {
        &self.active
    }

    pub fn heartbeat_scheduler(&self) -> &HeartbeatRecoveryScheduler {
        &self.heartbeat
    }

    pub fn expiration_scanner(&self) -> &ApprovalExpirationScanner {
        &self.expiration
    }

    /// Cancel local running flows, stop the loops and drain the pools;
    /// returns whether every pool drained in time
    pub async fn shutdown(&mut self) -> bool {
        info!(node = %self.local, "🛑 Shutting down flowgate node");
        let cancelled = self.flows.cancel_active_on_shutdown().await;
        for handle in self.loops.drain(..) {
            handle.abort();
        }
        let drained = self.router.shutdown().await;
        if drained {
            info!(cancelled_flows = cancelled.len(), "✅ Flowgate node stopped");
        } else {
            warn!(
                cancelled_flows = cancelled.len(),
                "Flowgate node stopped before every pool drained"
            );
        }
        drained
    }
}

/// Connect to PostgreSQL and create the schema when missing
#[cfg(feature = "postgres")]
pub async fn postgres_store(
    config: &crate::config::DatabaseConfig,
) -> FlowResult<Arc<dyn FlowStore>> {
    let store = crate::store::PgFlowStore::connect(config).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}
