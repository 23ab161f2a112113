//! # Multi-Node Test Cluster
//!
//! Several flowgate nodes sharing one in-memory store. Nodes reach each
//! other through a loopback dispatcher that hands forwarded requests straight
//! to the target node's `FlowCommandHandler`, so forwarding is exercised end
//! to end without sockets.
//!
//! Background loops are disabled; tests drive heartbeat recovery and
//! approval expiry by calling a single pass directly.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let cluster = ClusterBuilder::new(2).with_approval().build().await?;
//! let flow = cluster.node(0).flows().create(&creator(), async_change("select 1")).await?;
//! cluster.wait_for_status(0, flow.id, FlowStatus::Approving).await?;
//! ```

#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

use flowgate_core::approval::{InMemoryRoleDirectory, StaticRiskLevelSource};
use flowgate_core::bootstrap::{FlowgateNode, NodeDependencies};
use flowgate_core::config::FlowgateConfig;
use flowgate_core::dispatch::{DispatchRequest, DispatchResponse, FlowCommandHandler, RequestDispatcher};
use flowgate_core::error::{FlowError, FlowResult};
use flowgate_core::execution::{ExecutorRegistry, FixedRiskLevelResolver};
use flowgate_core::models::{
    ApprovalFlowConfig, ApprovalNodeConfig, CreateFlowInstanceReq, ExecutorInfo, NodeInstance,
    RiskLevel, TaskEntity, TaskParameters, TaskType, User,
};
use flowgate_core::models::request::{DatabaseChangeParameters, ImportParameters};
use flowgate_core::service::RequestContext;
use flowgate_core::state_machine::FlowStatus;
use flowgate_core::store::{FlowStore, InMemoryFlowStore};

use super::executors::{registry_with, EchoExecutor};

pub const ORGANIZATION_ID: i64 = 1;
pub const OTHER_ORGANIZATION_ID: i64 = 2;
pub const CREATOR_ID: i64 = 10;
pub const APPROVER_ID: i64 = 20;
pub const BYSTANDER_ID: i64 = 30;
pub const FOREIGN_USER_ID: i64 = 40;
pub const DBA_ROLE_ID: i64 = 100;

/// Level every pre-check resolves to unless a test overrides it
pub const APPROVAL_RISK_LEVEL: i32 = 1;

const BASE_PORT: u16 = 18_000;
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub fn user(id: i64, organization_id: i64) -> User {
    User {
        id,
        name: format!("user-{id}"),
        account_name: format!("account-{id}"),
        organization_id,
    }
}

pub fn creator() -> RequestContext {
    RequestContext::new(user(CREATOR_ID, ORGANIZATION_ID))
}

pub fn approver() -> RequestContext {
    RequestContext::new(user(APPROVER_ID, ORGANIZATION_ID))
}

pub fn bystander() -> RequestContext {
    RequestContext::new(user(BYSTANDER_ID, ORGANIZATION_ID))
}

pub fn foreigner() -> RequestContext {
    RequestContext::new(user(FOREIGN_USER_ID, OTHER_ORGANIZATION_ID))
}

pub fn async_change(sql: &str) -> CreateFlowInstanceReq {
    let mut req = CreateFlowInstanceReq::new(
        TaskType::Async,
        TaskParameters::DatabaseChange(DatabaseChangeParameters {
            sql_content: sql.to_string(),
            delimiter: ";".to_string(),
            ..DatabaseChangeParameters::default()
        }),
    );
    req.connection_id = Some(7);
    req.database_id = Some(70);
    req.database_name = Some("orders".to_string());
    req
}

pub fn import_files(files: &[&str]) -> CreateFlowInstanceReq {
    let mut req = CreateFlowInstanceReq::new(
        TaskType::Import,
        TaskParameters::Import(ImportParameters {
            import_file_names: files.iter().map(|f| f.to_string()).collect(),
        }),
    );
    req.database_id = Some(70);
    req
}

/// Risk level routed through one approval decided by DBA role holders
pub fn dba_approval_level(level: i32) -> RiskLevel {
    RiskLevel {
        id: i64::from(level),
        level,
        name: format!("level-{level}"),
        approval_flow_config: ApprovalFlowConfig {
            id: i64::from(level),
            name: format!("dba-approval-{level}"),
            nodes: vec![ApprovalNodeConfig {
                role_id: Some(DBA_ROLE_ID),
                ..ApprovalNodeConfig::default()
            }],
            approval_expiration_interval_secs: 3600,
            ..ApprovalFlowConfig::default()
        },
    }
}

/// Risk level routed through `approvals` DBA approvals in sequence
pub fn dba_chain_level(level: i32, approvals: usize) -> RiskLevel {
    let mut risk_level = dba_approval_level(level);
    risk_level.approval_flow_config.nodes = vec![
        ApprovalNodeConfig {
            role_id: Some(DBA_ROLE_ID),
            ..ApprovalNodeConfig::default()
        };
        approvals
    ];
    risk_level
}

/// Risk level whose branch goes straight to the task chain
pub fn unguarded_level(level: i32) -> RiskLevel {
    RiskLevel {
        id: i64::from(level),
        level,
        name: format!("level-{level}"),
        approval_flow_config: ApprovalFlowConfig {
            id: i64::from(level),
            name: format!("no-approval-{level}"),
            ..ApprovalFlowConfig::default()
        },
    }
}

type PendingStep = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Forwards requests to registered nodes in-process and records every call
#[derive(Default)]
pub struct LoopbackDispatcher {
    handlers: Mutex<HashMap<ExecutorInfo, FlowCommandHandler>>,
    calls: Mutex<Vec<(ExecutorInfo, String)>>,
    before_next: Mutex<Option<PendingStep>>,
}

impl fmt::Debug for LoopbackDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackDispatcher")
            .field("nodes", &self.handlers.lock().len())
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

impl LoopbackDispatcher {
    /// Run `step` to completion before the next request reaches its target,
    /// so a test can change the cluster while a request is in flight
    pub fn before_next_forward<F>(&self, step: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        *self.before_next.lock() = Some(Box::pin(step));
    }

    pub fn register(&self, node: &FlowgateNode) {
        self.handlers
            .lock()
            .insert(node.local().clone(), node.handler().clone());
    }

    /// Make a node unreachable, as if it crashed
    pub fn disconnect(&self, target: &ExecutorInfo) {
        self.handlers.lock().remove(target);
    }

    pub fn calls(&self) -> Vec<(ExecutorInfo, String)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, target: &ExecutorInfo) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(node, _)| node == target)
            .count()
    }
}

#[async_trait]
impl RequestDispatcher for LoopbackDispatcher {
    async fn forward(
        &self,
        target: &ExecutorInfo,
        request: DispatchRequest,
    ) -> FlowResult<DispatchResponse> {
        self.calls.lock().push((target.clone(), request.path.clone()));
        let step = self.before_next.lock().take();
        if let Some(step) = step {
            step.await;
        }
        let handler = self.handlers.lock().get(target).cloned();
        match handler {
            Some(handler) => Ok(handler.handle(request).await),
            None => Err(FlowError::remote(&target.host, target.port, "connection refused")),
        }
    }
}

/// Builder for a test cluster
pub struct ClusterBuilder {
    node_count: usize,
    risk_levels: Vec<RiskLevel>,
    resolved_level: i32,
    registry: ExecutorRegistry,
    configure: Option<Box<dyn Fn(&mut FlowgateConfig)>>,
}

impl ClusterBuilder {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            risk_levels: vec![unguarded_level(0)],
            resolved_level: 0,
            registry: registry_with(EchoExecutor::default()),
            configure: None,
        }
    }

    /// Pre-checks resolve to a level guarded by one DBA approval
    pub fn with_approval(mut self) -> Self {
        self.risk_levels = vec![unguarded_level(0), dba_approval_level(APPROVAL_RISK_LEVEL)];
        self.resolved_level = APPROVAL_RISK_LEVEL;
        self
    }

    pub fn with_risk_levels(mut self, levels: Vec<RiskLevel>, resolved_level: i32) -> Self {
        self.risk_levels = levels;
        self.resolved_level = resolved_level;
        self
    }

    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Adjust every node's configuration after the harness defaults
    pub fn configure(mut self, configure: impl Fn(&mut FlowgateConfig) + 'static) -> Self {
        self.configure = Some(Box::new(configure));
        self
    }

    pub async fn build(self) -> Result<TestCluster> {
        let workspace = TempDir::new().context("creating cluster workspace")?;
        let store = Arc::new(InMemoryFlowStore::new());
        let directory = Arc::new(InMemoryRoleDirectory::new());
        for (id, organization_id) in [
            (CREATOR_ID, ORGANIZATION_ID),
            (APPROVER_ID, ORGANIZATION_ID),
            (BYSTANDER_ID, ORGANIZATION_ID),
            (FOREIGN_USER_ID, OTHER_ORGANIZATION_ID),
        ] {
            directory.add_user(user(id, organization_id));
        }
        directory.grant_role(APPROVER_ID, DBA_ROLE_ID);

        let risk_levels = Arc::new(StaticRiskLevelSource::new(self.risk_levels));
        let dispatcher = Arc::new(LoopbackDispatcher::default());

        let mut nodes = Vec::with_capacity(self.node_count);
        for index in 0..self.node_count {
            let mut config = node_config(index, &workspace)?;
            if let Some(configure) = &self.configure {
                configure(&mut config);
            }
            let deps = NodeDependencies::new(
                Arc::clone(&store) as Arc<dyn FlowStore>,
                directory.clone(),
                risk_levels.clone(),
                dispatcher.clone(),
            )
            .with_risk_level_resolver(Arc::new(FixedRiskLevelResolver(self.resolved_level)))
            .with_registry(self.registry.clone());
            let node = FlowgateNode::bootstrap(config, deps)
                .await
                .with_context(|| format!("bootstrapping node {index}"))?;
            dispatcher.register(&node);
            nodes.push(node);
        }

        Ok(TestCluster {
            store,
            directory,
            dispatcher,
            nodes,
            _workspace: workspace,
        })
    }
}

fn node_config(index: usize, workspace: &TempDir) -> Result<FlowgateConfig> {
    let port = BASE_PORT + u16::try_from(index)?;
    let root = workspace.path().join(format!("node-{index}"));
    let mut config = FlowgateConfig::default();
    config.node.host = "127.0.0.1".to_string();
    config.node.port = port;
    config.node.site_url = format!("http://127.0.0.1:{port}");
    config.heartbeat.enabled = false;
    config.expiration.enabled = false;
    config.executor.shutdown_wait_secs = 1;
    config.task_log.log_root = root.join("log");
    config.task_log.data_root = root.join("data");
    Ok(config)
}

pub struct TestCluster {
    pub store: Arc<InMemoryFlowStore>,
    pub directory: Arc<InMemoryRoleDirectory>,
    pub dispatcher: Arc<LoopbackDispatcher>,
    pub nodes: Vec<FlowgateNode>,
    _workspace: TempDir,
}

impl TestCluster {
    pub fn node(&self, index: usize) -> &FlowgateNode {
        &self.nodes[index]
    }

    pub fn info(&self, index: usize) -> ExecutorInfo {
        self.nodes[index].local().clone()
    }

    pub fn data_dir(&self, index: usize, task_id: i64) -> PathBuf {
        self.nodes[index]
            .config()
            .task_log
            .data_root
            .join(task_id.to_string())
    }

    /// Poll until the flow reaches `expected`
    pub async fn wait_for_status(
        &self,
        index: usize,
        flow_instance_id: i64,
        expected: FlowStatus,
    ) -> Result<()> {
        let ctx = RequestContext::forwarded(user(CREATOR_ID, ORGANIZATION_ID));
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let status = self.nodes[index]
                .flows()
                .get_status(&ctx, flow_instance_id)
                .await?;
            if status == expected {
                return Ok(());
            }
            if Instant::now() > deadline {
                bail!("flow instance {flow_instance_id} stuck in {status}, expected {expected}");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll until the target task of the flow is running somewhere
    pub async fn wait_for_running_task(&self, flow_instance_id: i64) -> Result<TaskEntity> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let task = self.target_task(flow_instance_id).await?;
            if task.executor.is_some() && !task.status.is_terminal() {
                return Ok(task);
            }
            if Instant::now() > deadline {
                bail!("target task of flow instance {flow_instance_id} never started");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn target_task(&self, flow_instance_id: i64) -> Result<TaskEntity> {
        Ok(self.nodes[0]
            .flows()
            .get_task_by_flow_instance_id(flow_instance_id)
            .await?)
    }

    /// Poll the shared store until the flow reaches `expected`; usable from
    /// a step that does not borrow the cluster
    pub async fn wait_for_stored_status(
        store: Arc<InMemoryFlowStore>,
        flow_instance_id: i64,
        expected: FlowStatus,
    ) -> Result<()> {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let status = {
                let mut tx = store.begin().await?;
                tx.find_flow_instance(flow_instance_id)
                    .await?
                    .map(|flow| flow.status)
            };
            if status == Some(expected) {
                return Ok(());
            }
            if Instant::now() > deadline {
                bail!("flow instance {flow_instance_id} stuck in {status:?}, expected {expected}");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn nodes_of(&self, flow_instance_id: i64) -> Result<Vec<NodeInstance>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_nodes(flow_instance_id).await?)
    }

    pub async fn shutdown(mut self) {
        for node in &mut self.nodes {
            node.shutdown().await;
        }
    }
}
