use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::definition::{ElementType, ProcessDefinition};
use super::variables::Variables;
use crate::error::FlowResult;
use crate::store::FlowTransaction;

/// Something the engine did while advancing a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The run reached a wait state
    ActivityStarted {
        activity_id: String,
        element_type: ElementType,
    },
    ActivityCompleted {
        activity_id: String,
        element_type: ElementType,
    },
    GatewayRouted {
        activity_id: String,
        target: String,
    },
    ProcessEnded {
        end_activity_id: String,
    },
}

/// Result of starting a run
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessStart {
    pub process_instance_id: String,
    pub events: Vec<EngineEvent>,
}

/// Persisted state of one process run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRun {
    pub id: String,
    pub definition_id: String,
    /// Wait states the run is parked on
    pub active: Vec<String>,
    pub variables: Variables,
    pub ended: bool,
}

/// Graph walker plus variable store, driven by the orchestrator
///
/// Every call works inside the caller's transaction.
#[async_trait]
pub trait ProcessEngine: Send + Sync + std::fmt::Debug {
    /// Deploy a definition; returns the assigned definition id
    async fn deploy(
        &self,
        tx: &mut dyn FlowTransaction,
        definition: ProcessDefinition,
    ) -> FlowResult<String>;

    async fn start(
        &self,
        tx: &mut dyn FlowTransaction,
        definition_id: &str,
        variables: Variables,
    ) -> FlowResult<ProcessStart>;

    /// Leave the wait state `activity_id`, merging `variables` first
    async fn complete(
        &self,
        tx: &mut dyn FlowTransaction,
        process_instance_id: &str,
        activity_id: &str,
        variables: Variables,
    ) -> FlowResult<Vec<EngineEvent>>;

    async fn terminate(
        &self,
        tx: &mut dyn FlowTransaction,
        process_instance_id: &str,
    ) -> FlowResult<()>;

    async fn variables(
        &self,
        tx: &mut dyn FlowTransaction,
        process_instance_id: &str,
    ) -> FlowResult<Variables>;
}
