//! # Process Engine Adapter
//!
//! Identity binding between the node model and process runs: flow instance
//! to process instance / definition, node to activity id and back. Nothing
//! here executes; it only resolves and records identities, failing hard when
//! more than one record claims the same identity.

use tracing::debug;

use crate::error::{verify, verify_singleton, FlowError, FlowResult};
use crate::models::{ElementBinding, ElementKind, FlowInstance, NodeInstance, NodeKind};
use crate::store::FlowTransaction;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEngineAdapter;

impl ProcessEngineAdapter {
    pub fn new() -> Self {
        Self
    }

    pub async fn flow_instance_by_process_instance_id(
        &self,
        tx: &mut dyn FlowTransaction,
        process_instance_id: &str,
    ) -> FlowResult<Option<FlowInstance>> {
        let mut flows = tx
            .find_flows_by_process_instance_ids(&[process_instance_id.to_string()])
            .await?;
        match flows.len() {
            0 => Ok(None),
            1 => Ok(flows.pop()),
            n => Err(FlowError::consistency(format!(
                "{n} flow instances are bound to process instance {process_instance_id}"
            ))),
        }
    }

    pub async fn flow_instance_id_by_process_instance_id(
        &self,
        tx: &mut dyn FlowTransaction,
        process_instance_id: &str,
    ) -> FlowResult<Option<i64>> {
        Ok(self
            .flow_instance_by_process_instance_id(tx, process_instance_id)
            .await?
            .map(|f| f.id))
    }

    pub async fn process_instance_id_by_flow_instance_id(
        &self,
        tx: &mut dyn FlowTransaction,
        flow_instance_id: i64,
    ) -> FlowResult<Option<String>> {
        Ok(tx
            .find_flow_instance(flow_instance_id)
            .await?
            .and_then(|f| f.process_instance_id))
    }

    pub async fn process_definition_id_by_flow_instance_id(
        &self,
        tx: &mut dyn FlowTransaction,
        flow_instance_id: i64,
    ) -> FlowResult<Option<String>> {
        Ok(tx
            .find_flow_instance(flow_instance_id)
            .await?
            .and_then(|f| f.process_definition_id))
    }

    /// Process instance of a flow that must already be running
    pub async fn require_process_instance_id(
        &self,
        tx: &mut dyn FlowTransaction,
        flow_instance_id: i64,
    ) -> FlowResult<String> {
        self.process_instance_id_by_flow_instance_id(tx, flow_instance_id)
            .await?
            .ok_or_else(|| {
                FlowError::consistency(format!(
                    "Flow instance {flow_instance_id} is not bound to a process instance"
                ))
            })
    }

    pub async fn set_process_instance_id(
        &self,
        tx: &mut dyn FlowTransaction,
        flow_instance_id: i64,
        process_instance_id: &str,
    ) -> FlowResult<()> {
        let affected = tx
            .set_process_instance_id(flow_instance_id, process_instance_id)
            .await?;
        verify(
            affected == 1,
            format!("Binding process instance to flow {flow_instance_id} affected {affected} rows"),
        )
    }

    pub async fn set_process_definition_id(
        &self,
        tx: &mut dyn FlowTransaction,
        flow_instance_id: i64,
        process_definition_id: &str,
    ) -> FlowResult<()> {
        let affected = tx
            .set_process_definition_id(flow_instance_id, process_definition_id)
            .await?;
        verify(
            affected == 1,
            format!("Binding process definition to flow {flow_instance_id} affected {affected} rows"),
        )
    }

    /// Activity id of a node for one element kind
    pub async fn activity_id(
        &self,
        tx: &mut dyn FlowTransaction,
        flow_instance_id: i64,
        node_id: i64,
        node_kind: NodeKind,
        element_kind: ElementKind,
    ) -> FlowResult<String> {
        let matches: Vec<String> = tx
            .list_bindings(flow_instance_id)
            .await?
            .into_iter()
            .filter(|b| b.node_id == node_id && b.node_kind == node_kind && b.element_kind == element_kind)
            .map(|b| b.activity_id)
            .collect();
        if matches.is_empty() {
            return Err(FlowError::not_found(
                "ElementBinding",
                "node_id",
                format!("{node_id} ({node_kind}, {element_kind})"),
            ));
        }
        verify_singleton(matches, "Activity binding")
    }

    /// Node a process activity belongs to
    pub async fn node_by_activity_id(
        &self,
        tx: &mut dyn FlowTransaction,
        flow_instance_id: i64,
        activity_id: &str,
    ) -> FlowResult<NodeInstance> {
        let bindings: Vec<ElementBinding> = tx
            .list_bindings(flow_instance_id)
            .await?
            .into_iter()
            .filter(|b| b.activity_id == activity_id)
            .collect();
        if bindings.is_empty() {
            return Err(FlowError::not_found("ElementBinding", "activity_id", activity_id));
        }
        let binding = verify_singleton(bindings, "Node bound to activity")?;
        tx.find_node(binding.node_kind, binding.node_id)
            .await?
            .ok_or_else(|| FlowError::not_found("NodeInstance", "id", binding.node_id))
    }

    /// Record a binding unless an equivalent one exists already
    pub async fn bind(
        &self,
        tx: &mut dyn FlowTransaction,
        binding: ElementBinding,
    ) -> FlowResult<ElementBinding> {
        let existing = tx.list_bindings(binding.flow_instance_id).await?.into_iter().find(|b| {
            b.node_id == binding.node_id
                && b.node_kind == binding.node_kind
                && b.element_kind == binding.element_kind
                && (b.activity_id == binding.activity_id || b.name == binding.name)
        });
        if let Some(existing) = existing {
            debug!(
                node_id = binding.node_id,
                activity_id = %existing.activity_id,
                "Element binding already present"
            );
            return Ok(existing);
        }
        tx.insert_binding(binding).await
    }
}
