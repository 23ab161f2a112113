use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::definition::{ElementType, ProcessDefinition};
use super::gateway::select_route;
use super::process_engine::{EngineEvent, ProcessEngine, ProcessRun, ProcessStart};
use super::variables::Variables;
use crate::error::{FlowError, FlowResult};
use crate::store::FlowTransaction;

/// Directed-graph walker over [`ProcessDefinition`]s
///
/// Service and user tasks are wait states; start events, gateways and end
/// events are passed through within the same call.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphProcessEngine;

impl GraphProcessEngine {
    pub fn new() -> Self {
        Self
    }

    async fn load_definition(
        tx: &mut dyn FlowTransaction,
        id: &str,
    ) -> FlowResult<ProcessDefinition> {
        tx.find_process_definition(id)
            .await?
            .ok_or_else(|| FlowError::not_found("ProcessDefinition", "id", id))
    }

    async fn load_run(tx: &mut dyn FlowTransaction, id: &str) -> FlowResult<ProcessRun> {
        tx.find_process_run(id)
            .await?
            .ok_or_else(|| FlowError::not_found("ProcessRun", "id", id))
    }

    /// Follow the route out of `from` until the run parks or ends
    fn walk(
        definition: &ProcessDefinition,
        run: &mut ProcessRun,
        from: &str,
        events: &mut Vec<EngineEvent>,
    ) -> FlowResult<()> {
        let max_steps = definition.elements.len() + 1;
        let mut current = from.to_string();

        for _ in 0..max_steps {
            let outgoing = definition.outgoing(&current);
            let route = select_route(&outgoing, &run.variables)?;
            let target = definition.element(&route.target).ok_or_else(|| {
                FlowError::Engine(format!("Unknown element '{}'", route.target))
            })?;

            match target.element_type {
                ElementType::ServiceTask | ElementType::UserTask => {
                    run.active.push(target.id.clone());
                    events.push(EngineEvent::ActivityStarted {
                        activity_id: target.id.clone(),
                        element_type: target.element_type,
                    });
                    return Ok(());
                }
                ElementType::EndEvent => {
                    run.active.clear();
                    run.ended = true;
                    events.push(EngineEvent::ProcessEnded {
                        end_activity_id: target.id.clone(),
                    });
                    return Ok(());
                }
                ElementType::ExclusiveGateway => {
                    let next = select_route(&definition.outgoing(&target.id), &run.variables)?;
                    events.push(EngineEvent::GatewayRouted {
                        activity_id: target.id.clone(),
                        target: next.target.clone(),
                    });
                    current = target.id.clone();
                }
                ElementType::StartEvent => {
                    return Err(FlowError::Engine(format!(
                        "Flow into start event '{}'",
                        target.id
                    )))
                }
            }
        }

        Err(FlowError::Engine(format!(
            "Process '{}' loops without reaching a wait state",
            definition.name
        )))
    }
}

#[async_trait]
impl ProcessEngine for GraphProcessEngine {
    async fn deploy(
        &self,
        tx: &mut dyn FlowTransaction,
        mut definition: ProcessDefinition,
    ) -> FlowResult<String> {
        definition.validate()?;
        definition.id = format!("{}:{}", definition.name, Uuid::new_v4());
        tx.save_process_definition(&definition).await?;
        debug!(definition_id = %definition.id, "Process definition deployed");
        Ok(definition.id)
    }

    async fn start(
        &self,
        tx: &mut dyn FlowTransaction,
        definition_id: &str,
        variables: Variables,
    ) -> FlowResult<ProcessStart> {
        let definition = Self::load_definition(tx, definition_id).await?;
        let start = definition.start_event()?.id.clone();

        let mut run = ProcessRun {
            id: Uuid::new_v4().to_string(),
            definition_id: definition_id.to_string(),
            active: Vec::new(),
            variables,
            ended: false,
        };
        let mut events = Vec::new();
        Self::walk(&definition, &mut run, &start, &mut events)?;
        tx.save_process_run(&run).await?;

        debug!(
            process_instance_id = %run.id,
            definition_id = %definition_id,
            events = events.len(),
            "Process run started"
        );
        Ok(ProcessStart {
            process_instance_id: run.id,
            events,
        })
    }

    async fn complete(
        &self,
        tx: &mut dyn FlowTransaction,
        process_instance_id: &str,
        activity_id: &str,
        variables: Variables,
    ) -> FlowResult<Vec<EngineEvent>> {
        let mut run = Self::load_run(tx, process_instance_id).await?;
        if run.ended {
            return Err(FlowError::Engine(format!(
                "Process run {process_instance_id} has already ended"
            )));
        }
        let position = run
            .active
            .iter()
            .position(|a| a == activity_id)
            .ok_or_else(|| {
                FlowError::Engine(format!(
                    "Process run {process_instance_id} is not waiting at '{activity_id}'"
                ))
            })?;

        let definition = Self::load_definition(tx, &run.definition_id).await?;
        let element_type = definition
            .element(activity_id)
            .map(|e| e.element_type)
            .ok_or_else(|| FlowError::Engine(format!("Unknown element '{activity_id}'")))?;

        run.active.remove(position);
        run.variables.merge(variables);
        let mut events = vec![EngineEvent::ActivityCompleted {
            activity_id: activity_id.to_string(),
            element_type,
        }];
        Self::walk(&definition, &mut run, activity_id, &mut events)?;
        tx.save_process_run(&run).await?;
        Ok(events)
    }

    async fn terminate(
        &self,
        tx: &mut dyn FlowTransaction,
        process_instance_id: &str,
    ) -> FlowResult<()> {
        let mut run = Self::load_run(tx, process_instance_id).await?;
        if run.ended {
            return Ok(());
        }
        run.active.clear();
        run.ended = true;
        tx.save_process_run(&run).await?;
        debug!(process_instance_id = %process_instance_id, "Process run terminated");
        Ok(())
    }

    async fn variables(
        &self,
        tx: &mut dyn FlowTransaction,
        process_instance_id: &str,
    ) -> FlowResult<Variables> {
        Ok(Self::load_run(tx, process_instance_id).await?.variables)
    }
}
