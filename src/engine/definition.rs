//! # Process Definitions
//!
//! The deployable graph a process run walks: typed elements connected by
//! sequence flows, each flow optionally guarded by a routing condition.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::condition::Condition;
use crate::error::{FlowError, FlowResult};
use crate::models::binding::ElementKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementType {
    StartEvent,
    EndEvent,
    ServiceTask,
    UserTask,
    ExclusiveGateway,
}

impl ElementType {
    /// Element kind a node binding refers to; start and end events have none
    pub fn element_kind(&self) -> Option<ElementKind> {
        match self {
            Self::ServiceTask => Some(ElementKind::ServiceTask),
            Self::UserTask => Some(ElementKind::UserTask),
            Self::ExclusiveGateway => Some(ElementKind::ExclusiveGateway),
            Self::StartEvent | Self::EndEvent => None,
        }
    }

    /// Elements a run parks on until someone completes them
    pub fn is_wait_state(&self) -> bool {
        matches!(self, Self::ServiceTask | Self::UserTask)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowElement {
    pub id: String,
    pub name: String,
    pub element_type: ElementType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceFlow {
    pub id: String,
    pub source: String,
    pub target: String,
    /// `None` marks the default flow of its source
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Assigned on deployment
    pub id: String,
    pub name: String,
    pub elements: Vec<FlowElement>,
    pub flows: Vec<SequenceFlow>,
}

impl ProcessDefinition {
    pub fn element(&self, id: &str) -> Option<&FlowElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn start_event(&self) -> FlowResult<&FlowElement> {
        self.elements
            .iter()
            .find(|e| e.element_type == ElementType::StartEvent)
            .ok_or_else(|| FlowError::Engine(format!("Process '{}' has no start event", self.name)))
    }

    pub fn outgoing(&self, source: &str) -> Vec<&SequenceFlow> {
        self.flows.iter().filter(|f| f.source == source).collect()
    }

    /// Structural checks run before deployment
    pub fn validate(&self) -> FlowResult<()> {
        let mut ids = HashSet::new();
        for element in &self.elements {
            if !ids.insert(element.id.as_str()) {
                return Err(FlowError::Engine(format!(
                    "Duplicate element id '{}'",
                    element.id
                )));
            }
        }

        let starts = self
            .elements
            .iter()
            .filter(|e| e.element_type == ElementType::StartEvent)
            .count();
        if starts != 1 {
            return Err(FlowError::Engine(format!(
                "Process '{}' must have exactly one start event, found {starts}",
                self.name
            )));
        }

        let mut outgoing: HashMap<&str, usize> = HashMap::new();
        for flow in &self.flows {
            for endpoint in [&flow.source, &flow.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(FlowError::Engine(format!(
                        "Sequence flow '{}' references unknown element '{endpoint}'",
                        flow.id
                    )));
                }
            }
            if let Some(condition) = &flow.condition {
                Condition::parse(condition)?;
            }
            *outgoing.entry(flow.source.as_str()).or_default() += 1;
        }

        for element in &self.elements {
            let count = outgoing.get(element.id.as_str()).copied().unwrap_or(0);
            match element.element_type {
                ElementType::EndEvent if count > 0 => {
                    return Err(FlowError::Engine(format!(
                        "End event '{}' must not have outgoing flows",
                        element.id
                    )))
                }
                ElementType::EndEvent => {}
                _ if count == 0 => {
                    return Err(FlowError::Engine(format!(
                        "Element '{}' has no outgoing flow",
                        element.id
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Incremental construction of a definition with generated ids
#[derive(Debug, Default)]
pub struct ProcessDefinitionBuilder {
    name: String,
    elements: Vec<FlowElement>,
    flows: Vec<SequenceFlow>,
}

impl ProcessDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add an element with an explicit id
    pub fn element(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        element_type: ElementType,
    ) -> String {
        let id = id.into();
        self.elements.push(FlowElement {
            id: id.clone(),
            name: name.into(),
            element_type,
        });
        id
    }

    pub fn flow(&mut self, source: &str, target: &str, condition: Option<String>) {
        let id = format!("flow_{}", self.flows.len() + 1);
        self.flows.push(SequenceFlow {
            id,
            source: source.to_string(),
            target: target.to_string(),
            condition,
        });
    }

    pub fn build(self) -> FlowResult<ProcessDefinition> {
        let definition = ProcessDefinition {
            id: String::new(),
            name: self.name,
            elements: self.elements,
            flows: self.flows,
        };
        definition.validate()?;
        Ok(definition)
    }
}
