use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::constants::events;
use crate::models::TaskType;

/// Flow lifecycle events broadcast to in-process subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    FlowCreated {
        flow_instance_id: i64,
        task_type: TaskType,
        creator_id: i64,
    },
    FlowApproved {
        flow_instance_id: i64,
        approval_node_id: i64,
        operator_id: Option<i64>,
    },
    FlowRejected {
        flow_instance_id: i64,
        approval_node_id: i64,
        operator_id: Option<i64>,
    },
    FlowCancelled {
        flow_instance_id: i64,
    },
    TaskStarted {
        flow_instance_id: i64,
        task_id: i64,
        task_type: TaskType,
    },
    TaskFinished {
        flow_instance_id: i64,
        task_id: i64,
        task_type: TaskType,
        succeeded: bool,
    },
}

impl FlowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FlowCreated { .. } => events::FLOW_CREATED,
            Self::FlowApproved { .. } => events::FLOW_APPROVED,
            Self::FlowRejected { .. } => events::FLOW_REJECTED,
            Self::FlowCancelled { .. } => events::FLOW_CANCELLED,
            Self::TaskStarted { .. } => events::TASK_STARTED,
            Self::TaskFinished { .. } => events::TASK_FINISHED,
        }
    }

    pub fn flow_instance_id(&self) -> i64 {
        match self {
            Self::FlowCreated { flow_instance_id, .. }
            | Self::FlowApproved { flow_instance_id, .. }
            | Self::FlowRejected { flow_instance_id, .. }
            | Self::FlowCancelled { flow_instance_id }
            | Self::TaskStarted { flow_instance_id, .. }
            | Self::TaskFinished { flow_instance_id, .. } => *flow_instance_id,
        }
    }
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: FlowEvent,
    pub published_at: DateTime<Utc>,
}

/// Broadcast publisher for flow lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscriber is not an error
    pub fn publish(&self, event: FlowEvent) {
        trace!(
            event = event.name(),
            flow_instance_id = event.flow_instance_id(),
            "Publishing flow event"
        );
        let _ = self.sender.send(PublishedEvent {
            event,
            published_at: Utc::now(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
