use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::TaskType;

/// A task node that became ready to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskJob {
    pub flow_instance_id: i64,
    /// Task type of the owning flow; selects the worker pool
    pub flow_task_type: TaskType,
    pub node_id: i64,
    pub task_type: TaskType,
    pub task_id: i64,
    pub process_instance_id: String,
    pub activity_id: String,
}

/// Flows with a task currently executing on this node, keyed by flow
/// instance id, each with a cancellation signal
#[derive(Debug, Clone, Default)]
pub struct ActiveTasks {
    inner: Arc<DashMap<i64, watch::Sender<bool>>>,
}

impl ActiveTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, flow_instance_id: i64) -> watch::Receiver<bool> {
        let (sender, receiver) = watch::channel(false);
        self.inner.insert(flow_instance_id, sender);
        receiver
    }

    /// Signal the running task of a flow; false when nothing runs here
    pub fn cancel(&self, flow_instance_id: i64) -> bool {
        self.inner
            .get(&flow_instance_id)
            .map(|sender| sender.send(true).is_ok())
            .unwrap_or(false)
    }

    pub fn finish(&self, flow_instance_id: i64) {
        self.inner.remove(&flow_instance_id);
    }

    pub fn contains(&self, flow_instance_id: i64) -> bool {
        self.inner.contains_key(&flow_instance_id)
    }

    pub fn flow_instance_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
