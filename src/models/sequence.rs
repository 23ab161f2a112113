use serde::{Deserialize, Serialize};

/// Directed edge between two node instances of one flow
///
/// `target_node_id == None` routes to the flow's end event. Sequences are
/// immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: i64,
    pub flow_instance_id: i64,
    pub source_node_id: i64,
    pub target_node_id: Option<i64>,
    /// Routing condition in the `${...}` mini-language
    pub condition: Option<String>,
}
