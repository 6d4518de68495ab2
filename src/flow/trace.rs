//! Evaluation traces
//!
//! Traces are write-only: the evaluator records into them but never reads
//! them back.

use super::path::NodePath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceNode {
    pub kind: String,
    pub node_path: NodePath,
    pub inputs: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TraceNode>,
}

impl TraceNode {
    pub fn new(kind: &str, node_path: NodePath, inputs: Value) -> Self {
        Self {
            kind: kind.to_string(),
            node_path,
            inputs,
            children: Vec::new(),
        }
    }

    /// Total number of nodes in this trace, including itself.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TraceNode::count).sum::<usize>()
    }
}
