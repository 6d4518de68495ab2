//! Requirements: pending demands for an external effect

use crate::digest::short_digest;
use crate::flow::NodePath;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where in a flow a requirement was raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowPosition {
    pub node_path: NodePath,
    pub snapshot_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub id: String,
    #[serde(rename = "type")]
    pub effect_type: String,
    pub params: Map<String, Value>,
    pub action_id: String,
    pub intent_id: String,
    pub flow_position: FlowPosition,
    pub created_at: i64,
}

impl Requirement {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

/// Deterministic requirement id.
///
/// Replaying the same intent from the same snapshot version reaches the same
/// node and therefore yields the same id; a different intent never does.
pub fn requirement_id(
    action_id: &str,
    intent_id: &str,
    node_path: &NodePath,
    snapshot_version: u64,
) -> String {
    let path = node_path.to_string();
    let version = snapshot_version.to_string();
    let digest = short_digest(&[
        action_id.as_bytes(),
        intent_id.as_bytes(),
        path.as_bytes(),
        version.as_bytes(),
    ]);
    format!("req-{digest}")
}
