//! Domain schema: the actions, sub-flows and computed values of one domain

use crate::digest::sha256_hex;
use crate::expr::{evaluate, EvalContext, ExprNode};
use crate::flow::FlowNode;
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    pub flow: FlowNode,
    /// Guard evaluated before the flow runs; a falsy result rejects the intent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<ExprNode>,
}

impl ActionSpec {
    pub fn new(flow: FlowNode) -> Self {
        Self {
            flow,
            available: None,
        }
    }

    pub fn when_available(mut self, guard: ExprNode) -> Self {
        self.available = Some(guard);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSchema {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSpec>,
    #[serde(default)]
    pub flows: BTreeMap<String, FlowNode>,
    #[serde(default)]
    pub computed: BTreeMap<String, ExprNode>,
}

impl DomainSchema {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            actions: BTreeMap::new(),
            flows: BTreeMap::new(),
            computed: BTreeMap::new(),
        }
    }

    pub fn with_action(mut self, name: impl Into<String>, action: ActionSpec) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    pub fn with_flow(mut self, name: impl Into<String>, flow: FlowNode) -> Self {
        self.flows.insert(name.into(), flow);
        self
    }

    pub fn with_computed(mut self, name: impl Into<String>, expr: ExprNode) -> Self {
        self.computed.insert(name.into(), expr);
        self
    }

    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name)
    }

    /// Hex SHA-256 of the schema's canonical JSON.
    pub fn hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        sha256_hex(&[canonical.as_bytes()])
    }

    /// Recompute every computed value into `snapshot.computed`.
    pub fn recompute(&self, snapshot: &mut Snapshot) {
        recompute_computed(&self.computed, snapshot);
    }
}

/// Values are computed in name order and each one can read the ones before
/// it. An expression that fails yields `null`.
pub fn recompute_computed(computed: &BTreeMap<String, ExprNode>, snapshot: &mut Snapshot) {
    snapshot.computed = Map::new();
    for (name, expr) in computed {
        let value = evaluate(expr, &EvalContext::new(snapshot)).unwrap_or(Value::Null);
        snapshot.computed.insert(name.clone(), value);
    }
}
