//! Immutable state snapshots
//!
//! A [`Snapshot`] is the whole state of one execution stream. It is created
//! once by [`Snapshot::genesis`] and afterwards only replaced by applying
//! [`Patch`]es to a copy; the original is never mutated.

pub mod patch;
pub mod path;

pub use patch::{apply_patch, apply_patches, Patch, PatchError, PatchOp, PatchScope};

use crate::digest::sha256_hex;
use crate::requirement::Requirement;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level `data` keys owned by the platform rather than the domain.
pub const RESERVED_NAMESPACES: [&str; 2] = ["$host", "$mel"];

/// Namespace the scheduler writes its own bookkeeping into.
pub const HOST_NAMESPACE: &str = "$host";

/// Returns true for top-level data keys the domain must not define.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with('$')
}

/// Scheduler-visible status of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    #[default]
    Idle,
    Computing,
    Pending,
    Error,
}

/// Structured error record kept in `system.lastError` / `system.errors`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorValue {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_id: Option<String>,
    pub timestamp: i64,
}

impl ErrorValue {
    pub fn new(code: impl Into<String>, message: impl Into<String>, timestamp: i64) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            action_id: None,
            node_path: None,
            requirement_id: None,
            timestamp,
        }
    }

    pub fn with_action(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    pub fn with_node_path(mut self, node_path: impl Into<String>) -> Self {
        self.node_path = Some(node_path.into());
        self
    }

    pub fn with_requirement(mut self, requirement_id: impl Into<String>) -> Self {
        self.requirement_id = Some(requirement_id.into());
        self
    }
}

/// Core-owned `system.*` fields
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemState {
    pub status: SystemStatus,
    pub last_error: Option<ErrorValue>,
    #[serde(default)]
    pub errors: Vec<ErrorValue>,
    #[serde(default)]
    pub pending_requirements: Vec<Requirement>,
    pub current_action: Option<String>,
}

/// Core-owned `meta.*` fields
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    /// Bumped exactly once per committed compute cycle
    pub version: u64,
    pub timestamp: i64,
    pub random_seed: String,
    pub schema_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub data: Value,
    #[serde(default)]
    pub computed: Map<String, Value>,
    #[serde(default)]
    pub system: SystemState,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub meta: SnapshotMeta,
}

impl Snapshot {
    /// Create the first snapshot of a stream.
    ///
    /// Non-object `data` is replaced by an empty object, and every reserved
    /// namespace is made to exist.
    pub fn genesis(data: Value, schema_hash: impl Into<String>) -> Self {
        let mut data = data;
        normalize_reserved(&mut data);
        Self {
            data,
            computed: Map::new(),
            system: SystemState::default(),
            input: Value::Object(Map::new()),
            meta: SnapshotMeta {
                schema_hash: schema_hash.into(),
                ..SnapshotMeta::default()
            },
        }
    }

    pub fn version(&self) -> u64 {
        self.meta.version
    }

    pub fn status(&self) -> SystemStatus {
        self.system.status
    }

    /// Read a value from `data` by dot path.
    pub fn get(&self, data_path: &str) -> Option<&Value> {
        path::get(&self.data, &path::segments(data_path))
    }

    /// `data` with the platform namespaces removed.
    pub fn domain_data(&self) -> Value {
        match &self.data {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(key, _)| !is_reserved_key(key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Digest of the domain state, ignoring platform namespaces.
    pub fn domain_digest(&self) -> String {
        let canonical = serde_json::to_string(&self.domain_data()).unwrap_or_default();
        sha256_hex(&[canonical.as_bytes()])
    }
}

/// Make sure `data` is an object carrying every reserved namespace.
pub fn normalize_reserved(data: &mut Value) {
    let object = path::ensure_object(data);
    for namespace in RESERVED_NAMESPACES {
        let slot = object
            .entry(namespace.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
    }
}
