//! Patch algebra: set / merge / unset
//!
//! Patch paths are rooted: `data.*` addresses domain state and `system.*`
//! addresses the core-owned system fields. Nothing else is writable.

use super::{is_reserved_key, normalize_reserved, path, Snapshot, SystemState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Set,
    Merge,
    Unset,
}

/// A single state mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Patch {
    Set { path: String, value: Value },
    Merge { path: String, value: Map<String, Value> },
    Unset { path: String },
}

impl Patch {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Patch::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn merge(path: impl Into<String>, value: Map<String, Value>) -> Self {
        Patch::Merge {
            path: path.into(),
            value,
        }
    }

    pub fn unset(path: impl Into<String>) -> Self {
        Patch::Unset { path: path.into() }
    }

    /// Build a patch from an operation and an already-evaluated value.
    pub fn from_op(op: PatchOp, path: impl Into<String>, value: Value) -> Result<Self, PatchError> {
        let path = path.into();
        match op {
            PatchOp::Set => Ok(Patch::Set { path, value }),
            PatchOp::Merge => match value {
                Value::Object(value) => Ok(Patch::Merge { path, value }),
                _ => Err(PatchError::MergeNotObject(path)),
            },
            PatchOp::Unset => Ok(Patch::Unset { path }),
        }
    }

    pub fn op(&self) -> PatchOp {
        match self {
            Patch::Set { .. } => PatchOp::Set,
            Patch::Merge { .. } => PatchOp::Merge,
            Patch::Unset { .. } => PatchOp::Unset,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Patch::Set { path, .. } | Patch::Merge { path, .. } | Patch::Unset { path } => path,
        }
    }

    /// Whether this patch writes into a platform-reserved `data.$*` namespace.
    pub fn targets_platform(&self) -> bool {
        let segments = path::segments(self.path());
        matches!(segments.as_slice(), ["data", key, ..] if is_reserved_key(key))
    }
}

/// Who is writing: domain logic or the scheduler itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchScope {
    /// Flow and effect patches; reserved namespaces are off limits
    Domain,
    /// The scheduler's own bookkeeping
    Platform,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("patch path is empty")]
    EmptyPath,
    #[error("unknown patch root in `{0}` (expected `data.*` or `system.*`)")]
    UnknownRoot(String),
    #[error("`{0}` is read-only")]
    ReadOnly(String),
    #[error("`{0}` is a platform-reserved namespace")]
    ReservedNamespace(String),
    #[error("merge value for `{0}` is not an object")]
    MergeNotObject(String),
    #[error("invalid value for `{path}`: {reason}")]
    InvalidSystemValue { path: String, reason: String },
}

/// Apply one patch to a copy of `snapshot`.
pub fn apply_patch(
    snapshot: &Snapshot,
    patch: &Patch,
    scope: PatchScope,
) -> Result<Snapshot, PatchError> {
    apply_patches(snapshot, std::slice::from_ref(patch), scope)
}

/// Apply patches in order to a copy of `snapshot`.
///
/// Either every patch applies or the input is returned untouched via `Err`.
/// The version counter is not touched; it moves once per committed cycle.
pub fn apply_patches(
    snapshot: &Snapshot,
    patches: &[Patch],
    scope: PatchScope,
) -> Result<Snapshot, PatchError> {
    let mut next = snapshot.clone();
    for patch in patches {
        apply_in_place(&mut next, patch, scope)?;
    }
    Ok(next)
}

/// Apply a patch to a snapshot the caller already owns exclusively.
pub(crate) fn apply_in_place(
    snapshot: &mut Snapshot,
    patch: &Patch,
    scope: PatchScope,
) -> Result<(), PatchError> {
    let segments = path::segments(patch.path());
    let Some((root, rest)) = segments.split_first() else {
        return Err(PatchError::EmptyPath);
    };
    match *root {
        "data" => apply_to_data(&mut snapshot.data, patch, rest, scope),
        "system" => apply_to_system(&mut snapshot.system, patch, rest),
        "meta" | "computed" | "input" => Err(PatchError::ReadOnly(patch.path().to_string())),
        _ => Err(PatchError::UnknownRoot(patch.path().to_string())),
    }
}

fn apply_to_data(
    data: &mut Value,
    patch: &Patch,
    segments: &[&str],
    scope: PatchScope,
) -> Result<(), PatchError> {
    if scope == PatchScope::Domain {
        if let Some(first) = segments.first() {
            if is_reserved_key(first) {
                return Err(PatchError::ReservedNamespace(patch.path().to_string()));
            }
        }
    }

    // Whole-data writes keep the platform namespaces intact.
    let preserved: Vec<(String, Value)> = if segments.is_empty() {
        data.as_object()
            .map(|map| {
                map.iter()
                    .filter(|(key, _)| is_reserved_key(key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    write(data, patch, segments);

    if segments.is_empty() {
        let object = path::ensure_object(data);
        for (key, value) in preserved {
            object.insert(key, value);
        }
        normalize_reserved(data);
    }
    Ok(())
}

fn apply_to_system(
    system: &mut SystemState,
    patch: &Patch,
    segments: &[&str],
) -> Result<(), PatchError> {
    let invalid = |reason: String| PatchError::InvalidSystemValue {
        path: patch.path().to_string(),
        reason,
    };
    let mut view = serde_json::to_value(&*system).map_err(|e| invalid(e.to_string()))?;
    write(&mut view, patch, segments);
    *system = serde_json::from_value(view).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

fn write(target: &mut Value, patch: &Patch, segments: &[&str]) {
    match patch {
        Patch::Set { value, .. } => path::set(target, segments, value.clone()),
        Patch::Merge { value, .. } => path::merge(target, segments, value),
        Patch::Unset { .. } => {
            if segments.is_empty() {
                *target = Value::Object(Map::new());
            } else {
                path::unset(target, segments);
            }
        }
    }
}
