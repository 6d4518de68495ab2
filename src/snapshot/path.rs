//! Dot-path addressing over JSON values
//!
//! Object keys are addressed by name, array elements by their decimal index.
//! Writes create missing intermediate objects; reads of anything missing
//! simply return `None`.

use serde_json::{Map, Value};

/// Split a dot path into its non-empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

pub fn get<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn get_mut<'a>(root: &'a mut Value, segments: &[&str]) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get_mut(*segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at `segments`, replacing whatever was there.
pub fn set(root: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };
    let parent = parents
        .iter()
        .fold(root, |current, segment| child_mut(current, segment));
    *child_mut(parent, last) = value;
}

/// Shallow-merge `entries` into the object at `segments`.
///
/// A missing or non-object target is replaced by the merged entries.
pub fn merge(root: &mut Value, segments: &[&str], entries: &Map<String, Value>) {
    let target = segments
        .iter()
        .fold(root, |current, segment| child_mut(current, segment));
    let object = ensure_object(target);
    for (key, value) in entries {
        object.insert(key.clone(), value.clone());
    }
}

/// Remove the key or element at `segments`. Returns whether anything was removed.
pub fn unset(root: &mut Value, segments: &[&str]) -> bool {
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };
    match get_mut(root, parents) {
        Some(Value::Object(map)) => map.remove(*last).is_some(),
        Some(Value::Array(items)) => match last.parse::<usize>() {
            Ok(index) if index < items.len() => {
                items.remove(index);
                true
            }
            _ => false,
        },
        _ => false,
    }
}

pub fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

fn child_mut<'a>(current: &'a mut Value, segment: &str) -> &'a mut Value {
    // An index one past the end appends.
    let array_index = match (&*current, segment.parse::<usize>()) {
        (Value::Array(items), Ok(index)) if index <= items.len() => Some(index),
        _ => None,
    };
    match (current, array_index) {
        (Value::Array(items), Some(index)) => {
            if index == items.len() {
                items.push(Value::Null);
            }
            &mut items[index]
        }
        (current, _) => ensure_object(current)
            .entry(segment.to_string())
            .or_insert(Value::Null),
    }
}
