//! Built-in `system.get` effect
//!
//! Read mode copies a value out of the snapshot:
//! `{"path": "computed.total", "target": "data.lastTotal"}`.
//! Generate mode produces a fresh system value:
//! `{"key": "uuid" | "timestamp" | "isoTimestamp", "into": "data.id"}`.

use super::{EffectContext, EffectHandler};
use crate::expr::EvalContext;
use crate::snapshot::{path, Patch};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

const READABLE_ROOTS: [&str; 4] = ["data", "computed", "system", "meta"];

pub struct SystemGet;

#[async_trait]
impl EffectHandler for SystemGet {
    async fn handle(
        &self,
        _effect_type: &str,
        params: &Map<String, Value>,
        ctx: &EffectContext,
    ) -> Result<Vec<Patch>, String> {
        if let Some(key) = params.get("key") {
            let key = key
                .as_str()
                .ok_or_else(|| "system.get `key` must be a string".to_string())?;
            let into = params
                .get("into")
                .and_then(Value::as_str)
                .ok_or_else(|| "system.get generate mode requires `into`".to_string())?;
            let value = generate(key)?;
            return Ok(vec![Patch::set(rooted(into), value)]);
        }

        let source = params
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| "system.get requires `path` or `key`".to_string())?;
        let value = EvalContext::new(&ctx.snapshot)
            .resolve(&readable(source))
            .map_err(|e| e.to_string())?;

        match params.get("target").and_then(Value::as_str) {
            Some(target) => Ok(vec![Patch::set(rooted(target), value)]),
            None => Ok(Vec::new()),
        }
    }
}

fn generate(key: &str) -> Result<Value, String> {
    match key {
        "uuid" => Ok(Value::String(Uuid::new_v4().to_string())),
        "timestamp" => Ok(Value::from(Utc::now().timestamp_millis())),
        "isoTimestamp" => Ok(Value::String(Utc::now().to_rfc3339())),
        other => Err(format!("system.get cannot generate `{other}`")),
    }
}

/// Read paths outside the readable roots are taken relative to `data`.
fn readable(source: &str) -> String {
    match path::segments(source).first() {
        Some(root) if READABLE_ROOTS.contains(root) => source.to_string(),
        _ => format!("data.{source}"),
    }
}

/// Write targets without an explicit root go to `data`.
fn rooted(target: &str) -> String {
    match path::segments(target).first() {
        Some(&"data" | &"system") => target.to_string(),
        _ => format!("data.{target}"),
    }
}
