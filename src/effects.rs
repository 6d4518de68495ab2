//! Effect handlers
//!
//! An effect is a named external operation a flow can request. Handlers are
//! registered by type name in an [`EffectRegistry`] owned by the host, and run
//! by the [`EffectExecutor`] under a timeout/retry policy. Whatever a handler
//! does, the executor turns it into an [`EffectResult`]; nothing escapes as a
//! panic or an error type.

mod executor;
mod registry;
mod system_get;

pub use executor::{
    BatchResult, EffectExecutor, EffectFailure, EffectResult, EFFECT_CANCELLED,
    EFFECT_EXECUTION_FAILED, EFFECT_TIMEOUT, UNKNOWN_EFFECT,
};
pub use registry::{EffectOptions, EffectRegistry, RegisteredEffect, RegistryError, SYSTEM_GET};
pub use system_get::SystemGet;

use crate::requirement::Requirement;
use crate::snapshot::{Patch, Snapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a handler gets to see besides its parameters
#[derive(Debug, Clone)]
pub struct EffectContext {
    /// Snapshot the requirement was raised against
    pub snapshot: Arc<Snapshot>,
    pub requirement: Requirement,
    /// Tripped when the job is cancelled or the host shuts down
    pub signal: CancellationToken,
}

/// Handler for one or more effect types
#[async_trait]
pub trait EffectHandler: Send + Sync {
    /// Perform the effect and describe its result as patches.
    async fn handle(
        &self,
        effect_type: &str,
        params: &Map<String, Value>,
        ctx: &EffectContext,
    ) -> Result<Vec<Patch>, String>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: EffectHandler + ?Sized> EffectHandler for Arc<T> {
    async fn handle(
        &self,
        effect_type: &str,
        params: &Map<String, Value>,
        ctx: &EffectContext,
    ) -> Result<Vec<Patch>, String> {
        (**self).handle(effect_type, params, ctx).await
    }
}

/// Adapter for synchronous handlers written as closures
pub struct FnHandler<F>(F);

pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&str, &Map<String, Value>, &EffectContext) -> Result<Vec<Patch>, String> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> EffectHandler for FnHandler<F>
where
    F: Fn(&str, &Map<String, Value>, &EffectContext) -> Result<Vec<Patch>, String> + Send + Sync,
{
    async fn handle(
        &self,
        effect_type: &str,
        params: &Map<String, Value>,
        ctx: &EffectContext,
    ) -> Result<Vec<Patch>, String> {
        (self.0)(effect_type, params, ctx)
    }
}

/// Result of an effect as it re-enters a mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EffectOutcome {
    Patches { patches: Vec<Patch> },
    Error { code: String, message: String },
}

impl EffectOutcome {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        EffectOutcome::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EffectOutcome::Error { .. })
    }
}
