//! Effect executor
//!
//! Runs one handler invocation per attempt in its own task so that a panic,
//! a timeout or a cancellation can be observed without poisoning the caller.

use super::registry::{EffectRegistry, RegisteredEffect};
use super::{EffectContext, EffectOutcome};
use crate::requirement::Requirement;
use crate::snapshot::{Patch, Snapshot};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const UNKNOWN_EFFECT: &str = "UNKNOWN_EFFECT";
pub const EFFECT_EXECUTION_FAILED: &str = "EFFECT_EXECUTION_FAILED";
pub const EFFECT_TIMEOUT: &str = "EFFECT_TIMEOUT";
pub const EFFECT_CANCELLED: &str = "EFFECT_CANCELLED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectFailure {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectResult {
    pub requirement_id: String,
    pub success: bool,
    pub patches: Vec<Patch>,
    pub error: Option<EffectFailure>,
    pub duration: Duration,
    /// Handler invocations made; 0 when the handler never ran
    pub attempts: u32,
}

impl EffectResult {
    fn succeeded(
        requirement_id: &str,
        patches: Vec<Patch>,
        started: Instant,
        attempts: u32,
    ) -> Self {
        Self {
            requirement_id: requirement_id.to_string(),
            success: true,
            patches,
            error: None,
            duration: started.elapsed(),
            attempts,
        }
    }

    fn failed(
        requirement_id: &str,
        code: &str,
        message: impl Into<String>,
        started: Instant,
        attempts: u32,
    ) -> Self {
        Self {
            requirement_id: requirement_id.to_string(),
            success: false,
            patches: Vec::new(),
            error: Some(EffectFailure {
                code: code.to_string(),
                message: message.into(),
            }),
            duration: started.elapsed(),
            attempts,
        }
    }

    /// Convert into the outcome carried by a fulfillment job.
    pub fn into_outcome(self) -> EffectOutcome {
        match self.error {
            Some(failure) => EffectOutcome::Error {
                code: failure.code,
                message: failure.message,
            },
            None => EffectOutcome::Patches {
                patches: self.patches,
            },
        }
    }
}

/// Results of [`EffectExecutor::execute_all`]
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub results: Vec<EffectResult>,
    /// Patches of the successful results, in requirement order
    pub patches: Vec<Patch>,
}

enum Attempt {
    Done(Vec<Patch>),
    Failed(String),
    TimedOut(Duration),
    Cancelled,
}

#[derive(Clone)]
pub struct EffectExecutor {
    registry: Arc<EffectRegistry>,
}

impl EffectExecutor {
    pub fn new(registry: Arc<EffectRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    /// Execute the effect `requirement` asks for.
    ///
    /// Handler errors are retried up to the configured count; a timeout or a
    /// cancellation ends execution immediately.
    pub async fn execute(
        &self,
        requirement: &Requirement,
        snapshot: Arc<Snapshot>,
        signal: CancellationToken,
    ) -> EffectResult {
        let started = Instant::now();
        let id = requirement.id.as_str();
        let effect_type = requirement.effect_type.as_str();

        let Some(entry) = self.registry.get(effect_type) else {
            tracing::warn!(requirement_id = %id, effect_type = %effect_type, "Unknown effect type");
            return EffectResult::failed(
                id,
                UNKNOWN_EFFECT,
                format!("Unknown effect type: {effect_type}"),
                started,
                0,
            );
        };
        if signal.is_cancelled() {
            return cancelled(id, effect_type, started, 0);
        }

        let ctx = Arc::new(EffectContext {
            snapshot,
            requirement: requirement.clone(),
            signal: signal.clone(),
        });

        let mut attempts = 0;
        loop {
            attempts += 1;
            tracing::debug!(
                requirement_id = %id,
                effect_type = %effect_type,
                attempt = attempts,
                "Executing effect"
            );
            match run_attempt(entry, &ctx).await {
                Attempt::Done(patches) => {
                    tracing::info!(
                        requirement_id = %id,
                        effect_type = %effect_type,
                        patches = patches.len(),
                        "Effect completed"
                    );
                    return EffectResult::succeeded(id, patches, started, attempts);
                }
                Attempt::TimedOut(limit) => {
                    tracing::warn!(
                        requirement_id = %id,
                        effect_type = %effect_type,
                        ?limit,
                        "Effect timed out"
                    );
                    return EffectResult::failed(
                        id,
                        EFFECT_TIMEOUT,
                        format!("Effect {effect_type} timed out after {}ms", limit.as_millis()),
                        started,
                        attempts,
                    );
                }
                Attempt::Cancelled => {
                    tracing::info!(
                        requirement_id = %id,
                        effect_type = %effect_type,
                        "Effect cancelled"
                    );
                    return cancelled(id, effect_type, started, attempts);
                }
                Attempt::Failed(message) => {
                    if attempts > entry.options.retries {
                        tracing::warn!(
                            requirement_id = %id,
                            effect_type = %effect_type,
                            error = %message,
                            "Effect failed"
                        );
                        return EffectResult::failed(
                            id,
                            EFFECT_EXECUTION_FAILED,
                            message,
                            started,
                            attempts,
                        );
                    }
                    tracing::info!(
                        requirement_id = %id,
                        effect_type = %effect_type,
                        error = %message,
                        "Effect failed, retrying"
                    );
                    tokio::select! {
                        biased;

                        () = signal.cancelled() => {
                            return cancelled(id, effect_type, started, attempts);
                        }
                        () = tokio::time::sleep(entry.options.retry_delay) => {}
                    }
                }
            }
        }
    }

    /// Execute requirements one after another, in order.
    ///
    /// A failure does not stop the batch; only successful patches are
    /// collected.
    pub async fn execute_all(
        &self,
        requirements: &[Requirement],
        snapshot: Arc<Snapshot>,
        signal: CancellationToken,
    ) -> BatchResult {
        let mut results = Vec::with_capacity(requirements.len());
        let mut patches = Vec::new();
        for requirement in requirements {
            let result = self
                .execute(requirement, Arc::clone(&snapshot), signal.clone())
                .await;
            if result.success {
                patches.extend(result.patches.iter().cloned());
            }
            results.push(result);
        }
        BatchResult { results, patches }
    }
}

async fn run_attempt(entry: &RegisteredEffect, ctx: &Arc<EffectContext>) -> Attempt {
    let handler = Arc::clone(&entry.handler);
    let task_ctx = Arc::clone(ctx);
    let mut task = tokio::spawn(async move {
        let requirement = &task_ctx.requirement;
        handler
            .handle(&requirement.effect_type, &requirement.params, &task_ctx)
            .await
    });

    let timeout = entry.options.timeout;
    let deadline = async move {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;

        () = ctx.signal.cancelled() => {
            task.abort();
            Attempt::Cancelled
        }
        joined = &mut task => match joined {
            Ok(Ok(patches)) => Attempt::Done(patches),
            Ok(Err(message)) => Attempt::Failed(message),
            Err(err) if err.is_panic() => Attempt::Failed(panic_message(err.into_panic())),
            Err(err) => Attempt::Failed(err.to_string()),
        },
        () = deadline => {
            task.abort();
            Attempt::TimedOut(timeout.unwrap_or_default())
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "effect handler panicked".to_string()
    }
}

fn cancelled(id: &str, effect_type: &str, started: Instant, attempts: u32) -> EffectResult {
    let message = format!("Effect {effect_type} was cancelled");
    EffectResult::failed(id, EFFECT_CANCELLED, message, started, attempts)
}
