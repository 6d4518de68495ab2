//! Compute cycles
//!
//! Pure functions from (snapshot, job, frozen context) to a committed
//! snapshot. The mailbox owns every side effect: dispatching requirements,
//! publishing snapshots and answering callers.

use super::error::HostError;
use super::job::{ExecutionKey, Intent, IntentStatus};
use crate::digest::short_digest;
use crate::effects::EffectOutcome;
use crate::expr::{evaluate, is_truthy, EvalContext};
use crate::flow::{
    evaluate_flow, resume_flow, FlowContext, FlowResult, FlowState, FlowStatus, NodePath,
    TraceNode, EXPRESSION_FAILED,
};
use crate::requirement::Requirement;
use crate::schema::DomainSchema;
use crate::snapshot::patch::apply_in_place;
use crate::snapshot::{
    apply_patches, ErrorValue, Patch, PatchScope, Snapshot, SystemStatus, HOST_NAMESPACE,
};
use serde_json::{Map, Value};

pub const UNKNOWN_ACTION: &str = "UNKNOWN_ACTION";
pub const ACTION_UNAVAILABLE: &str = "ACTION_UNAVAILABLE";
pub const INVALID_EFFECT_PATCH: &str = "INVALID_EFFECT_PATCH";

/// Most recent entries kept in `system.errors`
pub const MAX_ERROR_HISTORY: usize = 64;

/// Time and randomness frozen for the whole life of one intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub timestamp: i64,
    pub random_seed: String,
}

impl JobContext {
    /// The seed depends only on the intent id, so every continuation of an
    /// intent sees the same one.
    pub fn for_intent(intent_id: &str, timestamp: i64) -> Self {
        Self {
            timestamp,
            random_seed: short_digest(&[format!("seed:{intent_id}").as_bytes()]),
        }
    }
}

/// Everything needed to pick a suspended intent back up
#[derive(Debug, Clone, PartialEq)]
pub struct Continuation {
    pub intent: Intent,
    pub context: JobContext,
    /// Effect node the flow is parked on
    pub resume_at: NodePath,
    /// Requirements raised but not yet fulfilled, in creation order
    pub outstanding: Vec<Requirement>,
    pub patches: Vec<Patch>,
    pub traces: Vec<TraceNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Suspended(Continuation),
    Finished {
        status: IntentStatus,
        error: Option<ErrorValue>,
        patches: Vec<Patch>,
        traces: Vec<TraceNode>,
    },
}

/// Result of one processed job
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    /// Snapshot to commit; its version is one past the base
    pub snapshot: Snapshot,
    /// Domain patches applied during this cycle
    pub delta: Vec<Patch>,
    /// Requirements to hand to the executor, in creation order
    pub dispatch: Vec<Requirement>,
    pub outcome: CycleOutcome,
}

/// Pure cycle functions bound to one schema
#[derive(Debug, Clone, Copy)]
pub struct Engine<'a> {
    schema: &'a DomainSchema,
    max_call_depth: usize,
}

/// What a cycle carries over from earlier cycles of the same intent
#[derive(Default)]
struct Carried {
    patches: Vec<Patch>,
    traces: Vec<TraceNode>,
    delta: Vec<Patch>,
}

impl<'a> Engine<'a> {
    pub fn new(schema: &'a DomainSchema, max_call_depth: usize) -> Self {
        Self {
            schema,
            max_call_depth,
        }
    }

    /// Run a freshly submitted intent against `base`.
    pub fn compute_intent(&self, base: &Snapshot, intent: &Intent, context: &JobContext) -> Cycle {
        let mut working = self.begin(base, context);
        clear_host_error(&mut working);
        working.input = intent.input.clone();
        working.system.current_action = Some(intent.intent_type.clone());
        self.schema.recompute(&mut working);

        let Some(action) = self.schema.action(&intent.intent_type) else {
            let error = ErrorValue::new(
                UNKNOWN_ACTION,
                format!("Unknown action: {}", intent.intent_type),
                context.timestamp,
            )
            .with_action(&intent.intent_type);
            return self.fail(working, error, Carried::default());
        };

        if let Some(guard) = &action.available {
            let verdict = evaluate(guard, &EvalContext::new(&working));
            let rejection = match verdict {
                Ok(value) if is_truthy(&value) => None,
                Ok(_) => Some((
                    ACTION_UNAVAILABLE,
                    format!("Action {} is not available", intent.intent_type),
                )),
                Err(err) => Some((EXPRESSION_FAILED, err.to_string())),
            };
            if let Some((code, message)) = rejection {
                let error = ErrorValue::new(code, message, context.timestamp)
                    .with_action(&intent.intent_type);
                return self.fail(working, error, Carried::default());
            }
        }

        let result = evaluate_flow(
            &action.flow,
            &self.flow_context(intent, context),
            FlowState::new(working),
        );
        self.settle(result, intent, context, Carried::default())
    }

    /// Apply the outcome of `requirement_id` and continue the suspended intent.
    pub fn resume_intent(
        &self,
        key: &ExecutionKey,
        base: &Snapshot,
        continuation: &Continuation,
        requirement_id: &str,
        outcome: EffectOutcome,
    ) -> Result<Cycle, HostError> {
        let Some(position) = continuation
            .outstanding
            .iter()
            .position(|requirement| requirement.id == requirement_id)
        else {
            return Err(HostError::UnknownRequirement {
                key: key.to_string(),
                requirement_id: requirement_id.to_string(),
            });
        };

        let context = &continuation.context;
        let intent = &continuation.intent;
        let mut continuation = continuation.clone();
        let requirement = continuation.outstanding.remove(position);

        let mut working = self.begin(base, context);
        working
            .system
            .pending_requirements
            .retain(|pending| pending.id != requirement_id);

        let mut delta = Vec::new();
        let failure = match outcome {
            EffectOutcome::Patches { patches } => {
                match apply_patches(&working, &patches, PatchScope::Domain) {
                    Ok(next) => {
                        working = next;
                        continuation.patches.extend(patches.iter().cloned());
                        delta = patches;
                        None
                    }
                    Err(err) => Some((INVALID_EFFECT_PATCH.to_string(), err.to_string())),
                }
            }
            EffectOutcome::Error { code, message } => Some((code, message)),
        };

        if let Some((code, message)) = failure {
            let error = ErrorValue::new(code, message, context.timestamp)
                .with_action(&intent.intent_type)
                .with_requirement(&requirement.id)
                .with_node_path(requirement.flow_position.node_path.to_string());
            record_effect_error(&mut working, error);
        }
        self.schema.recompute(&mut working);

        let carried = Carried {
            patches: std::mem::take(&mut continuation.patches),
            traces: std::mem::take(&mut continuation.traces),
            delta,
        };

        if !continuation.outstanding.is_empty() {
            continuation.patches = carried.patches;
            continuation.traces = carried.traces;
            return Ok(Cycle {
                snapshot: self.commit(working, SystemStatus::Pending),
                delta: carried.delta,
                dispatch: Vec::new(),
                outcome: CycleOutcome::Suspended(continuation),
            });
        }

        let Some(action) = self.schema.action(&intent.intent_type) else {
            let error = ErrorValue::new(
                UNKNOWN_ACTION,
                format!("Unknown action: {}", intent.intent_type),
                context.timestamp,
            );
            return Ok(self.fail(working, error, carried));
        };
        let result = resume_flow(
            &action.flow,
            &self.flow_context(intent, context),
            FlowState::new(working),
            &continuation.resume_at,
        );
        Ok(self.settle(result, intent, context, carried))
    }

    /// Copy `base` into a working snapshot stamped with the frozen context.
    fn begin(&self, base: &Snapshot, context: &JobContext) -> Snapshot {
        let mut working = base.clone();
        working.meta.timestamp = context.timestamp;
        working.meta.random_seed.clone_from(&context.random_seed);
        working.meta.schema_hash = self.schema.hash();
        working.system.status = SystemStatus::Computing;
        working
    }

    fn flow_context<'c>(&'c self, intent: &'c Intent, context: &JobContext) -> FlowContext<'c> {
        FlowContext {
            flows: &self.schema.flows,
            computed: &self.schema.computed,
            action_id: &intent.intent_type,
            intent_id: &intent.intent_id,
            timestamp: context.timestamp,
            max_call_depth: self.max_call_depth,
        }
    }

    /// Turn a flow result into a cycle.
    fn settle(
        &self,
        result: FlowResult,
        intent: &Intent,
        context: &JobContext,
        carried: Carried,
    ) -> Cycle {
        let FlowResult { state, trace } = result;
        let Carried {
            mut patches,
            mut traces,
            mut delta,
        } = carried;
        patches.extend(state.patches.iter().cloned());
        delta.extend(state.patches);
        traces.push(trace);

        let mut snapshot = state.snapshot;
        match state.status {
            FlowStatus::Running | FlowStatus::Halted => {
                let status = if state.status == FlowStatus::Halted {
                    IntentStatus::Halted
                } else {
                    IntentStatus::Completed
                };
                Cycle {
                    snapshot: self.commit(snapshot, SystemStatus::Idle),
                    delta,
                    dispatch: Vec::new(),
                    outcome: CycleOutcome::Finished {
                        status,
                        error: None,
                        patches,
                        traces,
                    },
                }
            }
            FlowStatus::Error => {
                let error = state.error.unwrap_or_else(|| {
                    ErrorValue::new("FLOW_FAILED", "Flow failed", context.timestamp)
                });
                self.fail(
                    snapshot,
                    error,
                    Carried {
                        patches,
                        traces,
                        delta,
                    },
                )
            }
            FlowStatus::Pending => {
                snapshot
                    .system
                    .pending_requirements
                    .extend(state.requirements.iter().cloned());
                let resume_at = state.suspended_at.unwrap_or_default();
                Cycle {
                    snapshot: self.commit(snapshot, SystemStatus::Pending),
                    delta,
                    dispatch: state.requirements.clone(),
                    outcome: CycleOutcome::Suspended(Continuation {
                        intent: intent.clone(),
                        context: context.clone(),
                        resume_at,
                        outstanding: state.requirements,
                        patches,
                        traces,
                    }),
                }
            }
        }
    }

    /// End the intent in `error` with `error` recorded.
    fn fail(&self, mut snapshot: Snapshot, error: ErrorValue, carried: Carried) -> Cycle {
        if !snapshot.system.errors.contains(&error) {
            push_error(&mut snapshot, error.clone());
        }
        snapshot.system.last_error = Some(error.clone());
        Cycle {
            snapshot: self.commit(snapshot, SystemStatus::Error),
            delta: carried.delta,
            dispatch: Vec::new(),
            outcome: CycleOutcome::Finished {
                status: IntentStatus::Failed,
                error: Some(error),
                patches: carried.patches,
                traces: carried.traces,
            },
        }
    }

    /// Close the cycle: settle status, recompute derived values and bump the
    /// version exactly once.
    fn commit(&self, mut snapshot: Snapshot, status: SystemStatus) -> Snapshot {
        snapshot.system.status = status;
        if status != SystemStatus::Pending {
            snapshot.system.current_action = None;
            snapshot.system.pending_requirements.clear();
            snapshot.input = Value::Object(Map::new());
        }
        self.schema.recompute(&mut snapshot);
        snapshot.meta.version += 1;
        snapshot
    }
}

/// Append to `system.errors`, dropping the oldest entries past the cap.
fn push_error(snapshot: &mut Snapshot, error: ErrorValue) {
    let errors = &mut snapshot.system.errors;
    errors.push(error);
    if errors.len() > MAX_ERROR_HISTORY {
        let excess = errors.len() - MAX_ERROR_HISTORY;
        errors.drain(..excess);
    }
}

fn host_last_error_path() -> String {
    format!("data.{HOST_NAMESPACE}.lastError")
}

/// Record an effect failure in the system fields and the host namespace.
///
/// The flow resumes afterwards; it can branch on `data.$host.lastError`.
fn record_effect_error(snapshot: &mut Snapshot, error: ErrorValue) {
    if let Ok(value) = serde_json::to_value(&error) {
        let patch = Patch::set(host_last_error_path(), value);
        if let Err(err) = apply_in_place(snapshot, &patch, PatchScope::Platform) {
            tracing::warn!(error = %err, "Failed to record effect error in host namespace");
        }
    }
    snapshot.system.last_error = Some(error.clone());
    push_error(snapshot, error);
}

/// Drop the previous intent's effect error from the host namespace.
fn clear_host_error(snapshot: &mut Snapshot) {
    let has_error = snapshot
        .data
        .get(HOST_NAMESPACE)
        .and_then(|host| host.get("lastError"))
        .is_some();
    if has_error {
        let patch = Patch::unset(host_last_error_path());
        if let Err(err) = apply_in_place(snapshot, &patch, PatchScope::Platform) {
            tracing::warn!(error = %err, "Failed to clear effect error in host namespace");
        }
    }
}
