//! Intent Host - deterministic action runtime
//!
//! Domain actions are declared as flows over an immutable [`Snapshot`].
//! Evaluating a flow is pure; anything that touches the outside world is
//! raised as a [`Requirement`], executed by an effect handler and fed back
//! into the same per-key mailbox as patches.

#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

pub mod config;
pub mod digest;
pub mod effects;
pub mod expr;
pub mod flow;
pub mod host;
pub mod requirement;
pub mod scenario;
pub mod schema;
pub mod snapshot;

pub use config::HostConfig;
pub use effects::{EffectExecutor, EffectHandler, EffectOptions, EffectOutcome, EffectRegistry};
pub use expr::{evaluate, EvalContext, ExprNode};
pub use flow::{evaluate_flow, resume_flow, FlowContext, FlowNode, FlowState, FlowStatus};
pub use host::{ExecutionKey, Host, HostError, HostEvent, Intent, IntentReport, IntentStatus};
pub use requirement::Requirement;
pub use schema::{ActionSpec, DomainSchema};
pub use snapshot::{apply_patch, apply_patches, Patch, PatchScope, Snapshot};
