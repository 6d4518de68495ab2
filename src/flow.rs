//! Control-flow evaluation
//!
//! Flows are trees of sequencing, branching, patch, effect, call, halt and
//! fail nodes. Evaluating one is pure: it returns a [`FlowState`] describing
//! where the flow stopped and which patches and requirements it produced.

mod eval;
mod node;
mod path;
mod state;
mod trace;

#[cfg(test)]
mod proptests;

pub use eval::{
    evaluate_flow, resume_flow, FlowContext, FlowResult, CALL_DEPTH_EXCEEDED, EXPRESSION_FAILED,
    INVALID_RESUME, PATCH_FAILED, UNKNOWN_FLOW,
};
pub use node::FlowNode;
pub use path::{NodePath, NodePathError, PathSegment};
pub use state::{FlowState, FlowStatus};
pub use trace::TraceNode;
