//! Expression language
//!
//! A closed tree of expression kinds evaluated against a read-only view of a
//! [`Snapshot`](crate::snapshot::Snapshot). Evaluation never suspends and never
//! has side effects.

pub mod coerce;
mod eval;
mod node;

#[cfg(test)]
mod proptests;

pub use coerce::is_truthy;
pub use eval::{evaluate, EvalContext, EvalError, MAX_EXPR_DEPTH};
pub use node::ExprNode;
