//! Flow interpreter
//!
//! Walks a [`FlowNode`] tree, driving the expression evaluator and applying
//! patches to the working snapshot as it goes. The walk stops at the first
//! node that leaves the `running` status. A suspended flow is continued by
//! [`resume_flow`], which replays the tree structure down to the effect node
//! recorded in the requirement and carries on from the node after it.

use super::node::FlowNode;
use super::path::{NodePath, PathSegment};
use super::state::FlowState;
use super::trace::TraceNode;
use crate::expr::{coerce, evaluate, is_truthy, EvalContext, EvalError, ExprNode};
use crate::requirement::{requirement_id, FlowPosition, Requirement};
use crate::schema::recompute_computed;
use crate::snapshot::patch::apply_in_place;
use crate::snapshot::{ErrorValue, Patch, PatchError, PatchScope};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const UNKNOWN_FLOW: &str = "UNKNOWN_FLOW";
pub const CALL_DEPTH_EXCEEDED: &str = "CALL_DEPTH_EXCEEDED";
pub const PATCH_FAILED: &str = "PATCH_FAILED";
pub const EXPRESSION_FAILED: &str = "EXPRESSION_FAILED";
pub const INVALID_RESUME: &str = "INVALID_RESUME";

/// Everything a flow needs besides its state
#[derive(Debug, Clone, Copy)]
pub struct FlowContext<'a> {
    /// Named sub-flows `call` nodes resolve against
    pub flows: &'a BTreeMap<String, FlowNode>,
    /// Derived values refreshed after every applied patch
    pub computed: &'a BTreeMap<String, ExprNode>,
    pub action_id: &'a str,
    pub intent_id: &'a str,
    /// Frozen job timestamp, stamped on requirements and error records
    pub timestamp: i64,
    pub max_call_depth: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowResult {
    pub state: FlowState,
    pub trace: TraceNode,
}

/// Evaluate `flow` from its root.
pub fn evaluate_flow(flow: &FlowNode, ctx: &FlowContext<'_>, state: FlowState) -> FlowResult {
    let mut state = state;
    let trace = Walker { ctx }.run(flow, &NodePath::root(), &mut state, None, 0);
    FlowResult { state, trace }
}

/// Continue `flow` after the effect node at `resume_at` has been fulfilled.
pub fn resume_flow(
    flow: &FlowNode,
    ctx: &FlowContext<'_>,
    state: FlowState,
    resume_at: &NodePath,
) -> FlowResult {
    let mut state = state;
    let root = NodePath::root();
    if !matches!(
        flow.locate(resume_at, ctx.flows),
        Some(FlowNode::Effect { .. })
    ) {
        let walker = Walker { ctx };
        state.fail(walker.error(
            INVALID_RESUME,
            format!("No effect node at {resume_at}"),
            resume_at,
        ));
        let trace = TraceNode::new("resume", root, json!({ "at": resume_at.to_string() }));
        return FlowResult { state, trace };
    }
    let trace = Walker { ctx }.run(flow, &root, &mut state, Some(resume_at), 0);
    FlowResult { state, trace }
}

struct Walker<'c, 'a> {
    ctx: &'c FlowContext<'a>,
}

impl Walker<'_, '_> {
    /// Run one node. `resume` is set while descending toward the effect node
    /// a resumed flow continues from.
    fn run(
        &self,
        node: &FlowNode,
        path: &NodePath,
        state: &mut FlowState,
        resume: Option<&NodePath>,
        depth: usize,
    ) -> TraceNode {
        if resume == Some(path) {
            return TraceNode::new(node.kind(), path.clone(), json!({ "resumed": true }));
        }
        let next = resume.and_then(|target| target.next_after(path));

        match node {
            FlowNode::Seq { steps } => {
                let start = match next {
                    Some(PathSegment::Step(index)) => *index,
                    _ => 0,
                };
                let inputs = json!({ "steps": steps.len(), "from": start });
                let mut trace = TraceNode::new("seq", path.clone(), inputs);
                for (index, step) in steps.iter().enumerate().skip(start) {
                    if !state.is_running() {
                        break;
                    }
                    let step_resume = if index == start { resume } else { None };
                    let child = path.child(PathSegment::Step(index));
                    trace
                        .children
                        .push(self.run(step, &child, state, step_resume, depth));
                }
                trace
            }

            FlowNode::If {
                cond,
                then,
                otherwise,
            } => {
                let branch = match next {
                    Some(PathSegment::Then) => Some(true),
                    Some(PathSegment::Else) => Some(false),
                    _ => None,
                };
                let (taken, cond_value) = match branch {
                    Some(taken) => (taken, Value::Null),
                    None => match eval(cond, state) {
                        Ok(value) => (is_truthy(&value), value),
                        Err(err) => {
                            state.fail(self.eval_error(&err, path));
                            let inputs = json!({ "error": err.to_string() });
                            return TraceNode::new("if", path.clone(), inputs);
                        }
                    },
                };
                let branch_name = if taken { "then" } else { "else" };
                let mut trace = TraceNode::new(
                    "if",
                    path.clone(),
                    json!({
                        "cond": cond_value,
                        "branch": branch_name,
                        "resumed": branch.is_some(),
                    }),
                );
                if taken {
                    let child = path.child(PathSegment::Then);
                    trace.children.push(self.run(then, &child, state, resume, depth));
                } else if let Some(otherwise) = otherwise {
                    let child = path.child(PathSegment::Else);
                    trace
                        .children
                        .push(self.run(otherwise, &child, state, resume, depth));
                }
                trace
            }

            FlowNode::Patch { op, path: target, value } => {
                let value = match value {
                    Some(expr) => match eval(expr, state) {
                        Ok(value) => value,
                        Err(err) => {
                            state.fail(self.eval_error(&err, path));
                            let inputs = json!({ "path": target, "error": err.to_string() });
                            return TraceNode::new("patch", path.clone(), inputs);
                        }
                    },
                    None => Value::Null,
                };
                let inputs = json!({ "op": op, "path": target, "value": value });
                let applied = Patch::from_op(*op, target.clone(), value)
                    .and_then(|patch| apply(state, patch, self.ctx.computed));
                if let Err(err) = applied {
                    state.fail(self.error(PATCH_FAILED, err.to_string(), path));
                }
                TraceNode::new("patch", path.clone(), inputs)
            }

            FlowNode::Effect {
                effect_type,
                params,
            } => {
                let mut evaluated = Map::new();
                for (name, expr) in params {
                    match eval(expr, state) {
                        Ok(value) => {
                            evaluated.insert(name.clone(), value);
                        }
                        Err(err) => {
                            state.fail(self.eval_error(&err, path));
                            let inputs = json!({ "type": effect_type, "error": err.to_string() });
                            return TraceNode::new("effect", path.clone(), inputs);
                        }
                    }
                }
                let version = state.snapshot.version();
                let requirement = Requirement {
                    id: requirement_id(self.ctx.action_id, self.ctx.intent_id, path, version),
                    effect_type: effect_type.clone(),
                    params: evaluated,
                    action_id: self.ctx.action_id.to_string(),
                    intent_id: self.ctx.intent_id.to_string(),
                    flow_position: FlowPosition {
                        node_path: path.clone(),
                        snapshot_version: version,
                    },
                    created_at: self.ctx.timestamp,
                };
                let trace = TraceNode::new(
                    "effect",
                    path.clone(),
                    json!({
                        "type": effect_type,
                        "params": requirement.params,
                        "requirementId": requirement.id,
                    }),
                );
                state.suspend(requirement, path.clone());
                trace
            }

            FlowNode::Call { flow } => {
                let mut trace = TraceNode::new("call", path.clone(), json!({ "flow": flow }));
                if depth >= self.ctx.max_call_depth {
                    state.fail(self.error(
                        CALL_DEPTH_EXCEEDED,
                        format!("Call depth exceeded {} calling {flow}", self.ctx.max_call_depth),
                        path,
                    ));
                    return trace;
                }
                let Some(target) = self.ctx.flows.get(flow) else {
                    state.fail(self.error(UNKNOWN_FLOW, format!("Unknown flow: {flow}"), path));
                    return trace;
                };
                let child = path.child(PathSegment::Call(flow.clone()));
                trace
                    .children
                    .push(self.run(target, &child, state, resume, depth + 1));
                trace
            }

            FlowNode::Halt { reason } => {
                state.halt();
                TraceNode::new("halt", path.clone(), json!({ "reason": reason }))
            }

            FlowNode::Fail { code, message } => {
                let message = match message {
                    Some(expr) => match eval(expr, state) {
                        Ok(Value::Null) => code.clone(),
                        Ok(value) => coerce::to_text(&value),
                        Err(err) => {
                            state.fail(self.eval_error(&err, path));
                            let inputs = json!({ "code": code, "error": err.to_string() });
                            return TraceNode::new("fail", path.clone(), inputs);
                        }
                    },
                    None => code.clone(),
                };
                let trace = TraceNode::new(
                    "fail",
                    path.clone(),
                    json!({ "code": code, "message": message }),
                );
                state.fail(self.error(code, message, path));
                trace
            }
        }
    }

    fn error(&self, code: &str, message: impl Into<String>, path: &NodePath) -> ErrorValue {
        ErrorValue::new(code, message, self.ctx.timestamp)
            .with_action(self.ctx.action_id)
            .with_node_path(path.to_string())
    }

    fn eval_error(&self, err: &EvalError, path: &NodePath) -> ErrorValue {
        self.error(EXPRESSION_FAILED, err.to_string(), path)
    }
}

fn eval(expr: &ExprNode, state: &FlowState) -> Result<Value, EvalError> {
    evaluate(expr, &EvalContext::new(&state.snapshot))
}

fn apply(
    state: &mut FlowState,
    patch: Patch,
    computed: &BTreeMap<String, ExprNode>,
) -> Result<(), PatchError> {
    apply_in_place(&mut state.snapshot, &patch, PatchScope::Domain)?;
    recompute_computed(computed, &mut state.snapshot);
    state.patches.push(patch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowStatus;
    use crate::snapshot::{Snapshot, SystemStatus};

    static NO_COMPUTED: BTreeMap<String, ExprNode> = BTreeMap::new();

    fn ctx(flows: &BTreeMap<String, FlowNode>) -> FlowContext<'_> {
        FlowContext {
            flows,
            computed: &NO_COMPUTED,
            action_id: "act",
            intent_id: "intent-1",
            timestamp: 1_000,
            max_call_depth: 8,
        }
    }

    fn fresh() -> FlowState {
        FlowState::new(Snapshot::genesis(json!({"count": 0}), "h"))
    }

    fn no_params() -> Vec<(String, ExprNode)> {
        Vec::new()
    }

    #[test]
    fn test_seq_applies_patches_in_order() {
        let flows = BTreeMap::new();
        let flow = FlowNode::seq(vec![
            FlowNode::set("data.count", ExprNode::lit(1)),
            FlowNode::set(
                "data.double",
                ExprNode::add(ExprNode::get("data.count"), ExprNode::get("data.count")),
            ),
        ]);
        let result = evaluate_flow(&flow, &ctx(&flows), fresh());
        assert_eq!(result.state.status, FlowStatus::Running);
        assert_eq!(result.state.patches.len(), 2);
        assert_eq!(result.state.snapshot.data["double"], json!(2));
        assert_eq!(result.trace.children.len(), 2);
    }

    #[test]
    fn test_computed_values_follow_each_patch() {
        let flows = BTreeMap::new();
        let computed = BTreeMap::from([(
            "double".to_string(),
            ExprNode::add(ExprNode::get("data.count"), ExprNode::get("data.count")),
        )]);
        let ctx = FlowContext {
            computed: &computed,
            ..ctx(&flows)
        };
        let flow = FlowNode::seq(vec![
            FlowNode::set("data.count", ExprNode::lit(3)),
            FlowNode::set("data.seen", ExprNode::get("computed.double")),
            FlowNode::when(
                ExprNode::gt(ExprNode::get("computed.double"), ExprNode::lit(5)),
                FlowNode::set("data.big", ExprNode::lit(true)),
            ),
        ]);
        let result = evaluate_flow(&flow, &ctx, fresh());
        assert_eq!(result.state.snapshot.data["seen"], json!(6));
        assert_eq!(result.state.snapshot.data["big"], json!(true));
        assert_eq!(result.state.snapshot.computed["double"], json!(6));
    }

    #[test]
    fn test_effect_suspends_and_stops_sequence() {
        let flows = BTreeMap::new();
        let flow = FlowNode::seq(vec![
            FlowNode::set("data.count", ExprNode::lit(1)),
            FlowNode::effect("http.get", [("url", ExprNode::lit("https://example.test"))]),
            FlowNode::set("data.count", ExprNode::lit(99)),
        ]);
        let result = evaluate_flow(&flow, &ctx(&flows), fresh());
        let state = result.state;

        assert_eq!(state.status, FlowStatus::Pending);
        assert_eq!(state.snapshot.data["count"], json!(1));
        assert_eq!(state.requirements.len(), 1);
        let requirement = &state.requirements[0];
        assert_eq!(requirement.effect_type, "http.get");
        assert_eq!(requirement.param_str("url"), Some("https://example.test"));
        assert_eq!(requirement.flow_position.node_path.to_string(), "1");
        assert_eq!(requirement.created_at, 1_000);
        assert_eq!(state.suspended_at, Some("1".parse().unwrap()));
    }

    #[test]
    fn test_requirement_ids_are_deterministic() {
        let flows = BTreeMap::new();
        let flow = FlowNode::effect("x", no_params());
        let a = evaluate_flow(&flow, &ctx(&flows), fresh());
        let b = evaluate_flow(&flow, &ctx(&flows), fresh());
        assert_eq!(a.state.requirements[0].id, b.state.requirements[0].id);

        let other_intent = FlowContext {
            intent_id: "intent-2",
            ..ctx(&flows)
        };
        let c = evaluate_flow(&flow, &other_intent, fresh());
        assert_ne!(a.state.requirements[0].id, c.state.requirements[0].id);
    }

    #[test]
    fn test_resume_continues_after_effect() {
        let flows = BTreeMap::new();
        let flow = FlowNode::seq(vec![
            FlowNode::set("data.count", ExprNode::lit(1)),
            FlowNode::effect("x", no_params()),
            FlowNode::set(
                "data.count",
                ExprNode::add(ExprNode::get("data.count"), ExprNode::lit(10)),
            ),
        ]);
        let first = evaluate_flow(&flow, &ctx(&flows), fresh());
        let at = first.state.suspended_at.clone().unwrap();

        let result = resume_flow(&flow, &ctx(&flows), FlowState::new(first.state.snapshot), &at);
        assert_eq!(result.state.status, FlowStatus::Running);
        assert_eq!(result.state.snapshot.data["count"], json!(11));
        assert_eq!(result.state.patches.len(), 1);
    }

    #[test]
    fn test_resume_keeps_recorded_branch() {
        let flows = BTreeMap::new();
        // The effect flips the condition; resume must not re-evaluate it.
        let flow = FlowNode::if_else(
            ExprNode::equals(ExprNode::get("data.count"), ExprNode::lit(0)),
            FlowNode::seq(vec![
                FlowNode::effect("x", no_params()),
                FlowNode::set("data.branch", ExprNode::lit("then")),
            ]),
            FlowNode::set("data.branch", ExprNode::lit("else")),
        );
        let first = evaluate_flow(&flow, &ctx(&flows), fresh());
        let at = first.state.suspended_at.clone().unwrap();
        assert_eq!(at.to_string(), "then/0");

        let mut snapshot = first.state.snapshot;
        snapshot.data["count"] = json!(5);
        let result = resume_flow(&flow, &ctx(&flows), FlowState::new(snapshot), &at);
        assert_eq!(result.state.snapshot.data["branch"], json!("then"));
    }

    #[test]
    fn test_resume_inside_called_flow() {
        let mut flows = BTreeMap::new();
        flows.insert(
            "charge".to_string(),
            FlowNode::seq(vec![
                FlowNode::effect("pay", no_params()),
                FlowNode::set("data.paid", ExprNode::lit(true)),
            ]),
        );
        let flow = FlowNode::seq(vec![
            FlowNode::call("charge"),
            FlowNode::set("data.done", ExprNode::lit(true)),
        ]);
        let first = evaluate_flow(&flow, &ctx(&flows), fresh());
        let at = first.state.suspended_at.clone().unwrap();
        assert_eq!(at.to_string(), "0/call:charge/0");

        let result = resume_flow(&flow, &ctx(&flows), FlowState::new(first.state.snapshot), &at);
        assert_eq!(result.state.status, FlowStatus::Running);
        assert_eq!(result.state.snapshot.data["paid"], json!(true));
        assert_eq!(result.state.snapshot.data["done"], json!(true));
    }

    #[test]
    fn test_resume_inside_flow_named_like_a_path() {
        let mut flows = BTreeMap::new();
        flows.insert(
            "billing/charge".to_string(),
            FlowNode::seq(vec![
                FlowNode::effect("pay", no_params()),
                FlowNode::set("data.paid", ExprNode::lit(true)),
            ]),
        );
        let flow = FlowNode::call("billing/charge");
        let first = evaluate_flow(&flow, &ctx(&flows), fresh());
        let requirement = &first.state.requirements[0];

        // Resume from the wire form of the recorded position.
        let wire = serde_json::to_value(&requirement.flow_position.node_path).unwrap();
        let at: NodePath = serde_json::from_value(wire).unwrap();
        assert_eq!(at, requirement.flow_position.node_path);

        let result = resume_flow(&flow, &ctx(&flows), FlowState::new(first.state.snapshot), &at);
        assert_eq!(result.state.status, FlowStatus::Running);
        assert_eq!(result.state.snapshot.data["paid"], json!(true));
    }

    #[test]
    fn test_resume_at_non_effect_fails() {
        let flows = BTreeMap::new();
        let flow = FlowNode::seq(vec![FlowNode::set("data.a", ExprNode::lit(1))]);
        let result = resume_flow(&flow, &ctx(&flows), fresh(), &"0".parse().unwrap());
        assert_eq!(result.state.status, FlowStatus::Error);
        assert_eq!(result.state.error.unwrap().code, INVALID_RESUME);
    }

    #[test]
    fn test_if_without_else_is_a_no_op() {
        let flows = BTreeMap::new();
        let flow = FlowNode::when(ExprNode::lit(0), FlowNode::halt(None));
        let result = evaluate_flow(&flow, &ctx(&flows), fresh());
        assert_eq!(result.state.status, FlowStatus::Running);
        assert!(result.state.patches.is_empty());
    }

    #[test]
    fn test_halt_and_fail() {
        let flows = BTreeMap::new();
        let halted = evaluate_flow(
            &FlowNode::seq(vec![
                FlowNode::halt(Some("done")),
                FlowNode::set("data.x", ExprNode::lit(1)),
            ]),
            &ctx(&flows),
            fresh(),
        );
        assert_eq!(halted.state.status, FlowStatus::Halted);
        assert!(halted.state.patches.is_empty());
        assert!(halted.state.error.is_none());

        let failed = evaluate_flow(&FlowNode::fail("OUT_OF_STOCK", None), &ctx(&flows), fresh());
        let error = failed.state.error.unwrap();
        assert_eq!(failed.state.status, FlowStatus::Error);
        assert_eq!(error.code, "OUT_OF_STOCK");
        assert_eq!(error.message, "OUT_OF_STOCK");
        assert_eq!(error.action_id.as_deref(), Some("act"));

        let with_message = evaluate_flow(
            &FlowNode::fail(
                "LOW",
                Some(ExprNode::concat(vec![ExprNode::lit("count="), ExprNode::get("data.count")])),
            ),
            &ctx(&flows),
            fresh(),
        );
        assert_eq!(with_message.state.error.unwrap().message, "count=0");
    }

    #[test]
    fn test_unknown_flow() {
        let flows = BTreeMap::new();
        let result = evaluate_flow(&FlowNode::call("missing"), &ctx(&flows), fresh());
        let error = result.state.error.unwrap();
        assert_eq!(error.code, UNKNOWN_FLOW);
        assert_eq!(error.message, "Unknown flow: missing");
    }

    #[test]
    fn test_recursive_call_hits_depth_limit() {
        let mut flows = BTreeMap::new();
        flows.insert("loop".to_string(), FlowNode::call("loop"));
        let result = evaluate_flow(&FlowNode::call("loop"), &ctx(&flows), fresh());
        assert_eq!(result.state.error.unwrap().code, CALL_DEPTH_EXCEEDED);
    }

    #[test]
    fn test_invalid_patch_fails_flow() {
        let flows = BTreeMap::new();
        let flow = FlowNode::seq(vec![
            FlowNode::merge("data.x", ExprNode::lit(3)),
            FlowNode::set("data.after", ExprNode::lit(true)),
        ]);
        let result = evaluate_flow(&flow, &ctx(&flows), fresh());
        assert_eq!(result.state.error.unwrap().code, PATCH_FAILED);
        assert!(result.state.snapshot.get("after").is_none());

        let reserved = evaluate_flow(
            &FlowNode::set("data.$host.x", ExprNode::lit(1)),
            &ctx(&flows),
            fresh(),
        );
        assert_eq!(reserved.state.error.unwrap().code, PATCH_FAILED);
    }

    #[test]
    fn test_system_patches_are_allowed() {
        let flows = BTreeMap::new();
        let result = evaluate_flow(
            &FlowNode::set("system.currentAction", ExprNode::lit("manual")),
            &ctx(&flows),
            fresh(),
        );
        assert_eq!(result.state.status, FlowStatus::Running);
        assert_eq!(result.state.snapshot.system.current_action.as_deref(), Some("manual"));
        assert_eq!(result.state.snapshot.system.status, SystemStatus::Idle);
    }

    #[test]
    fn test_trace_does_not_change_outcome() {
        let flows = BTreeMap::new();
        let flow = FlowNode::seq(vec![
            FlowNode::set("data.count", ExprNode::lit(4)),
            FlowNode::when(ExprNode::get("data.count"), FlowNode::halt(None)),
        ]);
        let a = evaluate_flow(&flow, &ctx(&flows), fresh());
        let b = evaluate_flow(&flow, &ctx(&flows), fresh());
        assert_eq!(a, b);
        assert_eq!(a.trace.count(), 4);
    }
}
