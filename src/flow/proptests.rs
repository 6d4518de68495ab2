//! Property-based tests for the flow interpreter

use super::*;
use crate::expr::ExprNode;
use crate::snapshot::Snapshot;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_step() -> impl Strategy<Value = FlowNode> {
    prop_oneof![
        4 => (0i64..100).prop_map(|n| {
            FlowNode::set(
                "data.count",
                ExprNode::add(ExprNode::get("data.count"), ExprNode::lit(n)),
            )
        }),
        2 => "[a-z]{1,6}"
            .prop_map(|name| FlowNode::set(format!("data.{name}"), ExprNode::lit(true))),
        1 => "[a-z]{1,6}"
            .prop_map(|kind| FlowNode::effect(kind, [("n", ExprNode::get("data.count"))])),
        1 => Just(FlowNode::halt(None)),
        1 => "[A-Z]{3,6}".prop_map(|code| FlowNode::fail(code, None)),
    ]
}

fn arb_flow() -> impl Strategy<Value = FlowNode> {
    proptest::collection::vec(arb_step(), 0..8).prop_map(FlowNode::seq)
}

fn is_stopping(step: &FlowNode) -> bool {
    matches!(
        step,
        FlowNode::Effect { .. } | FlowNode::Halt { .. } | FlowNode::Fail { .. }
    )
}

fn run(flow: &FlowNode, intent_id: &str) -> FlowResult {
    let flows = BTreeMap::new();
    let computed = BTreeMap::new();
    let ctx = FlowContext {
        flows: &flows,
        computed: &computed,
        action_id: "prop",
        intent_id,
        timestamp: 42,
        max_call_depth: 4,
    };
    evaluate_flow(
        flow,
        &ctx,
        FlowState::new(Snapshot::genesis(json!({"count": 0}), "h")),
    )
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_flow_evaluation_is_deterministic(flow in arb_flow()) {
        prop_assert_eq!(run(&flow, "intent-a"), run(&flow, "intent-a"));
    }

    #[test]
    fn prop_nothing_runs_after_a_stop(flow in arb_flow()) {
        let FlowNode::Seq { steps } = &flow else { unreachable!() };
        let expected = steps.iter().take_while(|step| !is_stopping(step)).count();
        let result = run(&flow, "intent-a");
        prop_assert_eq!(result.state.patches.len(), expected);
        prop_assert_eq!(result.trace.children.len(), (expected + 1).min(steps.len()));
    }

    #[test]
    fn prop_status_matches_first_stop(flow in arb_flow()) {
        let FlowNode::Seq { steps } = &flow else { unreachable!() };
        let result = run(&flow, "intent-a");
        let expected = match steps.iter().find(|step| is_stopping(step)) {
            None => FlowStatus::Running,
            Some(FlowNode::Effect { .. }) => FlowStatus::Pending,
            Some(FlowNode::Halt { .. }) => FlowStatus::Halted,
            Some(_) => FlowStatus::Error,
        };
        prop_assert_eq!(result.state.status, expected);
        prop_assert_eq!(result.state.requirements.is_empty(), expected != FlowStatus::Pending);
        prop_assert_eq!(result.state.error.is_some(), expected == FlowStatus::Error);
    }

    #[test]
    fn prop_distinct_intents_get_distinct_requirement_ids(flow in arb_flow()) {
        let a = run(&flow, "intent-a");
        let b = run(&flow, "intent-b");
        for (left, right) in a.state.requirements.iter().zip(&b.state.requirements) {
            prop_assert_ne!(&left.id, &right.id);
        }
    }

    #[test]
    fn prop_patches_never_bump_version(flow in arb_flow()) {
        prop_assert_eq!(run(&flow, "intent-a").state.snapshot.version(), 0);
    }
}
