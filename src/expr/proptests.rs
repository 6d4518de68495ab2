//! Property-based tests for the expression evaluator
//!
//! Evaluation must be total over well-formed trees and a pure function of
//! (expression, snapshot).

use super::*;
use crate::snapshot::Snapshot;
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::from),
        (-1000.0f64..1000.0).prop_map(Value::from),
        "[a-z0-9 ]{0,8}".prop_map(Value::String),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            proptest::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn arb_path() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("data.count".to_string()),
        Just("data.items".to_string()),
        Just("data.items.0".to_string()),
        Just("data.missing.x".to_string()),
        Just("system.status".to_string()),
        Just("meta.version".to_string()),
        Just("input".to_string()),
        Just("$item".to_string()),
        Just("$index".to_string()),
    ]
}

fn arb_expr() -> impl Strategy<Value = ExprNode> {
    let leaf = prop_oneof![
        arb_value().prop_map(ExprNode::lit),
        arb_path().prop_map(ExprNode::get),
    ];
    leaf.prop_recursive(4, 48, 3, |inner| {
        let boxed = inner.clone().prop_map(Box::new);
        prop_oneof![
            (boxed.clone(), boxed.clone()).prop_map(|(left, right)| ExprNode::Add { left, right }),
            (boxed.clone(), boxed.clone()).prop_map(|(left, right)| ExprNode::Div { left, right }),
            (boxed.clone(), boxed.clone()).prop_map(|(left, right)| ExprNode::Mod { left, right }),
            (boxed.clone(), boxed.clone()).prop_map(|(left, right)| ExprNode::Lt { left, right }),
            (boxed.clone(), boxed.clone()).prop_map(|(left, right)| ExprNode::Eq { left, right }),
            proptest::collection::vec(inner.clone(), 0..3).prop_map(|args| ExprNode::And { args }),
            proptest::collection::vec(inner.clone(), 0..3)
                .prop_map(|args| ExprNode::Concat { args }),
            proptest::collection::vec(inner.clone(), 0..3)
                .prop_map(|args| ExprNode::Merge { args }),
            (boxed.clone(), boxed.clone())
                .prop_map(|(array, mapper)| ExprNode::Map { array, mapper }),
            (boxed.clone(), boxed.clone())
                .prop_map(|(array, predicate)| ExprNode::Filter { array, predicate }),
            (boxed.clone(), boxed.clone(), proptest::option::of(boxed.clone()))
                .prop_map(|(array, start, end)| ExprNode::Slice { array, start, end }),
            (boxed.clone(), boxed.clone(), boxed.clone()).prop_map(|(cond, then, otherwise)| {
                ExprNode::If {
                    cond,
                    then,
                    otherwise,
                }
            }),
            boxed.clone().prop_map(|arg| ExprNode::Len { arg }),
            boxed.clone().prop_map(|arg| ExprNode::Round { arg }),
            boxed.prop_map(|obj| ExprNode::Entries { obj }),
        ]
    })
}

fn test_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::genesis(
        json!({"count": 2, "items": [1, "two", {"three": 3}], "flag": true}),
        "proptest",
    );
    snapshot.input = json!({"amount": 5});
    snapshot
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_evaluation_is_total(expr in arb_expr()) {
        let snapshot = test_snapshot();
        prop_assert!(evaluate(&expr, &EvalContext::new(&snapshot)).is_ok());
    }

    #[test]
    fn prop_evaluation_is_deterministic(expr in arb_expr()) {
        let snapshot = test_snapshot();
        let first = evaluate(&expr, &EvalContext::new(&snapshot));
        let second = evaluate(&expr, &EvalContext::new(&snapshot.clone()));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_division_by_zero_is_null(left in arb_value()) {
        let snapshot = test_snapshot();
        let ctx = EvalContext::new(&snapshot);
        let div = ExprNode::div(ExprNode::lit(left.clone()), ExprNode::lit(0));
        let modulo = ExprNode::modulo(ExprNode::lit(left), ExprNode::lit(0));
        prop_assert_eq!(evaluate(&div, &ctx), Ok(Value::Null));
        prop_assert_eq!(evaluate(&modulo, &ctx), Ok(Value::Null));
    }

    #[test]
    fn prop_not_agrees_with_truthiness(value in arb_value()) {
        let snapshot = test_snapshot();
        let ctx = EvalContext::new(&snapshot);
        let negated = evaluate(&ExprNode::not(ExprNode::lit(value.clone())), &ctx);
        prop_assert_eq!(negated, Ok(Value::Bool(!is_truthy(&value))));
    }

    #[test]
    fn prop_len_is_never_negative_or_null(value in arb_value()) {
        let snapshot = test_snapshot();
        let len = evaluate(&ExprNode::len(ExprNode::lit(value)), &EvalContext::new(&snapshot));
        prop_assert!(matches!(len, Ok(Value::Number(n)) if n.as_u64().is_some()));
    }

    #[test]
    fn prop_evaluation_never_mutates_snapshot(expr in arb_expr()) {
        let snapshot = test_snapshot();
        let before = snapshot.clone();
        let _ = evaluate(&expr, &EvalContext::new(&snapshot));
        prop_assert_eq!(snapshot, before);
    }
}
