//! Expression evaluation
//!
//! `evaluate` is a pure function of the expression and the context: it never
//! reads the clock, never draws randomness and never touches I/O. Runtime
//! type mismatches coerce or produce `null` instead of failing.

use super::coerce::{
    clamp_index, compare, is_truthy, loose_eq, number_value, to_index, to_number, to_text,
    type_name,
};
use super::node::ExprNode;
use crate::snapshot::{path, Snapshot};
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use thiserror::Error;

/// Deepest expression nesting the evaluator will follow
pub const MAX_EXPR_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("expression nesting exceeds {0} levels")]
    DepthExceeded(usize),
    #[error("`get` requires a non-empty path")]
    EmptyPath,
}

/// Read-only view an expression is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    snapshot: &'a Snapshot,
    frame: Option<(&'a Value, usize)>,
}

impl<'a> EvalContext<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot,
            frame: None,
        }
    }

    pub fn snapshot(&self) -> &'a Snapshot {
        self.snapshot
    }

    /// Context for one element of a collection operator.
    pub fn with_item<'b>(&self, item: &'b Value, index: usize) -> EvalContext<'b>
    where
        'a: 'b,
    {
        EvalContext {
            snapshot: self.snapshot,
            frame: Some((item, index)),
        }
    }

    /// Resolve a dot path against the context roots.
    pub fn resolve(&self, full_path: &str) -> Result<Value, EvalError> {
        let segments = path::segments(full_path);
        let Some((root, rest)) = segments.split_first() else {
            return Err(EvalError::EmptyPath);
        };
        let value = match *root {
            "data" => lookup(&self.snapshot.data, rest),
            "input" => lookup(&self.snapshot.input, rest),
            "computed" => match rest.split_first() {
                None => Value::Object(self.snapshot.computed.clone()),
                Some((name, rest)) => self
                    .snapshot
                    .computed
                    .get(*name)
                    .map_or(Value::Null, |value| lookup(value, rest)),
            },
            "system" => lookup(&as_value(&self.snapshot.system), rest),
            "meta" => lookup(&as_value(&self.snapshot.meta), rest),
            "$item" => self
                .frame
                .map_or(Value::Null, |(item, _)| lookup(item, rest)),
            "$index" => match self.frame {
                Some((_, index)) if rest.is_empty() => Value::from(index),
                _ => Value::Null,
            },
            _ => lookup(&self.snapshot.data, &segments),
        };
        Ok(value)
    }
}

fn lookup(root: &Value, segments: &[&str]) -> Value {
    path::get(root, segments).cloned().unwrap_or(Value::Null)
}

fn as_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Evaluate `expr` against `ctx`.
pub fn evaluate(expr: &ExprNode, ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
    eval_at(expr, ctx, 0)
}

#[allow(clippy::too_many_lines)]
fn eval_at(expr: &ExprNode, ctx: &EvalContext<'_>, depth: usize) -> Result<Value, EvalError> {
    if depth > MAX_EXPR_DEPTH {
        return Err(EvalError::DepthExceeded(MAX_EXPR_DEPTH));
    }
    let eval = |node: &ExprNode| eval_at(node, ctx, depth + 1);

    let value = match expr {
        ExprNode::Lit { value } => value.clone(),
        ExprNode::Get { path } => ctx.resolve(path)?,

        ExprNode::Eq { left, right } => Value::Bool(loose_eq(&eval(left)?, &eval(right)?)),
        ExprNode::Neq { left, right } => Value::Bool(!loose_eq(&eval(left)?, &eval(right)?)),
        ExprNode::Gt { left, right } => ordered(&eval(left)?, &eval(right)?, |o| o.is_gt()),
        ExprNode::Gte { left, right } => ordered(&eval(left)?, &eval(right)?, |o| o.is_ge()),
        ExprNode::Lt { left, right } => ordered(&eval(left)?, &eval(right)?, |o| o.is_lt()),
        ExprNode::Lte { left, right } => ordered(&eval(left)?, &eval(right)?, |o| o.is_le()),

        ExprNode::And { args } => {
            for arg in args {
                if !is_truthy(&eval(arg)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Value::Bool(true)
        }
        ExprNode::Or { args } => {
            for arg in args {
                if is_truthy(&eval(arg)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Value::Bool(false)
        }
        ExprNode::Not { arg } => Value::Bool(!is_truthy(&eval(arg)?)),
        ExprNode::If {
            cond,
            then,
            otherwise,
        } => {
            if is_truthy(&eval(cond)?) {
                eval(then)?
            } else {
                eval(otherwise)?
            }
        }

        ExprNode::Add { left, right } => arith(&eval(left)?, &eval(right)?, |a, b| Some(a + b)),
        ExprNode::Sub { left, right } => arith(&eval(left)?, &eval(right)?, |a, b| Some(a - b)),
        ExprNode::Mul { left, right } => arith(&eval(left)?, &eval(right)?, |a, b| Some(a * b)),
        ExprNode::Div { left, right } => arith(&eval(left)?, &eval(right)?, |a, b| {
            (b != 0.0).then(|| a / b)
        }),
        ExprNode::Mod { left, right } => arith(&eval(left)?, &eval(right)?, |a, b| {
            (b != 0.0).then(|| a % b)
        }),
        ExprNode::Neg { arg } => unary(&eval(arg)?, |a| -a),
        ExprNode::Abs { arg } => unary(&eval(arg)?, f64::abs),
        ExprNode::Floor { arg } => unary(&eval(arg)?, f64::floor),
        ExprNode::Ceil { arg } => unary(&eval(arg)?, f64::ceil),
        // Halves round toward positive infinity
        ExprNode::Round { arg } => unary(&eval(arg)?, |a| (a + 0.5).floor()),
        ExprNode::Min { args } => extremum(args, &eval, Ordering::Less)?,
        ExprNode::Max { args } => extremum(args, &eval, Ordering::Greater)?,

        ExprNode::Concat { args } => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&to_text(&eval(arg)?));
            }
            Value::String(out)
        }
        ExprNode::Substring {
            subject,
            start,
            end,
        } => {
            let chars: Vec<char> = to_text(&eval(subject)?).chars().collect();
            let len = chars.len();
            let clamp = |value: &Value| {
                to_index(value).map_or(0, |index| clamp_index(index.max(0), len))
            };
            let from = clamp(&eval(start)?);
            let to = match end {
                Some(end) => clamp(&eval(end)?),
                None => len,
            };
            let (from, to) = if from > to { (to, from) } else { (from, to) };
            Value::String(chars[from..to].iter().collect())
        }
        ExprNode::Trim { arg } => Value::String(to_text(&eval(arg)?).trim().to_string()),
        ExprNode::ToLowerCase { arg } => Value::String(to_text(&eval(arg)?).to_lowercase()),
        ExprNode::ToUpperCase { arg } => Value::String(to_text(&eval(arg)?).to_uppercase()),
        ExprNode::StrLen { arg } => match eval(arg)? {
            Value::String(s) => Value::from(s.chars().count()),
            _ => Value::from(0),
        },
        ExprNode::ToString { arg } => Value::String(to_text(&eval(arg)?)),

        ExprNode::Map { array, mapper } => {
            let items = elements(eval(array)?);
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                out.push(eval_at(mapper, &ctx.with_item(item, index), depth + 1)?);
            }
            Value::Array(out)
        }
        ExprNode::Filter { array, predicate } => {
            let items = elements(eval(array)?);
            let mut out = Vec::new();
            for (index, item) in items.iter().enumerate() {
                if is_truthy(&eval_at(predicate, &ctx.with_item(item, index), depth + 1)?) {
                    out.push(item.clone());
                }
            }
            Value::Array(out)
        }
        ExprNode::Find { array, predicate } => {
            let items = elements(eval(array)?);
            let mut found = Value::Null;
            for (index, item) in items.iter().enumerate() {
                if is_truthy(&eval_at(predicate, &ctx.with_item(item, index), depth + 1)?) {
                    found = item.clone();
                    break;
                }
            }
            found
        }
        ExprNode::Every { array, predicate } => {
            let items = elements(eval(array)?);
            let mut all = true;
            for (index, item) in items.iter().enumerate() {
                if !is_truthy(&eval_at(predicate, &ctx.with_item(item, index), depth + 1)?) {
                    all = false;
                    break;
                }
            }
            Value::Bool(all)
        }
        ExprNode::Any { array, predicate } => {
            let items = elements(eval(array)?);
            let mut any = false;
            for (index, item) in items.iter().enumerate() {
                if is_truthy(&eval_at(predicate, &ctx.with_item(item, index), depth + 1)?) {
                    any = true;
                    break;
                }
            }
            Value::Bool(any)
        }
        ExprNode::Slice { array, start, end } => {
            let items = elements(eval(array)?);
            let len = items.len();
            let from = to_index(&eval(start)?).map_or(0, |index| clamp_index(index, len));
            let to = match end {
                Some(end) => to_index(&eval(end)?).map_or(len, |index| clamp_index(index, len)),
                None => len,
            };
            if from >= to {
                Value::Array(Vec::new())
            } else {
                Value::Array(items[from..to].to_vec())
            }
        }
        ExprNode::At { array, index } => {
            let items = elements(eval(array)?);
            match to_index(&eval(index)?) {
                Some(index) => element_at(&items, index),
                None => Value::Null,
            }
        }
        ExprNode::First { array } => elements(eval(array)?).into_iter().next().unwrap_or_default(),
        ExprNode::Last { array } => elements(eval(array)?).pop().unwrap_or_default(),
        ExprNode::Includes { array, item } => {
            let needle = eval(item)?;
            let found = match eval(array)? {
                Value::Array(items) => items.iter().any(|candidate| loose_eq(candidate, &needle)),
                Value::String(haystack) => haystack.contains(&to_text(&needle)),
                _ => false,
            };
            Value::Bool(found)
        }
        ExprNode::Len { arg } => {
            let len = match eval(arg)? {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::String(s) => s.chars().count(),
                _ => 0,
            };
            Value::from(len)
        }

        ExprNode::Keys { obj } => match eval(obj)? {
            Value::Object(map) => Value::Array(map.into_iter().map(|(k, _)| Value::String(k)).collect()),
            _ => Value::Array(Vec::new()),
        },
        ExprNode::Values { obj } => match eval(obj)? {
            Value::Object(map) => Value::Array(map.into_iter().map(|(_, v)| v).collect()),
            _ => Value::Array(Vec::new()),
        },
        ExprNode::Entries { obj } => match eval(obj)? {
            Value::Object(map) => Value::Array(
                map.into_iter()
                    .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                    .collect(),
            ),
            _ => Value::Array(Vec::new()),
        },
        ExprNode::Merge { args } => {
            let mut merged = Map::new();
            for arg in args {
                if let Value::Object(map) = eval(arg)? {
                    merged.extend(map);
                }
            }
            Value::Object(merged)
        }

        ExprNode::Typeof { arg } => Value::String(type_name(&eval(arg)?).to_string()),
        ExprNode::IsNull { arg } => Value::Bool(eval(arg)?.is_null()),
        ExprNode::Coalesce { args } => {
            let mut first = Value::Null;
            for arg in args {
                let value = eval(arg)?;
                if !value.is_null() {
                    first = value;
                    break;
                }
            }
            first
        }
    };
    Ok(value)
}

fn ordered(left: &Value, right: &Value, accept: impl Fn(Ordering) -> bool) -> Value {
    Value::Bool(compare(left, right).is_some_and(accept))
}

fn arith(left: &Value, right: &Value, op: impl Fn(f64, f64) -> Option<f64>) -> Value {
    match (to_number(left), to_number(right)) {
        (Some(a), Some(b)) => op(a, b).map_or(Value::Null, number_value),
        _ => Value::Null,
    }
}

fn unary(arg: &Value, op: impl Fn(f64) -> f64) -> Value {
    to_number(arg).map_or(Value::Null, |a| number_value(op(a)))
}

fn extremum(
    args: &[ExprNode],
    eval: &impl Fn(&ExprNode) -> Result<Value, EvalError>,
    keep: Ordering,
) -> Result<Value, EvalError> {
    let mut best: Option<f64> = None;
    for arg in args {
        let Some(candidate) = to_number(&eval(arg)?) else {
            return Ok(Value::Null);
        };
        best = match best {
            Some(current) if current.partial_cmp(&candidate) != Some(keep.reverse()) => {
                Some(current)
            }
            _ => Some(candidate),
        };
    }
    Ok(best.map_or(Value::Null, number_value))
}

fn elements(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
fn element_at(items: &[Value], index: i64) -> Value {
    let len = items.len() as i64;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        items[resolved as usize].clone()
    } else {
        Value::Null
    }
}
