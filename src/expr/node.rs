//! Expression tree
//!
//! The set of expression kinds is closed. On the wire every node is an
//! object tagged by `kind`, e.g. `{"kind": "add", "left": ..., "right": ...}`.
//! Any non-object JSON value in expression position reads as a literal, so
//! `{"kind": "div", "left": 10, "right": 0}` is accepted. Object literals
//! still need the `lit` form.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

type Expr = Box<ExprNode>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", tag = "kind", rename_all = "camelCase")]
pub enum ExprNode {
    // Values
    Lit { value: Value },
    Get { path: String },

    // Comparison
    Eq { left: Expr, right: Expr },
    Neq { left: Expr, right: Expr },
    Gt { left: Expr, right: Expr },
    Gte { left: Expr, right: Expr },
    Lt { left: Expr, right: Expr },
    Lte { left: Expr, right: Expr },

    // Logic
    And { args: Vec<ExprNode> },
    Or { args: Vec<ExprNode> },
    Not { arg: Expr },
    If {
        cond: Expr,
        then: Expr,
        #[serde(rename = "else")]
        otherwise: Expr,
    },

    // Arithmetic
    Add { left: Expr, right: Expr },
    Sub { left: Expr, right: Expr },
    Mul { left: Expr, right: Expr },
    Div { left: Expr, right: Expr },
    Mod { left: Expr, right: Expr },
    Neg { arg: Expr },
    Abs { arg: Expr },
    Floor { arg: Expr },
    Ceil { arg: Expr },
    Round { arg: Expr },
    Min { args: Vec<ExprNode> },
    Max { args: Vec<ExprNode> },

    // Strings
    Concat { args: Vec<ExprNode> },
    Substring {
        #[serde(rename = "str")]
        subject: Expr,
        start: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<Expr>,
    },
    Trim { arg: Expr },
    ToLowerCase { arg: Expr },
    ToUpperCase { arg: Expr },
    StrLen { arg: Expr },
    ToString { arg: Expr },

    // Collections; `$item` / `$index` are bound inside the per-element expression
    Map {
        array: Expr,
        #[serde(rename = "fn")]
        mapper: Expr,
    },
    Filter { array: Expr, predicate: Expr },
    Find { array: Expr, predicate: Expr },
    Every { array: Expr, predicate: Expr },
    #[serde(rename = "some")]
    Any { array: Expr, predicate: Expr },
    Slice {
        array: Expr,
        start: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<Expr>,
    },
    At { array: Expr, index: Expr },
    First { array: Expr },
    Last { array: Expr },
    Includes { array: Expr, item: Expr },
    Len { arg: Expr },

    // Objects
    Keys { obj: Expr },
    Values { obj: Expr },
    Entries { obj: Expr },
    Merge { args: Vec<ExprNode> },

    // Types
    Typeof { arg: Expr },
    IsNull { arg: Expr },
    Coalesce { args: Vec<ExprNode> },
}

impl ExprNode {
    pub fn lit(value: impl Into<Value>) -> Self {
        ExprNode::Lit {
            value: value.into(),
        }
    }

    pub fn null() -> Self {
        ExprNode::Lit { value: Value::Null }
    }

    pub fn get(path: impl Into<String>) -> Self {
        ExprNode::Get { path: path.into() }
    }

    pub fn equals(left: ExprNode, right: ExprNode) -> Self {
        ExprNode::Eq {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn gt(left: ExprNode, right: ExprNode) -> Self {
        ExprNode::Gt {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn add(left: ExprNode, right: ExprNode) -> Self {
        ExprNode::Add {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn sub(left: ExprNode, right: ExprNode) -> Self {
        ExprNode::Sub {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn div(left: ExprNode, right: ExprNode) -> Self {
        ExprNode::Div {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn modulo(left: ExprNode, right: ExprNode) -> Self {
        ExprNode::Mod {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(args: Vec<ExprNode>) -> Self {
        ExprNode::And { args }
    }

    pub fn or(args: Vec<ExprNode>) -> Self {
        ExprNode::Or { args }
    }

    pub fn not(arg: ExprNode) -> Self {
        ExprNode::Not { arg: Box::new(arg) }
    }

    pub fn concat(args: Vec<ExprNode>) -> Self {
        ExprNode::Concat { args }
    }

    pub fn len(arg: ExprNode) -> Self {
        ExprNode::Len { arg: Box::new(arg) }
    }

    /// Wire name of this node's kind
    pub fn kind(&self) -> &'static str {
        match self {
            ExprNode::Lit { .. } => "lit",
            ExprNode::Get { .. } => "get",
            ExprNode::Eq { .. } => "eq",
            ExprNode::Neq { .. } => "neq",
            ExprNode::Gt { .. } => "gt",
            ExprNode::Gte { .. } => "gte",
            ExprNode::Lt { .. } => "lt",
            ExprNode::Lte { .. } => "lte",
            ExprNode::And { .. } => "and",
            ExprNode::Or { .. } => "or",
            ExprNode::Not { .. } => "not",
            ExprNode::If { .. } => "if",
            ExprNode::Add { .. } => "add",
            ExprNode::Sub { .. } => "sub",
            ExprNode::Mul { .. } => "mul",
            ExprNode::Div { .. } => "div",
            ExprNode::Mod { .. } => "mod",
            ExprNode::Neg { .. } => "neg",
            ExprNode::Abs { .. } => "abs",
            ExprNode::Floor { .. } => "floor",
            ExprNode::Ceil { .. } => "ceil",
            ExprNode::Round { .. } => "round",
            ExprNode::Min { .. } => "min",
            ExprNode::Max { .. } => "max",
            ExprNode::Concat { .. } => "concat",
            ExprNode::Substring { .. } => "substring",
            ExprNode::Trim { .. } => "trim",
            ExprNode::ToLowerCase { .. } => "toLowerCase",
            ExprNode::ToUpperCase { .. } => "toUpperCase",
            ExprNode::StrLen { .. } => "strLen",
            ExprNode::ToString { .. } => "toString",
            ExprNode::Map { .. } => "map",
            ExprNode::Filter { .. } => "filter",
            ExprNode::Find { .. } => "find",
            ExprNode::Every { .. } => "every",
            ExprNode::Any { .. } => "some",
            ExprNode::Slice { .. } => "slice",
            ExprNode::At { .. } => "at",
            ExprNode::First { .. } => "first",
            ExprNode::Last { .. } => "last",
            ExprNode::Includes { .. } => "includes",
            ExprNode::Len { .. } => "len",
            ExprNode::Keys { .. } => "keys",
            ExprNode::Values { .. } => "values",
            ExprNode::Entries { .. } => "entries",
            ExprNode::Merge { .. } => "merge",
            ExprNode::Typeof { .. } => "typeof",
            ExprNode::IsNull { .. } => "isNull",
            ExprNode::Coalesce { .. } => "coalesce",
        }
    }
}

impl From<Value> for ExprNode {
    fn from(value: Value) -> Self {
        ExprNode::Lit { value }
    }
}

impl Serialize for ExprNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ExprNode::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for ExprNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            object @ Value::Object(_) => ExprNode::deserialize(object).map_err(D::Error::custom),
            value => Ok(ExprNode::Lit { value }),
        }
    }
}
