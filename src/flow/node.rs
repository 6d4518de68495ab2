//! Flow tree
//!
//! Like expressions, flow nodes form a closed union tagged by `kind` on the
//! wire. Sub-flows are referenced by name and resolved at evaluation time.

use super::path::{NodePath, PathSegment};
use crate::expr::ExprNode;
use crate::snapshot::PatchOp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FlowNode {
    /// Run steps in order until one stops the flow
    Seq { steps: Vec<FlowNode> },
    If {
        cond: ExprNode,
        then: Box<FlowNode>,
        #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<FlowNode>>,
    },
    Patch {
        op: PatchOp,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<ExprNode>,
    },
    /// Suspend until the named external operation has been fulfilled
    Effect {
        #[serde(rename = "type")]
        effect_type: String,
        #[serde(default)]
        params: BTreeMap<String, ExprNode>,
    },
    Call { flow: String },
    Halt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Fail {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<ExprNode>,
    },
}

impl FlowNode {
    pub fn seq(steps: Vec<FlowNode>) -> Self {
        FlowNode::Seq { steps }
    }

    pub fn when(cond: ExprNode, then: FlowNode) -> Self {
        FlowNode::If {
            cond,
            then: Box::new(then),
            otherwise: None,
        }
    }

    pub fn if_else(cond: ExprNode, then: FlowNode, otherwise: FlowNode) -> Self {
        FlowNode::If {
            cond,
            then: Box::new(then),
            otherwise: Some(Box::new(otherwise)),
        }
    }

    pub fn set(path: impl Into<String>, value: ExprNode) -> Self {
        FlowNode::Patch {
            op: PatchOp::Set,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn merge(path: impl Into<String>, value: ExprNode) -> Self {
        FlowNode::Patch {
            op: PatchOp::Merge,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn unset(path: impl Into<String>) -> Self {
        FlowNode::Patch {
            op: PatchOp::Unset,
            path: path.into(),
            value: None,
        }
    }

    pub fn effect<I, K>(effect_type: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, ExprNode)>,
        K: Into<String>,
    {
        FlowNode::Effect {
            effect_type: effect_type.into(),
            params: params.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn call(flow: impl Into<String>) -> Self {
        FlowNode::Call { flow: flow.into() }
    }

    pub fn halt(reason: Option<&str>) -> Self {
        FlowNode::Halt {
            reason: reason.map(str::to_string),
        }
    }

    pub fn fail(code: impl Into<String>, message: Option<ExprNode>) -> Self {
        FlowNode::Fail {
            code: code.into(),
            message,
        }
    }

    /// Wire name of this node's kind
    pub fn kind(&self) -> &'static str {
        match self {
            FlowNode::Seq { .. } => "seq",
            FlowNode::If { .. } => "if",
            FlowNode::Patch { .. } => "patch",
            FlowNode::Effect { .. } => "effect",
            FlowNode::Call { .. } => "call",
            FlowNode::Halt { .. } => "halt",
            FlowNode::Fail { .. } => "fail",
        }
    }

    /// Find the node at `path`, following `call` edges through `flows`.
    pub fn locate<'a>(
        &'a self,
        path: &NodePath,
        flows: &'a BTreeMap<String, FlowNode>,
    ) -> Option<&'a FlowNode> {
        let mut current = self;
        for segment in path.segments() {
            current = match (current, segment) {
                (FlowNode::Seq { steps }, PathSegment::Step(index)) => steps.get(*index)?,
                (FlowNode::If { then, .. }, PathSegment::Then) => then.as_ref(),
                (FlowNode::If { otherwise, .. }, PathSegment::Else) => otherwise.as_deref()?,
                (FlowNode::Call { flow }, PathSegment::Call(name)) if flow == name => {
                    flows.get(name)?
                }
                _ => return None,
            };
        }
        Some(current)
    }
}
