//! Positions inside a flow tree
//!
//! A [`NodePath`] names one node by the steps taken from the action's root
//! flow: `2/then/call:charge/0` is the first step of the `charge` sub-flow
//! called from the `then` branch of the root sequence's third step.
//! Flow names are escaped so that `/` and `%` survive a round trip.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Step(usize),
    Then,
    Else,
    Call(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Step(index) => write!(f, "{index}"),
            PathSegment::Then => f.write_str("then"),
            PathSegment::Else => f.write_str("else"),
            PathSegment::Call(flow) => write!(f, "call:{}", escape_flow(flow)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodePath(Vec<PathSegment>);

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The segment of `self` that follows `prefix`, if `prefix` leads here.
    pub fn next_after(&self, prefix: &NodePath) -> Option<&PathSegment> {
        if self.0.len() > prefix.0.len() && self.0.starts_with(&prefix.0) {
            self.0.get(prefix.0.len())
        } else {
            None
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for (index, segment) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid node path segment `{0}`")]
pub struct NodePathError(String);

impl FromStr for NodePath {
    type Err = NodePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment {
                "then" => Ok(PathSegment::Then),
                "else" => Ok(PathSegment::Else),
                _ => {
                    if let Some(flow) = segment.strip_prefix("call:") {
                        unescape_flow(flow)
                            .map(PathSegment::Call)
                            .ok_or_else(|| NodePathError(segment.to_string()))
                    } else {
                        segment
                            .parse()
                            .map(PathSegment::Step)
                            .map_err(|_| NodePathError(segment.to_string()))
                    }
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(NodePath)
    }
}

fn escape_flow(flow: &str) -> String {
    flow.replace('%', "%25").replace('/', "%2F")
}

fn unescape_flow(raw: &str) -> Option<String> {
    let mut parts = raw.split('%');
    let mut flow = parts.next().unwrap_or_default().to_string();
    for part in parts {
        if let Some(tail) = part.strip_prefix("2F") {
            flow.push('/');
            flow.push_str(tail);
        } else if let Some(tail) = part.strip_prefix("25") {
            flow.push('%');
            flow.push_str(tail);
        } else {
            return None;
        }
    }
    Some(flow)
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for NodePath {
    type Error = NodePathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
