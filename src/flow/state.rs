//! Per-job flow accumulator

use super::path::NodePath;
use crate::requirement::Requirement;
use crate::snapshot::{ErrorValue, Patch, Snapshot};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Running,
    Pending,
    Halted,
    Error,
}

impl FlowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowStatus::Halted | FlowStatus::Error)
    }
}

/// State threaded through one evaluation pass.
///
/// The status only ever leaves `Running`; once it is `Pending`, `Halted` or
/// `Error` the transition methods are no-ops.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    /// Working snapshot with every patch so far applied
    pub snapshot: Snapshot,
    pub patches: Vec<Patch>,
    pub status: FlowStatus,
    pub requirements: Vec<Requirement>,
    pub error: Option<ErrorValue>,
    /// Effect node the flow is waiting on
    pub suspended_at: Option<NodePath>,
}

impl FlowState {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            patches: Vec::new(),
            status: FlowStatus::Running,
            requirements: Vec::new(),
            error: None,
            suspended_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == FlowStatus::Running
    }

    pub(crate) fn suspend(&mut self, requirement: Requirement, at: NodePath) {
        if self.is_running() {
            self.requirements.push(requirement);
            self.suspended_at = Some(at);
            self.status = FlowStatus::Pending;
        }
    }

    pub(crate) fn halt(&mut self) {
        if self.is_running() {
            self.status = FlowStatus::Halted;
        }
    }

    pub(crate) fn fail(&mut self, error: ErrorValue) {
        if self.is_running() {
            self.error = Some(error);
            self.status = FlowStatus::Error;
        }
    }
}
