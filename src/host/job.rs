//! Jobs, intents and the reinjection handle

use super::error::HostError;
use crate::effects::EffectOutcome;
use crate::flow::TraceNode;
use crate::snapshot::{ErrorValue, Patch, Snapshot, SystemStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Opaque partition key; the host never looks inside it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionKey(String);

impl ExecutionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ExecutionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Request to run one named action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    #[serde(rename = "type")]
    pub intent_type: String,
    #[serde(default = "empty_object", alias = "body")]
    pub input: Value,
    /// Shared by the submission and every continuation of this intent
    #[serde(default = "new_intent_id")]
    pub intent_id: String,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn new_intent_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Intent {
    pub fn new(intent_type: impl Into<String>, input: Value) -> Self {
        Self::with_id(intent_type, input, new_intent_id())
    }

    pub fn with_id(
        intent_type: impl Into<String>,
        input: Value,
        intent_id: impl Into<String>,
    ) -> Self {
        Self {
            intent_type: intent_type.into(),
            input,
            intent_id: intent_id.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), HostError> {
        if self.intent_type.trim().is_empty() {
            return Err(HostError::MalformedJob("intent type is empty".into()));
        }
        if self.intent_id.trim().is_empty() {
            return Err(HostError::MalformedJob("intent id is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Job {
    SubmitIntent {
        intent: Intent,
    },
    #[serde(rename_all = "camelCase")]
    FulfillEffect {
        requirement_id: String,
        outcome: EffectOutcome,
    },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::SubmitIntent { .. } => "submitIntent",
            Job::FulfillEffect { .. } => "fulfillEffect",
        }
    }
}

pub(crate) type ReportSender = oneshot::Sender<Result<IntentReport, HostError>>;

pub(crate) enum MailboxMessage {
    Job {
        job: Job,
        reply: Option<ReportSender>,
    },
    /// Trip the abort signal of the suspended intent, if any
    Cancel,
}

/// Queue handle given to in-flight effects.
///
/// The only thing it can do is enqueue a fulfillment job; it never sees the
/// mailbox's snapshot.
#[derive(Clone)]
pub struct Reinjector {
    key: ExecutionKey,
    tx: mpsc::UnboundedSender<MailboxMessage>,
}

impl Reinjector {
    pub(crate) fn new(key: ExecutionKey, tx: mpsc::UnboundedSender<MailboxMessage>) -> Self {
        Self { key, tx }
    }

    pub fn key(&self) -> &ExecutionKey {
        &self.key
    }

    /// Enqueue the outcome of `requirement_id`. Returns false once the
    /// mailbox is gone.
    pub fn fulfill(&self, requirement_id: &str, outcome: EffectOutcome) -> bool {
        let job = Job::FulfillEffect {
            requirement_id: requirement_id.to_string(),
            outcome,
        };
        self.tx.send(MailboxMessage::Job { job, reply: None }).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Completed,
    Halted,
    Failed,
}

/// How an intent ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentReport {
    pub intent_id: String,
    pub status: IntentStatus,
    pub snapshot: Arc<Snapshot>,
    /// Domain patches applied over the intent's whole lifetime
    pub patches: Vec<Patch>,
    pub traces: Vec<TraceNode>,
    pub error: Option<ErrorValue>,
}

/// Observability events; nothing in the host reads them back
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    #[serde(rename_all = "camelCase")]
    JobStarted {
        key: ExecutionKey,
        job: &'static str,
        intent_id: String,
    },
    #[serde(rename_all = "camelCase")]
    EffectDispatched {
        key: ExecutionKey,
        requirement_id: String,
        effect_type: String,
    },
    CycleCommitted {
        key: ExecutionKey,
        version: u64,
        status: SystemStatus,
    },
    JobRejected {
        key: ExecutionKey,
        reason: String,
    },
}
