//! Mailbox host
//!
//! The host routes jobs to one mailbox per [`ExecutionKey`]. Jobs for the same
//! key run one at a time in submission order; different keys never share
//! state and run concurrently.

mod compute;
mod error;
mod job;
mod mailbox;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use compute::{
    Continuation, Cycle, CycleOutcome, Engine, JobContext, ACTION_UNAVAILABLE,
    INVALID_EFFECT_PATCH, UNKNOWN_ACTION,
};
pub use error::HostError;
pub use job::{ExecutionKey, HostEvent, Intent, IntentReport, IntentStatus, Job, Reinjector};
pub use traits::{Clock, MemoryWorldStore, SystemClock, WorldStore};

use crate::config::HostConfig;
use crate::effects::{EffectExecutor, EffectOutcome, EffectRegistry};
use crate::schema::DomainSchema;
use crate::snapshot::Snapshot;
use job::{MailboxMessage, ReportSender};
use mailbox::{Mailbox, MailboxHandle, Shared};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

/// Pending answer for one submitted intent
pub struct IntentTicket {
    pub key: ExecutionKey,
    pub intent_id: String,
    rx: oneshot::Receiver<Result<IntentReport, HostError>>,
}

impl IntentTicket {
    /// Wait until the intent completes, halts or fails.
    pub async fn wait(self) -> Result<IntentReport, HostError> {
        let Self { key, rx, .. } = self;
        rx.await
            .unwrap_or_else(|_| Err(HostError::MailboxClosed(key.to_string())))
    }
}

pub struct Host {
    shared: Shared,
    config: HostConfig,
    /// Domain data every new key starts from
    genesis: Value,
    mailboxes: RwLock<HashMap<ExecutionKey, MailboxHandle>>,
}

impl Host {
    pub fn new(schema: DomainSchema, registry: EffectRegistry, config: HostConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer);
        Self {
            shared: Shared {
                schema: Arc::new(schema),
                executor: EffectExecutor::new(Arc::new(registry)),
                store: Arc::new(MemoryWorldStore::new()),
                clock: Arc::new(SystemClock),
                max_call_depth: config.max_call_depth,
                events,
                shutdown: CancellationToken::new(),
            },
            config,
            genesis: Value::Object(Map::new()),
            mailboxes: RwLock::new(HashMap::new()),
        }
    }

    /// Persist snapshots through `store` instead of memory.
    pub fn with_store(mut self, store: impl WorldStore + 'static) -> Self {
        self.shared.store = Arc::new(store);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.shared.clock = Arc::new(clock);
        self
    }

    /// Initial domain data for keys the store has never seen.
    pub fn with_genesis(mut self, data: Value) -> Self {
        self.genesis = data;
        self
    }

    pub fn schema(&self) -> &DomainSchema {
        &self.shared.schema
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &EffectRegistry {
        self.shared.executor.registry()
    }

    /// Subscribe to host events for every key.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.shared.events.subscribe()
    }

    /// Enqueue `intent` on the mailbox for `key`.
    pub async fn submit(
        &self,
        key: impl Into<ExecutionKey>,
        intent: Intent,
    ) -> Result<IntentTicket, HostError> {
        let key = key.into();
        intent.validate()?;
        if self.shared.shutdown.is_cancelled() {
            return Err(HostError::ShuttingDown);
        }

        let handle = self.mailbox(&key).await?;
        let (reply, rx) = oneshot::channel();
        let intent_id = intent.intent_id.clone();
        send(&key, &handle, Job::SubmitIntent { intent }, Some(reply))?;
        tracing::debug!(key = %key, intent_id = %intent_id, "Submitted intent");

        Ok(IntentTicket { key, intent_id, rx })
    }

    /// Submit `intent` and wait for it to finish.
    pub async fn dispatch(
        &self,
        key: impl Into<ExecutionKey>,
        intent: Intent,
    ) -> Result<IntentReport, HostError> {
        self.submit(key, intent).await?.wait().await
    }

    /// Enqueue the outcome of a requirement fulfilled outside the host.
    ///
    /// Outcomes for requirements the key is not waiting on are rejected by
    /// the mailbox and reported as [`HostEvent::JobRejected`].
    pub async fn fulfill(
        &self,
        key: impl Into<ExecutionKey>,
        requirement_id: &str,
        outcome: EffectOutcome,
    ) -> Result<(), HostError> {
        let key = key.into();
        let Some(handle) = self.existing(&key).await else {
            return Err(HostError::UnknownRequirement {
                key: key.to_string(),
                requirement_id: requirement_id.to_string(),
            });
        };
        let job = Job::FulfillEffect {
            requirement_id: requirement_id.to_string(),
            outcome,
        };
        send(&key, &handle, job, None)
    }

    /// Latest committed snapshot for `key`, if its mailbox exists.
    pub async fn snapshot(&self, key: impl Into<ExecutionKey>) -> Option<Arc<Snapshot>> {
        let handle = self.existing(&key.into()).await?;
        let snapshot = handle.snapshot_rx.borrow().clone();
        Some(snapshot)
    }

    /// Trip the abort signal of the intent suspended on `key`.
    ///
    /// Its in-flight effects come back as `EFFECT_CANCELLED` failures and the
    /// flow resumes with the error in `data.$host.lastError`. Returns false if
    /// the key has no mailbox.
    pub async fn cancel(&self, key: impl Into<ExecutionKey>) -> bool {
        let key = key.into();
        match self.existing(&key).await {
            Some(handle) => handle.tx.send(MailboxMessage::Cancel).is_ok(),
            None => false,
        }
    }

    /// Stop accepting intents and cancel every in-flight effect.
    ///
    /// Suspended intents end with `EFFECT_CANCELLED`; intents still queued
    /// behind them are answered with [`HostError::ShuttingDown`].
    pub fn shutdown(&self) {
        tracing::info!("Shutting down host");
        self.shared.shutdown.cancel();
    }

    async fn existing(&self, key: &ExecutionKey) -> Option<MailboxHandle> {
        self.mailboxes.read().await.get(key).cloned()
    }

    /// Get or create the mailbox for `key`
    async fn mailbox(&self, key: &ExecutionKey) -> Result<MailboxHandle, HostError> {
        // Check if already running
        {
            let mailboxes = self.mailboxes.read().await;
            if let Some(handle) = mailboxes.get(key) {
                if !handle.tx.is_closed() {
                    return Ok(handle.clone());
                }
            }
        }

        let mut mailboxes = self.mailboxes.write().await;
        if let Some(handle) = mailboxes.get(key) {
            if !handle.tx.is_closed() {
                return Ok(handle.clone());
            }
        }

        let snapshot = match self.shared.store.restore(key).await.map_err(HostError::Store)? {
            Some(snapshot) => {
                tracing::info!(key = %key, version = snapshot.version(), "Restored snapshot");
                snapshot
            }
            None => {
                let schema = &self.shared.schema;
                let mut snapshot = Snapshot::genesis(self.genesis.clone(), schema.hash());
                schema.recompute(&mut snapshot);
                snapshot
            }
        };

        let handle = Mailbox::spawn(key.clone(), self.shared.clone(), snapshot);
        mailboxes.insert(key.clone(), handle.clone());
        Ok(handle)
    }
}

fn send(
    key: &ExecutionKey,
    handle: &MailboxHandle,
    job: Job,
    reply: Option<ReportSender>,
) -> Result<(), HostError> {
    handle
        .tx
        .send(MailboxMessage::Job { job, reply })
        .map_err(|_| HostError::MailboxClosed(key.to_string()))
}
