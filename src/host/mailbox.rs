//! Per-key mailbox
//!
//! One task per execution key owns that key's snapshot and processes its jobs
//! strictly one at a time. Effects run outside the task and come back as
//! fulfillment jobs on the same queue, so nothing else ever writes the
//! snapshot.

use super::compute::{Continuation, Cycle, CycleOutcome, Engine, JobContext};
use super::error::HostError;
use super::job::{
    ExecutionKey, HostEvent, Intent, IntentReport, Job, MailboxMessage, Reinjector, ReportSender,
};
use super::traits::{Clock, WorldStore};
use crate::effects::{EffectExecutor, EffectOutcome};
use crate::requirement::Requirement;
use crate::schema::DomainSchema;
use crate::snapshot::Snapshot;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Everything a mailbox shares with the host and its siblings
#[derive(Clone)]
pub(crate) struct Shared {
    pub schema: Arc<DomainSchema>,
    pub executor: EffectExecutor,
    pub store: Arc<dyn WorldStore>,
    pub clock: Arc<dyn Clock>,
    pub max_call_depth: usize,
    pub events: broadcast::Sender<HostEvent>,
    pub shutdown: CancellationToken,
}

/// Handle the host keeps per key
#[derive(Clone)]
pub(crate) struct MailboxHandle {
    pub tx: mpsc::UnboundedSender<MailboxMessage>,
    pub snapshot_rx: watch::Receiver<Arc<Snapshot>>,
}

/// The intent currently suspended on effects
struct Active {
    continuation: Continuation,
    reply: Option<ReportSender>,
    /// Abort signal handed to this intent's effects
    signal: CancellationToken,
}

pub(crate) struct Mailbox {
    key: ExecutionKey,
    shared: Shared,
    snapshot: Arc<Snapshot>,
    rx: mpsc::UnboundedReceiver<MailboxMessage>,
    /// Upgraded only to build reinjectors; the mailbox must not keep its own
    /// queue open
    tx: mpsc::WeakUnboundedSender<MailboxMessage>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    active: Option<Active>,
    /// Intents submitted while another one was suspended
    deferred: VecDeque<(Intent, Option<ReportSender>)>,
}

impl Mailbox {
    /// Start the mailbox task for `key` with `snapshot` as its current state.
    pub(crate) fn spawn(key: ExecutionKey, shared: Shared, snapshot: Snapshot) -> MailboxHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(snapshot);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::clone(&snapshot));

        let mailbox = Mailbox {
            key: key.clone(),
            shared,
            snapshot,
            rx,
            tx: tx.downgrade(),
            snapshot_tx,
            active: None,
            deferred: VecDeque::new(),
        };
        tokio::spawn(async move {
            mailbox.run().await;
            tracing::debug!(key = %key, "Mailbox task finished");
        });

        MailboxHandle { tx, snapshot_rx }
    }

    async fn run(mut self) {
        tracing::info!(key = %self.key, version = self.snapshot.version(), "Starting mailbox");

        loop {
            if self.active.is_none() {
                if self.shared.shutdown.is_cancelled() {
                    self.close(&HostError::ShuttingDown);
                    break;
                }
                if let Some((intent, reply)) = self.deferred.pop_front() {
                    self.start_intent(intent, reply).await;
                    continue;
                }
            }

            let idle = self.active.is_none();
            let message = tokio::select! {
                biased;

                () = self.shared.shutdown.cancelled(), if idle => continue,
                message = self.rx.recv() => message,
            };
            let Some(message) = message else {
                self.close(&HostError::MailboxClosed(self.key.to_string()));
                break;
            };
            self.handle(message).await;
        }

        tracing::info!(key = %self.key, version = self.snapshot.version(), "Mailbox stopped");
    }

    async fn handle(&mut self, message: MailboxMessage) {
        match message {
            MailboxMessage::Cancel => {
                if let Some(active) = &self.active {
                    tracing::info!(
                        key = %self.key,
                        intent_id = %active.continuation.intent.intent_id,
                        "Cancelling suspended intent"
                    );
                    active.signal.cancel();
                }
            }
            MailboxMessage::Job { job, reply } => match job {
                Job::SubmitIntent { intent } => {
                    if let Err(err) = intent.validate() {
                        self.reject(reply, err);
                    } else if self.active.is_some() {
                        tracing::debug!(
                            key = %self.key,
                            intent_id = %intent.intent_id,
                            "Deferring intent behind suspended one"
                        );
                        self.deferred.push_back((intent, reply));
                    } else {
                        self.start_intent(intent, reply).await;
                    }
                }
                Job::FulfillEffect {
                    requirement_id,
                    outcome,
                } => self.fulfill(&requirement_id, outcome, reply).await,
            },
        }
    }

    async fn start_intent(&mut self, intent: Intent, reply: Option<ReportSender>) {
        let context = JobContext::for_intent(&intent.intent_id, self.shared.clock.now_millis());
        tracing::debug!(
            key = %self.key,
            intent_id = %intent.intent_id,
            action = %intent.intent_type,
            "Processing intent"
        );
        self.emit(HostEvent::JobStarted {
            key: self.key.clone(),
            job: "submitIntent",
            intent_id: intent.intent_id.clone(),
        });

        let cycle = Engine::new(&self.shared.schema, self.shared.max_call_depth)
            .compute_intent(&self.snapshot, &intent, &context);
        self.commit(cycle, &intent.intent_id, reply, None).await;
    }

    async fn fulfill(
        &mut self,
        requirement_id: &str,
        outcome: EffectOutcome,
        reply: Option<ReportSender>,
    ) {
        let Some(active) = self.active.take() else {
            self.reject(
                reply,
                HostError::UnknownRequirement {
                    key: self.key.to_string(),
                    requirement_id: requirement_id.to_string(),
                },
            );
            return;
        };

        let resumed = Engine::new(&self.shared.schema, self.shared.max_call_depth).resume_intent(
            &self.key,
            &self.snapshot,
            &active.continuation,
            requirement_id,
            outcome,
        );
        match resumed {
            Ok(cycle) => {
                let Active {
                    continuation,
                    reply: intent_reply,
                    signal,
                } = active;
                self.emit(HostEvent::JobStarted {
                    key: self.key.clone(),
                    job: "fulfillEffect",
                    intent_id: continuation.intent.intent_id.clone(),
                });
                self.commit(cycle, &continuation.intent.intent_id, intent_reply, Some(signal))
                    .await;
            }
            Err(err) => {
                self.active = Some(active);
                self.reject(reply, err);
            }
        }
    }

    /// Publish a committed cycle and either park or finish its intent.
    async fn commit(
        &mut self,
        cycle: Cycle,
        intent_id: &str,
        reply: Option<ReportSender>,
        signal: Option<CancellationToken>,
    ) {
        let Cycle {
            snapshot,
            delta,
            dispatch,
            outcome,
        } = cycle;

        if let Err(e) = self.shared.store.store(&self.key, &snapshot, &delta).await {
            tracing::warn!(key = %self.key, error = %e, "Failed to store snapshot");
        }

        let snapshot = Arc::new(snapshot);
        self.snapshot = Arc::clone(&snapshot);
        self.snapshot_tx.send_replace(Arc::clone(&snapshot));
        tracing::debug!(
            key = %self.key,
            version = snapshot.version(),
            status = ?snapshot.status(),
            "Committed cycle"
        );
        self.emit(HostEvent::CycleCommitted {
            key: self.key.clone(),
            version: snapshot.version(),
            status: snapshot.status(),
        });

        match outcome {
            CycleOutcome::Suspended(continuation) => {
                let signal = signal.unwrap_or_else(|| self.shared.shutdown.child_token());
                if !dispatch.is_empty() {
                    self.dispatch(dispatch, &snapshot, signal.clone());
                }
                self.active = Some(Active {
                    continuation,
                    reply,
                    signal,
                });
            }
            CycleOutcome::Finished {
                status,
                error,
                patches,
                traces,
            } => {
                tracing::info!(key = %self.key, intent_id = %intent_id, ?status, "Intent finished");
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(IntentReport {
                        intent_id: intent_id.to_string(),
                        status,
                        snapshot,
                        patches,
                        traces,
                        error,
                    }));
                }
            }
        }
    }

    /// Run `requirements` in order outside the mailbox and reinject each
    /// outcome.
    fn dispatch(
        &self,
        requirements: Vec<Requirement>,
        snapshot: &Arc<Snapshot>,
        signal: CancellationToken,
    ) {
        let Some(tx) = self.tx.upgrade() else {
            tracing::warn!(key = %self.key, "Mailbox queue closed, not dispatching effects");
            return;
        };
        let reinjector = Reinjector::new(self.key.clone(), tx);

        for requirement in &requirements {
            tracing::debug!(
                key = %self.key,
                requirement_id = %requirement.id,
                effect_type = %requirement.effect_type,
                "Dispatching effect"
            );
            self.emit(HostEvent::EffectDispatched {
                key: self.key.clone(),
                requirement_id: requirement.id.clone(),
                effect_type: requirement.effect_type.clone(),
            });
        }

        let executor = self.shared.executor.clone();
        let snapshot = Arc::clone(snapshot);
        tokio::spawn(async move {
            for requirement in requirements {
                let result = executor
                    .execute(&requirement, Arc::clone(&snapshot), signal.clone())
                    .await;
                if !reinjector.fulfill(&requirement.id, result.into_outcome()) {
                    tracing::debug!(
                        key = %reinjector.key(),
                        requirement_id = %requirement.id,
                        "Mailbox gone, dropping effect result"
                    );
                    break;
                }
            }
        });
    }

    fn reject(&self, reply: Option<ReportSender>, err: HostError) {
        tracing::warn!(key = %self.key, error = %err, "Rejecting job");
        self.emit(HostEvent::JobRejected {
            key: self.key.clone(),
            reason: err.to_string(),
        });
        if let Some(reply) = reply {
            let _ = reply.send(Err(err));
        }
    }

    /// Answer everything still waiting with `err`.
    fn close(&mut self, err: &HostError) {
        if let Some(active) = self.active.take() {
            if let Some(reply) = active.reply {
                let _ = reply.send(Err(err.clone()));
            }
        }
        for (_, reply) in std::mem::take(&mut self.deferred) {
            if let Some(reply) = reply {
                let _ = reply.send(Err(err.clone()));
            }
        }
        self.rx.close();
        while let Ok(message) = self.rx.try_recv() {
            if let MailboxMessage::Job {
                reply: Some(reply), ..
            } = message
            {
                let _ = reply.send(Err(err.clone()));
            }
        }
    }

    fn emit(&self, event: HostEvent) {
        let _ = self.shared.events.send(event);
    }
}
