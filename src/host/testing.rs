//! Mock implementations for testing
//!
//! These mocks let the host run whole intent lifecycles without real I/O.

use super::traits::Clock;
use crate::effects::{EffectContext, EffectHandler};
use crate::snapshot::Patch;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Fixed Clock
// ============================================================================

/// Clock that always reports the same instant
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

// ============================================================================
// Mock Effect
// ============================================================================

/// Handler returning fixed patches and recording the params of every call
pub struct MockEffect {
    patches: Vec<Patch>,
    pub calls: Arc<Mutex<Vec<Map<String, Value>>>>,
}

impl MockEffect {
    pub fn new(patches: Vec<Patch>) -> Self {
        Self {
            patches,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl EffectHandler for MockEffect {
    async fn handle(
        &self,
        _effect_type: &str,
        params: &Map<String, Value>,
        _ctx: &EffectContext,
    ) -> Result<Vec<Patch>, String> {
        self.calls.lock().unwrap().push(params.clone());
        Ok(self.patches.clone())
    }
}

// ============================================================================
// Delayed Mock Effect (for ordering and cancellation testing)
// ============================================================================

pub struct DelayedMockEffect {
    inner: MockEffect,
    delay: Duration,
    /// Notified when a call starts
    pub started: Arc<Notify>,
}

impl DelayedMockEffect {
    pub fn new(patches: Vec<Patch>, delay: Duration) -> Self {
        Self {
            inner: MockEffect::new(patches),
            delay,
            started: Arc::new(Notify::new()),
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<Map<String, Value>>>> {
        Arc::clone(&self.inner.calls)
    }
}

#[async_trait]
impl EffectHandler for DelayedMockEffect {
    async fn handle(
        &self,
        effect_type: &str,
        params: &Map<String, Value>,
        ctx: &EffectContext,
    ) -> Result<Vec<Patch>, String> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.handle(effect_type, params, ctx).await
    }
}

// ============================================================================
// Failing Mock Effects
// ============================================================================

pub struct FailingEffect(pub &'static str);

#[async_trait]
impl EffectHandler for FailingEffect {
    async fn handle(
        &self,
        _effect_type: &str,
        _params: &Map<String, Value>,
        _ctx: &EffectContext,
    ) -> Result<Vec<Patch>, String> {
        Err(self.0.to_string())
    }
}

pub struct PanickingEffect;

#[async_trait]
impl EffectHandler for PanickingEffect {
    async fn handle(
        &self,
        _effect_type: &str,
        _params: &Map<String, Value>,
        _ctx: &EffectContext,
    ) -> Result<Vec<Patch>, String> {
        panic!("mock effect panicked")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::effects::{
        EffectOptions, EffectOutcome, EffectRegistry, EFFECT_CANCELLED, EFFECT_EXECUTION_FAILED,
        UNKNOWN_EFFECT,
    };
    use crate::expr::ExprNode;
    use crate::flow::FlowNode;
    use crate::host::{
        Host, HostError, HostEvent, Intent, IntentStatus, MemoryWorldStore, UNKNOWN_ACTION,
    };
    use crate::schema::{ActionSpec, DomainSchema};
    use crate::snapshot::{Snapshot, SystemStatus};
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn no_params() -> Vec<(&'static str, ExprNode)> {
        Vec::new()
    }

    fn bump() -> FlowNode {
        FlowNode::set(
            "data.count",
            ExprNode::add(ExprNode::get("data.count"), ExprNode::lit(1)),
        )
    }

    fn schema() -> DomainSchema {
        DomainSchema::new("counter", "1")
            .with_action("increment", ActionSpec::new(bump()))
            .with_action(
                "audited",
                ActionSpec::new(FlowNode::seq(vec![
                    FlowNode::effect("audit.log", [("n", ExprNode::get("input.n"))]),
                    bump(),
                ])),
            )
            .with_action(
                "fetch",
                ActionSpec::new(FlowNode::seq(vec![
                    FlowNode::effect("api.fetch", no_params()),
                    FlowNode::when(
                        ExprNode::get("data.$host.lastError"),
                        FlowNode::fail(
                            "FETCH_FAILED",
                            Some(ExprNode::get("data.$host.lastError.message")),
                        ),
                    ),
                    FlowNode::set("data.done", ExprNode::lit(true)),
                ])),
            )
            .with_action(
                "broken",
                ActionSpec::new(FlowNode::effect("nope.missing", no_params())),
            )
            .with_action(
                "stamp",
                ActionSpec::new(FlowNode::effect(
                    "system.get",
                    [
                        ("key", ExprNode::lit("uuid")),
                        ("into", ExprNode::lit("data.stampId")),
                    ],
                )),
            )
            .with_computed(
                "double",
                ExprNode::add(ExprNode::get("data.count"), ExprNode::get("data.count")),
            )
    }

    fn host(registry: EffectRegistry) -> Host {
        Host::new(schema(), registry, HostConfig::default())
            .with_clock(FixedClock(NOW))
            .with_genesis(json!({"count": 0}))
    }

    fn fetch_registry() -> EffectRegistry {
        let mut registry = EffectRegistry::new();
        registry
            .register(
                "api.fetch",
                MockEffect::new(vec![Patch::set("data.payload", json!({"id": 7}))]),
                EffectOptions::default(),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_dispatch_completes_and_publishes_snapshot() {
        let host = host(EffectRegistry::new());
        let report = host
            .dispatch("k", Intent::new("increment", json!({})))
            .await
            .unwrap();

        assert_eq!(report.status, IntentStatus::Completed);
        assert_eq!(report.snapshot.data["count"], json!(1));
        assert_eq!(report.snapshot.computed["double"], json!(2));
        assert_eq!(report.snapshot.version(), 1);
        assert_eq!(report.snapshot.meta.timestamp, NOW);

        let published = host.snapshot("k").await.unwrap();
        assert_eq!(published, report.snapshot);
        assert!(host.snapshot("other").await.is_none());
    }

    #[tokio::test]
    async fn test_same_key_runs_in_order_despite_effect_latency() {
        let audit = DelayedMockEffect::new(vec![], Duration::from_millis(20));
        let calls = audit.calls();
        let mut registry = EffectRegistry::new();
        registry
            .register("audit.log", audit, EffectOptions::default())
            .unwrap();
        let host = host(registry);

        let mut tickets = Vec::new();
        for n in 1..=3 {
            tickets.push(
                host.submit("k", Intent::new("audited", json!({"n": n})))
                    .await
                    .unwrap(),
            );
        }
        let mut versions = Vec::new();
        for ticket in tickets {
            let report = ticket.wait().await.unwrap();
            assert_eq!(report.status, IntentStatus::Completed);
            versions.push(report.snapshot.version());
        }

        assert_eq!(versions, vec![2, 4, 6]);
        let snapshot = host.snapshot("k").await.unwrap();
        assert_eq!(snapshot.data["count"], json!(3));
        assert!(snapshot.system.pending_requirements.is_empty());

        let seen: Vec<Value> = calls.lock().unwrap().iter().map(|p| p["n"].clone()).collect();
        assert_eq!(seen, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let host = Arc::new(host(EffectRegistry::new()));

        let runs = ["a", "a", "a", "b"].into_iter().map(|key| {
            let host = Arc::clone(&host);
            async move { host.dispatch(key, Intent::new("increment", json!({}))).await }
        });
        for result in futures::future::join_all(runs).await {
            assert!(result.is_ok());
        }

        assert_eq!(host.snapshot("a").await.unwrap().data["count"], json!(3));
        assert_eq!(host.snapshot("b").await.unwrap().data["count"], json!(1));
        assert_eq!(host.snapshot("b").await.unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_reinjected_patches_are_visible() {
        let host = host(fetch_registry());
        let report = host
            .dispatch("k", Intent::new("fetch", json!({})))
            .await
            .unwrap();

        assert_eq!(report.status, IntentStatus::Completed);
        let snapshot = &report.snapshot;
        assert_eq!(snapshot.data["payload"], json!({"id": 7}));
        assert_eq!(snapshot.data["done"], json!(true));
        assert!(snapshot.system.pending_requirements.is_empty());
        assert_eq!(snapshot.status(), SystemStatus::Idle);
        assert_eq!(snapshot.version(), 2);
        assert_eq!(report.patches.len(), 2);
        assert_eq!(report.traces.len(), 2);
    }

    #[tokio::test]
    async fn test_builtin_system_get() {
        let host = host(EffectRegistry::new());
        let report = host
            .dispatch("k", Intent::new("stamp", json!({})))
            .await
            .unwrap();
        assert_eq!(report.status, IntentStatus::Completed);
        assert!(report.snapshot.data["stampId"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_effect_is_recorded() {
        let host = host(EffectRegistry::new());
        let report = host
            .dispatch("k", Intent::new("broken", json!({})))
            .await
            .unwrap();

        // Nothing in the flow reacts to the failure, so the intent still finishes.
        assert_eq!(report.status, IntentStatus::Completed);
        assert!(report.error.is_none());
        let snapshot = &report.snapshot;
        assert_eq!(snapshot.status(), SystemStatus::Idle);
        assert_eq!(snapshot.system.last_error.as_ref().unwrap().code, UNKNOWN_EFFECT);
        assert_eq!(snapshot.data["$host"]["lastError"]["code"], json!(UNKNOWN_EFFECT));
        assert!(snapshot.system.pending_requirements.is_empty());

        // The key keeps working afterwards.
        let next = host
            .dispatch("k", Intent::new("increment", json!({})))
            .await
            .unwrap();
        assert_eq!(next.status, IntentStatus::Completed);
        assert_eq!(next.snapshot.status(), SystemStatus::Idle);
    }

    #[tokio::test]
    async fn test_unknown_action_ends_in_error() {
        let host = host(EffectRegistry::new());
        let report = host
            .dispatch("k", Intent::new("teleport", json!({})))
            .await
            .unwrap();
        assert_eq!(report.status, IntentStatus::Failed);
        assert_eq!(report.error.unwrap().code, UNKNOWN_ACTION);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_handlers() {
        let mut registry = EffectRegistry::new();
        registry
            .register("api.fetch", FailingEffect("upstream down"), EffectOptions::default())
            .unwrap();
        registry
            .register("audit.log", PanickingEffect, EffectOptions::default())
            .unwrap();
        let host = host(registry);

        let report = host
            .dispatch("k", Intent::new("fetch", json!({})))
            .await
            .unwrap();
        assert_eq!(report.status, IntentStatus::Failed);
        let error = report.error.unwrap();
        assert_eq!(error.code, "FETCH_FAILED");
        assert_eq!(error.message, "upstream down");
        let host_error = &report.snapshot.data["$host"]["lastError"];
        assert_eq!(host_error["code"], json!(EFFECT_EXECUTION_FAILED));
        assert!(report.snapshot.data.get("done").is_none());

        // The step after the panicked effect still runs.
        let report = host
            .dispatch("k", Intent::new("audited", json!({"n": 1})))
            .await
            .unwrap();
        assert_eq!(report.status, IntentStatus::Completed);
        assert_eq!(report.snapshot.data["count"], json!(1));
        let last_error = report.snapshot.system.last_error.as_ref().unwrap();
        assert_eq!(last_error.code, EFFECT_EXECUTION_FAILED);
        assert_eq!(report.snapshot.system.errors.len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_suspended_intent() {
        let slow = DelayedMockEffect::new(vec![], Duration::from_secs(5));
        let started = Arc::clone(&slow.started);
        let mut registry = EffectRegistry::new();
        registry
            .register("api.fetch", slow, EffectOptions::default().without_timeout())
            .unwrap();
        let host = host(registry);

        let ticket = host
            .submit("k", Intent::new("fetch", json!({})))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), started.notified())
            .await
            .expect("effect should start");

        let start = tokio::time::Instant::now();
        assert!(host.cancel("k").await);
        let report = tokio::time::timeout(Duration::from_secs(2), ticket.wait())
            .await
            .expect("cancellation should be fast")
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(report.status, IntentStatus::Failed);
        assert_eq!(report.error.unwrap().code, "FETCH_FAILED");
        let host_error = &report.snapshot.data["$host"]["lastError"];
        assert_eq!(host_error["code"], json!(EFFECT_CANCELLED));
        assert!(!host.cancel("missing").await);
    }

    #[tokio::test]
    async fn test_unknown_requirement_is_rejected() {
        let host = host(EffectRegistry::new());
        let mut events = host.subscribe();
        host.dispatch("k", Intent::new("increment", json!({})))
            .await
            .unwrap();

        host.fulfill("k", "req-bogus", EffectOutcome::Patches { patches: vec![] })
            .await
            .unwrap();
        let rejected = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(HostEvent::JobRejected { reason, .. }) = events.recv().await {
                    return reason;
                }
            }
        })
        .await
        .expect("rejection event");
        assert!(rejected.contains("req-bogus"));

        let report = host
            .dispatch("k", Intent::new("increment", json!({})))
            .await
            .unwrap();
        assert_eq!(report.snapshot.data["count"], json!(2));
        assert_eq!(report.snapshot.version(), 2);

        let err = host
            .fulfill("nobody", "req-1", EffectOutcome::Patches { patches: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::UnknownRequirement { .. }));
    }

    #[tokio::test]
    async fn test_same_inputs_give_same_snapshots() {
        async fn run() -> Arc<Snapshot> {
            let host = host(fetch_registry());
            for (n, action) in ["increment", "fetch", "broken", "increment"].iter().enumerate() {
                let intent = Intent::with_id(*action, json!({"n": n}), format!("intent-{n}"));
                host.dispatch("k", intent).await.unwrap();
            }
            host.snapshot("k").await.unwrap()
        }

        let first = run().await;
        let second = run().await;
        assert_eq!(first, second);
        assert_eq!(first.domain_digest(), second.domain_digest());
    }

    #[tokio::test]
    async fn test_restores_from_store() {
        let store = Arc::new(MemoryWorldStore::new());
        let mut saved = Snapshot::genesis(json!({"count": 10}), schema().hash());
        saved.meta.version = 5;
        store.insert("k".into(), saved).await;

        let host = host(EffectRegistry::new()).with_store(Arc::clone(&store));
        let report = host
            .dispatch("k", Intent::new("increment", json!({})))
            .await
            .unwrap();

        assert_eq!(report.snapshot.data["count"], json!(11));
        assert_eq!(report.snapshot.version(), 6);
        assert_eq!(store.get(&"k".into()).await.unwrap().version(), 6);
    }

    #[tokio::test]
    async fn test_events_follow_the_lifecycle() {
        let host = host(fetch_registry());
        let mut events = host.subscribe();
        host.dispatch("k", Intent::with_id("fetch", json!({}), "i-1"))
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].clone());
        }
        assert_eq!(
            kinds,
            vec![
                json!("jobStarted"),
                json!("cycleCommitted"),
                json!("effectDispatched"),
                json!("jobStarted"),
                json!("cycleCommitted"),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_intent_and_shutdown() {
        let host = host(EffectRegistry::new());
        let err = host
            .submit("k", Intent::with_id("increment", json!({}), " "))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HostError::MalformedJob(_)));

        host.shutdown();
        let err = host
            .dispatch("k", Intent::new("increment", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, HostError::ShuttingDown);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_suspended_and_rejects_queued() {
        let slow = DelayedMockEffect::new(vec![], Duration::from_secs(5));
        let started = Arc::clone(&slow.started);
        let mut registry = EffectRegistry::new();
        registry
            .register("api.fetch", slow, EffectOptions::default())
            .unwrap();
        let host = host(registry);

        let suspended = host
            .submit("k", Intent::new("fetch", json!({})))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), started.notified())
            .await
            .expect("effect should start");
        let queued = host
            .submit("k", Intent::new("increment", json!({})))
            .await
            .unwrap();

        host.shutdown();
        let report = suspended.wait().await.unwrap();
        let host_error = &report.snapshot.data["$host"]["lastError"];
        assert_eq!(host_error["code"], json!(EFFECT_CANCELLED));
        assert_eq!(queued.wait().await.unwrap_err(), HostError::ShuttingDown);
    }
}
