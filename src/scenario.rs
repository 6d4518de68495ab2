//! Scripted scenario runner
//!
//! A scenario file bundles a schema, optional genesis data, scripted effect
//! outcomes and a list of keyed intents:
//!
//! ```json
//! {
//!   "schema": { "id": "counter", "version": "1", "actions": { ... } },
//!   "genesis": { "count": 0 },
//!   "effects": { "api.fetch": { "patches": [...], "delayMs": 20 } },
//!   "intents": [ { "key": "user-1", "type": "increment" } ]
//! }
//! ```

use crate::config::HostConfig;
use crate::effects::{EffectContext, EffectHandler, EffectOptions, EffectRegistry, RegistryError};
use crate::host::{ExecutionKey, Host, HostError, Intent, IntentStatus};
use crate::schema::DomainSchema;
use crate::snapshot::{ErrorValue, Patch, Snapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Canned result for one effect type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptedEffect {
    #[serde(default)]
    pub patches: Vec<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Fail every call with this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
}

#[async_trait]
impl EffectHandler for ScriptedEffect {
    async fn handle(
        &self,
        _effect_type: &str,
        _params: &Map<String, Value>,
        _ctx: &EffectContext,
    ) -> Result<Vec<Patch>, String> {
        if let Some(ms) = self.delay_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        match &self.fail {
            Some(message) => Err(message.clone()),
            None => Ok(self.patches.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioIntent {
    pub key: ExecutionKey,
    #[serde(flatten)]
    pub intent: Intent,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    pub schema: DomainSchema,
    #[serde(default)]
    pub genesis: Value,
    #[serde(default)]
    pub effects: BTreeMap<String, ScriptedEffect>,
    #[serde(default)]
    pub intents: Vec<ScenarioIntent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSummary {
    pub key: ExecutionKey,
    pub intent_id: String,
    pub status: IntentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub intents: Vec<IntentSummary>,
    /// Final snapshot per key
    pub snapshots: BTreeMap<ExecutionKey, Arc<Snapshot>>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Registry with one scripted handler per declared effect.
    pub fn registry(&self, options: EffectOptions) -> Result<EffectRegistry, ScenarioError> {
        let mut registry = EffectRegistry::new();
        for (effect_type, scripted) in &self.effects {
            registry.register(effect_type.clone(), scripted.clone(), options)?;
        }
        Ok(registry)
    }

    /// Run every intent and collect the final snapshots.
    ///
    /// Intents for one key are dispatched in file order, each after the
    /// previous one finished; different keys run concurrently.
    pub async fn run(self, config: HostConfig) -> Result<ScenarioReport, ScenarioError> {
        let registry = self.registry(config.effect_defaults)?;
        let host = Host::new(self.schema, registry, config).with_genesis(self.genesis);

        let mut by_key: BTreeMap<ExecutionKey, Vec<Intent>> = BTreeMap::new();
        for ScenarioIntent { key, intent } in self.intents {
            by_key.entry(key).or_default().push(intent);
        }
        tracing::info!(keys = by_key.len(), "Running scenario");

        let host = &host;
        let runs = by_key.into_iter().map(|(key, intents)| async move {
            let mut summaries = Vec::with_capacity(intents.len());
            for intent in intents {
                let report = host.dispatch(key.clone(), intent).await?;
                summaries.push(IntentSummary {
                    key: key.clone(),
                    intent_id: report.intent_id,
                    status: report.status,
                    error: report.error,
                });
            }
            Ok::<_, HostError>((key, summaries))
        });

        let mut report = ScenarioReport {
            intents: Vec::new(),
            snapshots: BTreeMap::new(),
        };
        for result in futures::future::join_all(runs).await {
            let (key, summaries) = result?;
            if let Some(snapshot) = host.snapshot(key.clone()).await {
                report.snapshots.insert(key, snapshot);
            }
            report.intents.extend(summaries);
        }

        host.shutdown();
        Ok(report)
    }
}
