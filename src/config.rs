//! Host configuration

use crate::effects::EffectOptions;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 32;
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Policy for effects registered without one of their own
    pub effect_defaults: EffectOptions,
    /// Deepest `call` nesting before a flow fails
    pub max_call_depth: usize,
    /// Capacity of the host event broadcast channel
    pub event_buffer: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            effect_defaults: EffectOptions::default(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl HostConfig {
    /// Read overrides from `INTENT_HOST_*` environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).and_then(|raw| parse::<u64>(name, &raw));

        let mut effect_defaults = defaults.effect_defaults;
        if let Some(ms) = parsed("INTENT_HOST_EFFECT_TIMEOUT_MS") {
            effect_defaults.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(retries) = parsed("INTENT_HOST_EFFECT_RETRIES") {
            effect_defaults.retries = u32::try_from(retries).unwrap_or(u32::MAX);
        }
        if let Some(ms) = parsed("INTENT_HOST_EFFECT_RETRY_DELAY_MS") {
            effect_defaults.retry_delay = Duration::from_millis(ms);
        }

        Self {
            effect_defaults,
            max_call_depth: lookup("INTENT_HOST_MAX_CALL_DEPTH")
                .and_then(|raw| parse("INTENT_HOST_MAX_CALL_DEPTH", &raw))
                .unwrap_or(defaults.max_call_depth),
            event_buffer: lookup("INTENT_HOST_EVENT_BUFFER")
                .and_then(|raw| parse::<usize>("INTENT_HOST_EVENT_BUFFER", &raw))
                .filter(|size| *size > 0)
                .unwrap_or(defaults.event_buffer),
        }
    }
}

fn parse<T: FromStr>(name: &str, raw: &str) -> Option<T> {
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(variable = %name, value = %raw, "Ignoring unparsable configuration value");
    }
    parsed
}
