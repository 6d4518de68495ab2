//! Effect registry

use super::system_get::SystemGet;
use super::EffectHandler;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Built-in effect type; cannot be registered by callers
pub const SYSTEM_GET: &str = "system.get";

/// Per-type execution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectOptions {
    /// `None` lets the handler run as long as it likes
    pub timeout: Option<Duration>,
    /// Extra attempts after a handler error; timeouts are never retried
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            retries: 0,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl EffectOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("effect type `{0}` is reserved")]
    Reserved(String),
    #[error("effect type `{0}` is already registered")]
    Duplicate(String),
    #[error("effect type must not be empty")]
    EmptyType,
}

#[derive(Clone)]
pub struct RegisteredEffect {
    pub handler: Arc<dyn EffectHandler>,
    pub options: EffectOptions,
}

/// Effect type name to handler
///
/// Handlers are registered up front and the registry is shared read-only
/// afterwards, so it carries no interior locking.
#[derive(Clone)]
pub struct EffectRegistry {
    handlers: HashMap<String, RegisteredEffect>,
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectRegistry {
    /// A registry holding only the built-in `system.get`.
    pub fn new() -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(
            SYSTEM_GET.to_string(),
            RegisteredEffect {
                handler: Arc::new(SystemGet),
                options: EffectOptions::default(),
            },
        );
        Self { handlers }
    }

    pub fn register(
        &mut self,
        effect_type: impl Into<String>,
        handler: impl EffectHandler + 'static,
        options: EffectOptions,
    ) -> Result<(), RegistryError> {
        let effect_type = effect_type.into();
        if effect_type.trim().is_empty() {
            return Err(RegistryError::EmptyType);
        }
        if effect_type == SYSTEM_GET {
            return Err(RegistryError::Reserved(effect_type));
        }
        if self.handlers.contains_key(&effect_type) {
            return Err(RegistryError::Duplicate(effect_type));
        }
        tracing::debug!(effect_type = %effect_type, ?options, "Registered effect handler");
        self.handlers.insert(
            effect_type,
            RegisteredEffect {
                handler: Arc::new(handler),
                options,
            },
        );
        Ok(())
    }

    pub fn get(&self, effect_type: &str) -> Option<&RegisteredEffect> {
        self.handlers.get(effect_type)
    }

    pub fn contains(&self, effect_type: &str) -> bool {
        self.handlers.contains_key(effect_type)
    }

    /// Registered type names, sorted
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
