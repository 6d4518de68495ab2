//! Trait abstractions for host I/O
//!
//! These traits let tests drive the host with fixed clocks and in-memory
//! stores.

use super::job::ExecutionKey;
use crate::snapshot::{Patch, Snapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Source of job timestamps (milliseconds since the epoch)
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// External World store
///
/// The host restores a key's snapshot when its mailbox is first created and
/// stores every committed snapshot together with the domain patches of that
/// cycle.
#[async_trait]
pub trait WorldStore: Send + Sync {
    async fn restore(&self, key: &ExecutionKey) -> Result<Option<Snapshot>, String>;

    async fn store(
        &self,
        key: &ExecutionKey,
        snapshot: &Snapshot,
        delta: &[Patch],
    ) -> Result<(), String>;
}

/// In-memory store keeping the latest snapshot per key
#[derive(Default)]
pub struct MemoryWorldStore {
    worlds: RwLock<HashMap<ExecutionKey, Snapshot>>,
}

impl MemoryWorldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &ExecutionKey) -> Option<Snapshot> {
        self.worlds.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: ExecutionKey, snapshot: Snapshot) {
        self.worlds.write().await.insert(key, snapshot);
    }
}

#[async_trait]
impl WorldStore for MemoryWorldStore {
    async fn restore(&self, key: &ExecutionKey) -> Result<Option<Snapshot>, String> {
        Ok(self.get(key).await)
    }

    async fn store(
        &self,
        key: &ExecutionKey,
        snapshot: &Snapshot,
        _delta: &[Patch],
    ) -> Result<(), String> {
        self.insert(key.clone(), snapshot.clone()).await;
        Ok(())
    }
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now_millis(&self) -> i64 {
        (**self).now_millis()
    }
}

#[async_trait]
impl<T: WorldStore + ?Sized> WorldStore for Arc<T> {
    async fn restore(&self, key: &ExecutionKey) -> Result<Option<Snapshot>, String> {
        (**self).restore(key).await
    }

    async fn store(
        &self,
        key: &ExecutionKey,
        snapshot: &Snapshot,
        delta: &[Patch],
    ) -> Result<(), String> {
        (**self).store(key, snapshot, delta).await
    }
}
