//! In-process state storage backend.
//!
//! Used by tests and by dry runs that must not touch the filesystem.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::{StackKey, State};

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<StackKey, State>,
    locks: HashMap<StackKey, LockInfo>,
}

/// State store that keeps everything in memory.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with one stack's state.
    #[must_use]
    pub fn with_state(state: State) -> Self {
        let mut inner = Inner::default();
        inner.states.insert(state.stack.clone(), state);
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &StackKey) -> Result<Option<State>> {
        Ok(self.inner.read().await.states.get(key).cloned())
    }

    async fn save(&self, key: &StackKey, state: &State) -> Result<()> {
        debug!("Saving in-memory state for {key}");
        self.inner.write().await.states.insert(key.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &StackKey) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.states.remove(key);
        inner.locks.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &StackKey) -> Result<bool> {
        Ok(self.inner.read().await.states.contains_key(key))
    }

    async fn acquire_lock(&self, key: &StackKey, holder: &str) -> Result<LockInfo> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.locks.get(key).filter(|lock| !lock.is_expired()) {
            return Err(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }
            .into());
        }

        let lock_info = LockInfo::new(key, holder);
        inner.locks.insert(key.clone(), lock_info.clone());
        Ok(lock_info)
    }

    async fn release_lock(&self, key: &StackKey, lock_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.locks.get(key).is_some_and(|lock| lock.lock_id == lock_id) {
            inner.locks.remove(key);
        }
        Ok(())
    }

    async fn get_lock_info(&self, key: &StackKey) -> Result<Option<LockInfo>> {
        Ok(self.inner.read().await.locks.get(key).cloned())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
