//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.
//! Every operation is scoped to one [`StackKey`].

use async_trait::async_trait;

use crate::error::Result;
use super::lock::LockInfo;
use super::types::{StackKey, State};

/// Trait for state storage backends.
///
/// `save` must be atomic with respect to concurrent readers: a `load` never
/// observes a partially written state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state of a stack.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self, key: &StackKey) -> Result<Option<State>>;

    /// Saves the state of a stack.
    async fn save(&self, key: &StackKey, state: &State) -> Result<()>;

    /// Deletes the state of a stack.
    async fn delete(&self, key: &StackKey) -> Result<()>;

    /// Checks if state exists for a stack.
    async fn exists(&self, key: &StackKey) -> Result<bool>;

    /// Acquires a lock on the state of a stack.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, key: &StackKey, holder: &str) -> Result<LockInfo>;

    /// Releases a lock on the state of a stack.
    async fn release_lock(&self, key: &StackKey, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self, key: &StackKey) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked.
    async fn is_locked(&self, key: &StackKey) -> Result<bool> {
        Ok(self
            .get_lock_info(key)
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self, key: &StackKey) -> Result<Option<State>> {
        (**self).load(key).await
    }

    async fn save(&self, key: &StackKey, state: &State) -> Result<()> {
        (**self).save(key, state).await
    }

    async fn delete(&self, key: &StackKey) -> Result<()> {
        (**self).delete(key).await
    }

    async fn exists(&self, key: &StackKey) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn acquire_lock(&self, key: &StackKey, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(key, holder).await
    }

    async fn release_lock(&self, key: &StackKey, lock_id: &str) -> Result<()> {
        (**self).release_lock(key, lock_id).await
    }

    async fn get_lock_info(&self, key: &StackKey) -> Result<Option<LockInfo>> {
        (**self).get_lock_info(key).await
    }

    async fn is_locked(&self, key: &StackKey) -> Result<bool> {
        (**self).is_locked(key).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
