//! Local file-based state storage backend.
//!
//! Each stack is stored under its own directory:
//! `<base>/<tenant>/<project>/<stack>/state.json`, with the lock file
//! beside it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ConvergeError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::{STATE_VERSION, StackKey, State};

/// Default state directory name.
pub const DEFAULT_STATE_DIR: &str = ".converge";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Base directory for all stacks.
    base_dir: PathBuf,
}

impl LocalStateStore {
    /// Creates a new local state store under the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| ConvergeError::internal(format!("Cannot determine current directory: {e}")))?
            .join(DEFAULT_STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding one stack's files.
    fn stack_dir(&self, key: &StackKey) -> PathBuf {
        key.segments()
            .iter()
            .fold(self.base_dir.clone(), |path, segment| path.join(segment))
    }

    /// Path to a stack's state file.
    #[must_use]
    pub fn state_path(&self, key: &StackKey) -> PathBuf {
        self.stack_dir(key).join(STATE_FILE)
    }

    fn lock_path(&self, key: &StackKey) -> PathBuf {
        self.stack_dir(key).join(LOCK_FILE)
    }

    /// Ensures the stack directory exists.
    async fn ensure_dir(&self, key: &StackKey) -> Result<()> {
        let dir = self.stack_dir(key);
        if !dir.exists() {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| StateError::storage(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self, key: &StackKey) -> Result<Option<LockInfo>> {
        let path = self.lock_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await.map_err(|e| StateError::Corrupted {
            message: format!("Failed to read lock file: {e}"),
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse lock file: {e}"),
        })?;

        Ok(Some(lock_info))
    }

    /// Writes the lock file.
    async fn write_lock_file(&self, key: &StackKey, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir(key).await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let lock_failed = |e: std::io::Error| StateError::LockFailed {
            message: format!("Failed to write lock file: {e}"),
        };

        let mut file = fs::File::create(self.lock_path(key)).await.map_err(lock_failed)?;
        file.write_all(content.as_bytes()).await.map_err(lock_failed)?;
        file.sync_all().await.map_err(lock_failed)?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self, key: &StackKey) -> Result<()> {
        let path = self.lock_path(key);
        if path.exists() {
            fs::remove_file(&path).await.map_err(|e| StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self, key: &StackKey) -> Result<Option<State>> {
        let path = self.state_path(key);
        if !path.exists() {
            debug!("State file does not exist: {}", path.display());
            return Ok(None);
        }

        info!("Loading state from: {}", path.display());

        let content = fs::read_to_string(&path).await.map_err(|e| StateError::Corrupted {
            message: format!("Failed to read state file: {e}"),
        })?;

        let state: State = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse state file: {e}"),
        })?;

        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }

        Ok(Some(state))
    }

    async fn save(&self, key: &StackKey, state: &State) -> Result<()> {
        self.ensure_dir(key).await?;

        let path = self.state_path(key);
        info!("Saving state to: {}", path.display());

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // Readers only ever see the old or the new file.
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::storage(format!("Failed to create temp state file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::storage(format!("Failed to write state file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::storage(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StateError::storage(format!("Failed to rename state file: {e}")))?;

        debug!("State for {key} saved (serial {})", state.serial);
        Ok(())
    }

    async fn delete(&self, key: &StackKey) -> Result<()> {
        let path = self.state_path(key);
        if path.exists() {
            info!("Deleting state file: {}", path.display());
            fs::remove_file(&path)
                .await
                .map_err(|e| StateError::storage(format!("Failed to delete state file: {e}")))?;
        }

        self.delete_lock_file(key).await
    }

    async fn exists(&self, key: &StackKey) -> Result<bool> {
        Ok(self.state_path(key).exists())
    }

    async fn acquire_lock(&self, key: &StackKey, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file(key).await? {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!("Expired lock on {key} found, taking over");
        }

        let lock_info = LockInfo::new(key, holder);
        self.write_lock_file(key, &lock_info).await?;

        info!(
            "Acquired state lock on {key}: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, key: &StackKey, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file(key).await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file(key).await?;
                info!("Released state lock on {key}: {lock_id}");
            } else {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self, key: &StackKey) -> Result<Option<LockInfo>> {
        self.read_lock_file(key).await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Resource;
    use crate::state::StateResource;
    use serde_json::Map;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());
        (store, temp_dir)
    }

    fn key() -> StackKey {
        StackKey::new("acme", "web", "dev")
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut state = State::new(key());
        state.set_resources(vec![StateResource::converged(Resource::new(
            "a",
            "Kubernetes",
            Map::new(),
        ))]);
        state.touch();
        store.save(&key(), &state).await.expect("Failed to save state");

        let loaded = store
            .load(&key())
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded.stack, key());
        assert_eq!(loaded.serial, 1);
        assert_eq!(loaded.resources, state.resources);
    }

    #[tokio::test]
    async fn test_stack_layout_on_disk() {
        let (store, temp) = create_test_store();
        store.save(&key(), &State::new(key())).await.expect("save");

        let expected = temp.path().join("acme").join("web").join("dev").join("state.json");
        assert!(expected.exists());
        assert!(!expected.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_stacks_are_isolated() {
        let (store, _temp) = create_test_store();
        let other = StackKey::new("acme", "web", "prod");

        store.save(&key(), &State::new(key())).await.expect("save");

        assert!(store.exists(&key()).await.expect("exists"));
        assert!(!store.exists(&other).await.expect("exists"));
        assert!(store.load(&other).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load(&key()).await.expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_load_rejects_other_version() {
        let (store, _temp) = create_test_store();
        let mut state = State::new(key());
        state.version = String::from("0.1");
        store.save(&key(), &state).await.expect("save");

        let result = store.load(&key()).await;
        assert!(matches!(
            result,
            Err(ConvergeError::State(StateError::VersionMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_load_corrupted() {
        let (store, _temp) = create_test_store();
        store.ensure_dir(&key()).await.expect("dir");
        fs::write(store.state_path(&key()), "{ not json").await.expect("write");

        let result = store.load(&key()).await;
        assert!(matches!(result, Err(ConvergeError::State(StateError::Corrupted { .. }))));
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _temp) = create_test_store();
        store.save(&key(), &State::new(key())).await.expect("save");
        store.acquire_lock(&key(), "holder").await.expect("lock");

        store.delete(&key()).await.expect("delete");

        assert!(!store.exists(&key()).await.expect("exists"));
        assert!(!store.is_locked(&key()).await.expect("is_locked"));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock(&key(), "test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked(&key()).await.expect("is_locked failed"));

        store
            .release_lock(&key(), &lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked(&key()).await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock(&key(), "holder-1")
            .await
            .expect("Failed to acquire first lock");

        let result = store.acquire_lock(&key(), "holder-2").await;
        assert!(matches!(
            result,
            Err(ConvergeError::State(StateError::LockedByOther { ref holder, .. })) if holder == "holder-1"
        ));
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _temp) = create_test_store();
        store.acquire_lock(&key(), "holder").await.expect("lock");

        store.release_lock(&key(), "not-the-id").await.expect("release");
        assert!(store.is_locked(&key()).await.expect("is_locked"));
    }
}
