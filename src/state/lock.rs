//! Advisory state locking.
//!
//! A lock marks a stack's state as being written by one operation. Locks
//! expire so a crashed process cannot block a stack forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::StackKey;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Information about a state lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Locked stack.
    pub stack: StackKey,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock on a stack.
    ///
    /// An empty holder is replaced with [`generate_holder_id`].
    #[must_use]
    pub fn new(stack: &StackKey, holder: &str) -> Self {
        let now = Utc::now();
        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        Self {
            lock_id: Uuid::new_v4().to_string(),
            stack: stack.clone(),
            holder,
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Refreshes the lock expiry time.
    pub fn refresh(&mut self) {
        self.expires_at = Utc::now() + chrono::Duration::seconds(LOCK_EXPIRY_SECS);
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_creation() {
        let stack = StackKey::new("acme", "web", "dev");
        let lock = LockInfo::new(&stack, "ci-runner");
        assert_eq!(lock.holder, "ci-runner");
        assert_eq!(lock.stack, stack);
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
    }

    #[test]
    fn test_empty_holder_is_generated() {
        let lock = LockInfo::new(&StackKey::new("acme", "web", "dev"), "");
        assert!(lock.holder.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_expired_lock() {
        let mut lock = LockInfo::new(&StackKey::new("acme", "web", "dev"), "old");
        lock.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);

        lock.refresh();
        assert!(!lock.is_expired());
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
    }
}
