//! State types for tracking applied resources.
//!
//! These types represent the recorded state of a stack, used as the prior
//! side of the next diff.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::spec::Resource;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept in state.
const MAX_HISTORY: usize = 100;

/// Stable identifier of a stack's state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackKey {
    /// Tenant owning the project.
    pub tenant: String,
    /// Project name.
    pub project: String,
    /// Stack name within the project.
    pub stack: String,
}

/// The complete recorded state of one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// State format version.
    pub version: String,
    /// Incremented on every save.
    pub serial: u64,
    /// Stack this state belongs to.
    pub stack: StackKey,
    /// Hash of the last applied spec.
    pub spec_hash: String,
    /// Recorded resources, in spec order.
    pub resources: Vec<StateResource>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Operation history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A recorded resource and whether it converged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateResource {
    /// Resource as last observed or planned.
    #[serde(flatten)]
    pub resource: Resource,
    /// Outcome of the last operation on this resource.
    #[serde(default)]
    pub status: ResourceStatus,
}

/// Convergence status of a recorded resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum ResourceStatus {
    /// The backend matches the recorded attributes.
    #[default]
    Converged,
    /// The last operation did not complete.
    Failed {
        /// Cause of the failure.
        reason: String,
    },
}

/// A single entry in the operation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: Operation,
    /// Spec hash the operation applied.
    pub spec_hash: String,
    /// Resources touched by the operation.
    pub resources: Vec<String>,
    /// Whether every step succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of state-changing operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Converge to a spec.
    Apply,
    /// Remove every recorded resource.
    Destroy,
}

impl StackKey {
    /// Creates a new stack key.
    #[must_use]
    pub fn new(tenant: impl Into<String>, project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            project: project.into(),
            stack: stack.into(),
        }
    }

    /// Returns the key as relative path segments.
    #[must_use]
    pub fn segments(&self) -> [&str; 3] {
        [self.tenant.as_str(), self.project.as_str(), self.stack.as_str()]
    }
}

impl std::fmt::Display for StackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.tenant, self.project, self.stack)
    }
}

impl State {
    /// Creates a new empty state.
    #[must_use]
    pub fn new(stack: StackKey) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            serial: 0,
            stack,
            spec_hash: String::new(),
            resources: Vec::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a recorded resource by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StateResource> {
        self.resources.iter().find(|r| r.resource.id == id)
    }

    /// Replaces the recorded resource set.
    pub fn set_resources(&mut self, resources: Vec<StateResource>) {
        self.resources = resources;
        self.last_updated = Utc::now();
    }

    /// Returns the recorded resources without their status.
    #[must_use]
    pub fn plain_resources(&self) -> Vec<Resource> {
        self.resources.iter().map(|r| r.resource.clone()).collect()
    }

    /// Returns the IDs of resources recorded as failed.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|r| r.is_failed())
            .map(|r| r.resource.id.as_str())
            .collect()
    }

    /// Counts recorded resources per type.
    #[must_use]
    pub fn count_by_type(&self) -> HashMap<&str, usize> {
        let mut counts = HashMap::new();
        for r in &self.resources {
            *counts.entry(r.resource.resource_type.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Marks the state as written: bumps the serial and timestamp.
    pub fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }
}

impl StateResource {
    /// Records a converged resource.
    #[must_use]
    pub const fn converged(resource: Resource) -> Self {
        Self {
            resource,
            status: ResourceStatus::Converged,
        }
    }

    /// Records a resource whose last operation failed.
    #[must_use]
    pub fn failed(resource: Resource, reason: impl Into<String>) -> Self {
        Self {
            resource,
            status: ResourceStatus::Failed {
                reason: reason.into(),
            },
        }
    }

    /// Returns true if the last operation on this resource failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.status, ResourceStatus::Failed { .. })
    }
}

impl HistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: Operation, spec_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            spec_hash: spec_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(operation: Operation, spec_hash: &str, resources: Vec<String>, error: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            spec_hash: spec_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::KUBERNETES;
    use serde_json::{Map, json};

    #[test]
    fn test_state_resource_json_layout() {
        let mut attributes = Map::new();
        attributes.insert(String::from("kind"), json!("Namespace"));
        let failed = StateResource::failed(
            Resource::new("v1:Namespace:a", KUBERNETES, attributes),
            "quota exceeded",
        );

        let value = serde_json::to_value(&failed).expect("serialize");
        assert_eq!(value["id"], json!("v1:Namespace:a"));
        assert_eq!(value["type"], json!("Kubernetes"));
        assert_eq!(value["status"], json!({"phase": "failed", "reason": "quota exceeded"}));

        let back: StateResource = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, failed);
    }

    #[test]
    fn test_status_defaults_to_converged() {
        let value = json!({"id": "a", "type": "Kubernetes", "attributes": {}});
        let record: StateResource = serde_json::from_value(value).expect("deserialize");
        assert_eq!(record.status, ResourceStatus::Converged);
        assert!(!record.is_failed());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = State::new(StackKey::new("t", "p", "dev"));
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(HistoryEntry::new(Operation::Apply, &i.to_string(), vec![]));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].spec_hash, "5");
    }

    #[test]
    fn test_touch_increments_serial() {
        let mut state = State::new(StackKey::new("t", "p", "dev"));
        state.touch();
        state.touch();
        assert_eq!(state.serial, 2);
        assert_eq!(state.stack.to_string(), "t/p/dev");
    }
}
