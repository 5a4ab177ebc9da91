//! Spec hashing for change detection.
//!
//! This module provides deterministic hashing of specs and resources. The
//! spec hash is recorded in state so operations can be correlated with the
//! document they applied.

use sha2::{Digest, Sha256};

use super::resource::{Resource, Spec};

/// Hasher for computing spec hashes.
#[derive(Debug, Default)]
pub struct SpecHasher;

impl SpecHasher {
    /// Creates a new spec hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire spec.
    ///
    /// Resource order is significant since it drives tie-breaking in the
    /// planner.
    #[must_use]
    pub fn hash_spec(&self, spec: &Spec) -> String {
        let mut hasher = Sha256::new();
        for resource in &spec.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource.
    #[must_use]
    pub fn hash_resource(&self, resource: &Resource) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(resource.resource_type.as_bytes());
        hasher.update([0u8]);

        // serde_json maps are ordered by key, so this rendering is canonical.
        hasher.update(serde_json::Value::Object(resource.attributes.clone()).to_string().as_bytes());
        hasher.update([0u8]);

        for dep in &resource.depends_on {
            hasher.update(dep.as_bytes());
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}
