//! Resource graph types.
//!
//! This module defines the structs that map to a spec document. A spec is the
//! complete desired state of one stack: an ordered list of resources, each
//! owned by the runtime named in its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SpecError;

/// Arbitrary nested key-value document.
pub type Attributes = Map<String, Value>;

/// Resource type handled by the Kubernetes runtime.
pub const KUBERNETES: &str = "Kubernetes";

/// Resource type handled by the Terraform runtime.
pub const TERRAFORM: &str = "Terraform";

/// The desired state of one stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Spec {
    /// Resources in declaration order.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub resources: Vec<Resource>,
}

/// One managed unit of infrastructure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Globally unique key within a spec.
    pub id: String,
    /// Runtime that owns this resource.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Desired configuration.
    #[serde(default)]
    pub attributes: Attributes,
    /// IDs that must be processed before this resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Free-form metadata, not interpreted by the engine.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Attributes,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Resource>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Resource>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Spec {
    /// Creates a spec from a list of resources.
    #[must_use]
    pub const fn new(resources: Vec<Resource>) -> Self {
        Self { resources }
    }

    /// Returns true if the spec has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Returns the number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Gets a resource by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Returns all resource IDs in declaration order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.id.as_str()).collect()
    }

    /// Appends a resource, rejecting an ID that is already present.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource with the same ID exists.
    pub fn append(&mut self, resource: Resource) -> Result<(), SpecError> {
        if self.get(&resource.id).is_some() {
            return Err(SpecError::DuplicateId { id: resource.id });
        }
        self.resources.push(resource);
        Ok(())
    }
}

impl Resource {
    /// Creates a resource with no dependencies or extensions.
    #[must_use]
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            attributes,
            depends_on: Vec::new(),
            extensions: Map::new(),
        }
    }

    /// Adds explicit dependencies.
    #[must_use]
    pub fn with_depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            let id = id.into();
            if !self.depends_on.contains(&id) {
                self.depends_on.push(id);
            }
        }
        self
    }

    /// Returns the structural kind of the resource.
    ///
    /// The kind is read from the top-level `kind` attribute. Resources without
    /// a string `kind` resolve to the empty string, which never matches an
    /// entry of a precedence list.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.attributes
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Returns true if this resource declares a dependency on `id`.
    #[must_use]
    pub fn depends_on_id(&self, id: &str) -> bool {
        self.depends_on.iter().any(|d| d == id)
    }
}

/// Builds the canonical composite key of a resource.
///
/// The key is `apiVersion:kind:namespace:name`; the namespace segment is
/// omitted for cluster-scoped resources.
#[must_use]
pub fn build_id(api_version: &str, kind: &str, namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        format!("{api_version}:{kind}:{name}")
    } else {
        format!("{api_version}:{kind}:{namespace}:{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_kind_accessor() {
        let ns = Resource::new(
            "v1:Namespace:default",
            KUBERNETES,
            attrs(json!({"apiVersion": "v1", "kind": "Namespace"})),
        );
        assert_eq!(ns.kind(), "Namespace");

        let untyped = Resource::new("bucket", TERRAFORM, attrs(json!({"acl": "private"})));
        assert_eq!(untyped.kind(), "");

        let numeric = Resource::new("odd", KUBERNETES, attrs(json!({"kind": 3})));
        assert_eq!(numeric.kind(), "");
    }

    #[test]
    fn test_build_id() {
        assert_eq!(build_id("v1", "Namespace", "", "default"), "v1:Namespace:default");
        assert_eq!(
            build_id("v1", "ServiceAccount", "test-ns", "sa1"),
            "v1:ServiceAccount:test-ns:sa1"
        );
    }

    #[test]
    fn test_append_rejects_duplicates() {
        let mut spec = Spec::default();
        spec.append(Resource::new("a", KUBERNETES, Map::new()))
            .expect("first append");

        let result = spec.append(Resource::new("a", KUBERNETES, Map::new()));
        assert!(matches!(result, Err(SpecError::DuplicateId { ref id }) if id == "a"));
        assert_eq!(spec.len(), 1);
    }

    #[test]
    fn test_with_depends_on_dedupes() {
        let r = Resource::new("b", KUBERNETES, Map::new()).with_depends_on(["a", "a", "c"]);
        assert_eq!(r.depends_on, vec!["a", "c"]);
        assert!(r.depends_on_id("c"));
    }
}
