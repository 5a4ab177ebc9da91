//! Diff engine for comparing desired and prior resources.
//!
//! Attributes are compared as JSON values after removing the configured
//! ignored field paths, so runtime-managed fields do not produce updates.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::spec::{Attributes, Resource};

/// Engine for computing diffs between desired and prior resources.
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    /// Ignored dotted paths, pre-split into segments.
    ignored: Vec<Vec<String>>,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffDetail {
    /// Dotted path of the field that differs.
    pub field: String,
    /// Prior value, absent if the field was added.
    pub old_value: Option<Value>,
    /// Desired value, absent if the field was removed.
    pub new_value: Option<Value>,
}

impl DiffEngine {
    /// Creates a diff engine that compares every field.
    #[must_use]
    pub const fn new() -> Self {
        Self { ignored: Vec::new() }
    }

    /// Creates a diff engine that skips the given dotted paths
    /// (e.g. `metadata.resourceVersion`).
    #[must_use]
    pub fn with_ignored_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ignored = fields
            .into_iter()
            .map(|f| f.as_ref().split('.').map(String::from).collect())
            .collect();
        Self { ignored }
    }

    /// Returns the ignored paths in dotted form.
    #[must_use]
    pub fn ignored_fields(&self) -> Vec<String> {
        self.ignored.iter().map(|p| p.join(".")).collect()
    }

    /// Returns a copy of the attributes with every ignored path removed.
    #[must_use]
    pub fn normalize(&self, attributes: &Attributes) -> Value {
        let mut value = Value::Object(attributes.clone());
        for path in &self.ignored {
            remove_path(&mut value, path);
        }
        value
    }

    /// Returns true if both resources have the same type and the same
    /// normalized attributes.
    #[must_use]
    pub fn is_equal(&self, prior: &Resource, desired: &Resource) -> bool {
        prior.resource_type == desired.resource_type
            && self.normalize(&prior.attributes) == self.normalize(&desired.attributes)
    }

    /// Lists field-level differences between two resources.
    ///
    /// Nested objects are descended into; any other value is compared whole.
    #[must_use]
    pub fn details(&self, prior: Option<&Resource>, desired: Option<&Resource>) -> Vec<DiffDetail> {
        let empty = Value::Object(Attributes::new());
        let old = prior.map_or_else(|| empty.clone(), |r| self.normalize(&r.attributes));
        let new = desired.map_or_else(|| empty.clone(), |r| self.normalize(&r.attributes));

        let mut details = Vec::new();
        if let (Some(p), Some(d)) = (prior, desired) {
            if p.resource_type != d.resource_type {
                details.push(DiffDetail {
                    field: String::from("type"),
                    old_value: Some(Value::String(p.resource_type.clone())),
                    new_value: Some(Value::String(d.resource_type.clone())),
                });
            }
        }
        collect_details("", Some(&old), Some(&new), &mut details);

        debug!("Computed {} field difference(s)", details.len());
        details
    }
}

fn remove_path(value: &mut Value, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut current = value;
    for segment in parents {
        match current.get_mut(segment.as_str()) {
            Some(next) => current = next,
            None => return,
        }
    }

    if let Value::Object(map) = current {
        map.remove(last.as_str());
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn collect_details(path: &str, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<DiffDetail>) {
    match (old, new) {
        (Some(Value::Object(o)), Some(Value::Object(n))) => {
            for (key, old_value) in o {
                collect_details(&join_path(path, key), Some(old_value), n.get(key), out);
            }
            for (key, new_value) in n {
                if !o.contains_key(key) {
                    collect_details(&join_path(path, key), None, Some(new_value), out);
                }
            }
        }
        (o, n) if o != n => out.push(DiffDetail {
            field: path.to_string(),
            old_value: o.cloned(),
            new_value: n.cloned(),
        }),
        _ => {}
    }
}

impl std::fmt::Display for DiffDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let render = |v: &Option<Value>| v.as_ref().map_or_else(|| String::from("<none>"), Value::to_string);
        write!(
            f,
            "{}: {} -> {}",
            self.field,
            render(&self.old_value),
            render(&self.new_value)
        )
    }
}
