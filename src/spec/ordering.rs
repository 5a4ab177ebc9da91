//! Implicit dependency injection by resource kind.
//!
//! Some kinds must exist before others regardless of what the author
//! declared: a namespace before anything living inside it, a config map
//! before the deployment mounting it. [`OrderedResourcesGenerator`] adds
//! those edges from a precedence list of kinds.

use std::collections::HashSet;
use tracing::debug;

use crate::error::Result;

use super::resource::{KUBERNETES, Spec};

/// Default creation order of resource kinds.
pub const DEFAULT_ORDERED_KINDS: &[&str] = &[
    "Namespace",
    "ResourceQuota",
    "StorageClass",
    "CustomResourceDefinition",
    "ServiceAccount",
    "PodSecurityPolicy",
    "Role",
    "ClusterRole",
    "RoleBinding",
    "ClusterRoleBinding",
    "ConfigMap",
    "Secret",
    "Endpoints",
    "Service",
    "LimitRange",
    "PriorityClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "Deployment",
    "StatefulSet",
    "CronJob",
    "PodDisruptionBudget",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
];

/// A pass that mutates a spec before planning.
pub trait Generator: Send + Sync {
    /// Applies the pass to the spec in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass cannot be applied.
    fn generate(&self, spec: &mut Spec) -> Result<()>;
}

/// Runs generators in order, stopping at the first error.
///
/// # Errors
///
/// Returns the first generator error.
pub fn run_generators(spec: &mut Spec, generators: &[&dyn Generator]) -> Result<()> {
    for generator in generators {
        generator.generate(spec)?;
    }
    Ok(())
}

/// Injects `dependsOn` edges following a kind precedence list.
///
/// Only resources whose `type` is listed take part, on either end of an
/// edge. Kinds are a Kubernetes notion, so the default is [`KUBERNETES`].
#[derive(Debug, Clone)]
pub struct OrderedResourcesGenerator {
    /// Kinds in creation order.
    ordered_kinds: Vec<String>,
    /// Resource types the pass applies to.
    resource_types: Vec<String>,
}

impl Default for OrderedResourcesGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderedResourcesGenerator {
    /// Creates a generator using [`DEFAULT_ORDERED_KINDS`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            ordered_kinds: DEFAULT_ORDERED_KINDS.iter().map(|k| (*k).to_string()).collect(),
            resource_types: vec![KUBERNETES.to_string()],
        }
    }

    /// Creates a generator with a custom precedence list.
    ///
    /// An empty list falls back to the default order.
    #[must_use]
    pub fn with_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ordered_kinds: Vec<String> = kinds.into_iter().map(Into::into).collect();
        if ordered_kinds.is_empty() {
            return Self::new();
        }
        Self {
            ordered_kinds,
            ..Self::new()
        }
    }

    /// Sets the resource types the pass applies to.
    ///
    /// An empty list keeps [`KUBERNETES`].
    #[must_use]
    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let resource_types: Vec<String> = types.into_iter().map(Into::into).collect();
        if !resource_types.is_empty() {
            self.resource_types = resource_types;
        }
        self
    }

    /// Returns the precedence list in use.
    #[must_use]
    pub fn ordered_kinds(&self) -> &[String] {
        &self.ordered_kinds
    }

    /// Returns the resource types the pass applies to.
    #[must_use]
    pub fn resource_types(&self) -> &[String] {
        &self.resource_types
    }

    fn applies_to(&self, resource_type: &str) -> bool {
        self.resource_types.iter().any(|t| t == resource_type)
    }

    /// Returns the kinds that must be created before `kind`.
    ///
    /// Empty when `kind` is not part of the precedence list.
    fn preceding_kinds(&self, kind: &str) -> &[String] {
        self.ordered_kinds
            .iter()
            .position(|k| k == kind)
            .map_or(&[], |pos| &self.ordered_kinds[..pos])
    }

    /// Injects implicit edges into the spec.
    pub fn inject(&self, spec: &mut Spec) {
        // Kinds are captured up front so edges added here never feed back
        // into the kind lookup of later resources.
        let snapshot: Vec<(String, String)> = spec
            .resources
            .iter()
            .filter(|r| self.applies_to(&r.resource_type))
            .map(|r| (r.id.clone(), r.kind().to_string()))
            .collect();

        let mut injected = 0_usize;
        for resource in &mut spec.resources {
            if !self.applies_to(&resource.resource_type) {
                continue;
            }
            let preceding: HashSet<&str> = self
                .preceding_kinds(resource.kind())
                .iter()
                .map(String::as_str)
                .collect();
            if preceding.is_empty() {
                continue;
            }

            // Walk the precedence list so edges are appended kind by kind.
            for kind in self.ordered_kinds.iter().filter(|k| preceding.contains(k.as_str())) {
                for (id, _) in snapshot.iter().filter(|(_, k)| k == kind) {
                    if !resource.depends_on_id(id) {
                        resource.depends_on.push(id.clone());
                        injected += 1;
                    }
                }
            }
        }

        debug!("Injected {injected} implicit dependency edges");
    }
}

impl Generator for OrderedResourcesGenerator {
    fn generate(&self, spec: &mut Spec) -> Result<()> {
        self.inject(spec);
        Ok(())
    }
}
