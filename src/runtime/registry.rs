//! Runtime dispatch by resource type.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::RuntimeError;

use super::capability::Runtime;

/// Maps resource types to the runtime that owns them.
#[derive(Default, Clone)]
pub struct RuntimeRegistry {
    /// Runtimes by type name.
    runtimes: HashMap<String, Arc<dyn Runtime>>,
}

impl RuntimeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a runtime under its own type name.
    ///
    /// A runtime registered later for the same type replaces the earlier one.
    pub fn register(&mut self, runtime: Arc<dyn Runtime>) {
        let type_name = runtime.type_name().to_string();
        debug!("Registering runtime for type {type_name}");
        self.runtimes.insert(type_name, runtime);
    }

    /// Builder form of [`Self::register`].
    #[must_use]
    pub fn with(mut self, runtime: Arc<dyn Runtime>) -> Self {
        self.register(runtime);
        self
    }

    /// Gets the runtime for a resource type.
    #[must_use]
    pub fn get(&self, resource_type: &str) -> Option<Arc<dyn Runtime>> {
        self.runtimes.get(resource_type).cloned()
    }

    /// Gets the runtime for a resource type or reports it as unknown.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::UnknownType`] if nothing is registered.
    pub fn require(&self, resource_type: &str) -> Result<Arc<dyn Runtime>, RuntimeError> {
        self.get(resource_type).ok_or_else(|| RuntimeError::UnknownType {
            resource_type: resource_type.to_string(),
        })
    }

    /// Returns the registered type names, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.runtimes.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::{ApplyRequest, ApplyResponse, DeleteRequest, DeleteStatus, ReadRequest};
    use crate::runtime::RuntimeResult;
    use crate::spec::Resource;
    use crate::state::StackKey;
    use async_trait::async_trait;
    use serde_json::Map;

    struct EchoRuntime(&'static str);

    #[async_trait]
    impl Runtime for EchoRuntime {
        fn type_name(&self) -> &str {
            self.0
        }

        async fn apply(&self, request: &ApplyRequest) -> RuntimeResult<ApplyResponse> {
            Ok(ApplyResponse {
                resource: request.planned.clone(),
            })
        }

        async fn delete(&self, _request: &DeleteRequest) -> RuntimeResult<DeleteStatus> {
            Ok(DeleteStatus::Deleted)
        }
    }

    #[test]
    fn test_dispatch_by_type() {
        let registry = RuntimeRegistry::new()
            .with(Arc::new(EchoRuntime("Kubernetes")))
            .with(Arc::new(EchoRuntime("Terraform")));

        assert_eq!(registry.types(), vec!["Kubernetes", "Terraform"]);
        assert_eq!(
            registry.require("Kubernetes").map(|r| r.type_name().to_string()),
            Ok(String::from("Kubernetes"))
        );
        assert!(matches!(
            registry.require("Helm"),
            Err(RuntimeError::UnknownType { ref resource_type }) if resource_type == "Helm"
        ));
    }

    #[tokio::test]
    async fn test_default_capabilities_are_unsupported() {
        let runtime = EchoRuntime("Kubernetes");
        let request = ReadRequest {
            stack: StackKey::new("t", "p", "s"),
            prior: None,
            planned: Resource::new("a", "Kubernetes", Map::new()),
        };

        let result = runtime.read(&request).await;
        assert!(matches!(result, Err(RuntimeError::Unsupported { .. })));
    }
}
