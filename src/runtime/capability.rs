//! Runtime trait definition.
//!
//! This module defines the common interface every backend implements. The
//! engine only needs `apply`, `read` and `delete` to plan and execute;
//! `import` and `watch` are routed through the same trait for callers that
//! need them.

use async_trait::async_trait;

use crate::error::RuntimeError;

use super::types::{
    ApplyRequest, ApplyResponse, DeleteRequest, DeleteStatus, ImportRequest, ImportResponse,
    ReadRequest, ReadResponse, WatchRequest, WatchResponse,
};

/// Result type of runtime calls.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Trait for backend runtimes, one implementation per resource type.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Gets the resource type this runtime owns.
    fn type_name(&self) -> &str;

    /// Adopts an existing backend object.
    async fn import(&self, _request: &ImportRequest) -> RuntimeResult<ImportResponse> {
        Err(RuntimeError::unsupported(self.type_name(), "import"))
    }

    /// Converges a resource to its desired attributes.
    async fn apply(&self, request: &ApplyRequest) -> RuntimeResult<ApplyResponse>;

    /// Fetches live attributes.
    ///
    /// Runtimes that cannot read keep the default, which makes the planner
    /// fall back to recorded state.
    async fn read(&self, _request: &ReadRequest) -> RuntimeResult<ReadResponse> {
        Err(RuntimeError::unsupported(self.type_name(), "read"))
    }

    /// Removes a resource.
    async fn delete(&self, request: &DeleteRequest) -> RuntimeResult<DeleteStatus>;

    /// Follows changes of a resource.
    async fn watch(&self, _request: &WatchRequest) -> RuntimeResult<WatchResponse> {
        Err(RuntimeError::unsupported(self.type_name(), "watch"))
    }
}
