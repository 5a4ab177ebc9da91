//! Request and response types for runtime calls.

use tokio::sync::mpsc;

use crate::spec::Resource;
use crate::state::StackKey;

/// Request to adopt an existing backend object.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    /// Stack the resource belongs to.
    pub stack: StackKey,
    /// Desired resource.
    pub planned: Resource,
}

/// Result of an import.
#[derive(Debug, Clone)]
pub struct ImportResponse {
    /// The adopted resource as observed in the backend.
    pub resource: Resource,
}

/// Request to converge a resource to its desired attributes.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    /// Stack the resource belongs to.
    pub stack: StackKey,
    /// Prior resource, if one existed.
    pub prior: Option<Resource>,
    /// Desired resource.
    pub planned: Resource,
    /// Validate without changing the backend.
    pub dry_run: bool,
}

/// Result of an apply.
#[derive(Debug, Clone)]
pub struct ApplyResponse {
    /// Resource as observed after the apply.
    pub resource: Resource,
}

/// Request to fetch the live state of a resource.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// Stack the resource belongs to.
    pub stack: StackKey,
    /// Recorded resource, if any.
    pub prior: Option<Resource>,
    /// Desired resource.
    pub planned: Resource,
}

/// Result of a read.
#[derive(Debug, Clone)]
pub struct ReadResponse {
    /// Live resource, or `None` when it does not exist.
    pub resource: Option<Resource>,
}

/// Request to remove a resource.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    /// Stack the resource belongs to.
    pub stack: StackKey,
    /// Resource to remove.
    pub resource: Resource,
    /// Validate without changing the backend.
    pub dry_run: bool,
}

/// Outcome of a successful delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// The resource was removed.
    Deleted,
    /// The resource was already gone.
    NotFound,
}

/// Request to follow changes of a resource.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    /// Stack the resource belongs to.
    pub stack: StackKey,
    /// Resource to watch.
    pub resource: Resource,
}

/// A change observed while watching.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Watched resource ID.
    pub resource_id: String,
    /// Resource as observed.
    pub resource: Option<Resource>,
    /// Backend-specific description.
    pub message: String,
}

/// Stream of watch events.
#[derive(Debug)]
pub struct WatchResponse {
    /// Events in arrival order; closed when the watch ends.
    pub events: mpsc::Receiver<WatchEvent>,
}
