//! Backend runtime contract.
//!
//! This module defines the capability set every backend implements and the
//! registry that selects a backend from a resource's `type` field.

mod capability;
mod registry;
mod types;

pub use capability::{Runtime, RuntimeResult};
pub use registry::RuntimeRegistry;
pub use types::{
    ApplyRequest, ApplyResponse, DeleteRequest, DeleteStatus, ImportRequest, ImportResponse,
    ReadRequest, ReadResponse, WatchEvent, WatchRequest, WatchResponse,
};
