//! State management.
//!
//! This module persists the recorded resource set of every stack. The
//! recorded set is the prior side of the next diff and the input of
//! destroy planning.

mod local;
mod lock;
mod memory;
mod s3;
mod store;
mod types;

pub use local::{DEFAULT_STATE_DIR, LocalStateStore};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use memory::MemoryStateStore;
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{
    HistoryEntry, Operation, ResourceStatus, STATE_VERSION, StackKey, State, StateResource,
};
