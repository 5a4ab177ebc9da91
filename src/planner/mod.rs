//! Change planning and execution.
//!
//! This module compares a desired spec with prior resources, produces a
//! change order and executes it concurrently against the runtimes.

mod diff;
mod executor;
mod message;
mod plan;
mod preview;

pub use diff::{DiffDetail, DiffEngine};
pub use executor::{
    ApplyOperation, ApplyOutcome, CAUSE_ABORTED, CAUSE_CANCELLED, CAUSE_DEPENDENCY_FAILED, CancelHandle,
    ExecutionPolicy, FailurePolicy,
};
pub use message::{Message, MessageReceiver, MessageSender, OpResult, channel};
pub use plan::{Action, Change, ChangeOrder, ChangeStep, ChangeSummary};
pub use preview::Planner;
