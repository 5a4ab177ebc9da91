//! Progress messages streamed while a change order executes.

use serde::Serialize;
use tokio::sync::mpsc;

/// Status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpResult {
    /// Not started yet. Never sent on the channel.
    Pending,
    /// The step has started.
    InProgress,
    /// The step finished successfully.
    Success,
    /// The step failed, was skipped or was aborted.
    Failed,
}

/// A progress report for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Resource the report is about.
    pub resource_id: String,
    /// Reported status.
    pub op_result: OpResult,
    /// Failure cause, only set with [`OpResult::Failed`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op_err: Option<String>,
}

/// Sending half of the progress channel.
pub type MessageSender = mpsc::UnboundedSender<Message>;

/// Receiving half of the progress channel.
pub type MessageReceiver = mpsc::UnboundedReceiver<Message>;

/// Creates a progress channel.
#[must_use]
pub fn channel() -> (MessageSender, MessageReceiver) {
    mpsc::unbounded_channel()
}

impl OpResult {
    /// Returns true for `Success` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl Message {
    /// A step has started.
    #[must_use]
    pub fn in_progress(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            op_result: OpResult::InProgress,
            op_err: None,
        }
    }

    /// A step succeeded.
    #[must_use]
    pub fn success(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            op_result: OpResult::Success,
            op_err: None,
        }
    }

    /// A step failed.
    #[must_use]
    pub fn failed(resource_id: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            op_result: OpResult::Failed,
            op_err: Some(cause.into()),
        }
    }
}

impl std::fmt::Display for OpResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Success => "Success",
            Self::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.resource_id, self.op_result)?;
        if let Some(err) = &self.op_err {
            write!(f, " ({err})")?;
        }
        Ok(())
    }
}
