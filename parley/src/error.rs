use parley_common::RepositoryError;
use parley_queue::QueueError;
use thiserror::Error;

/// Why a submission was not taken.
///
/// Only raised before the message is durably queued. Once it is, anything
/// that goes wrong shows up in the queue instead.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("No list at {0}")]
    UnknownList(String),

    #[error("Malformed submission: {0}")]
    Malformed(String),
}

impl SubmissionError {
    /// `true` if submitting the same message again may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Queue(e) => e.is_transient(),
            Self::UnknownList(_) | Self::Malformed(_) => false,
        }
    }
}

/// Failure of an administrative queue operation.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),

    /// Re-evaluating a held post rejected it.
    #[error("Post rejected on release: {0}")]
    Rejected(String),
}
