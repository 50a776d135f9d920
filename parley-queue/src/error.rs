//! Error types for the parley-queue crate.

use std::io;

use thiserror::Error;

use crate::{
    kind::QueueKind,
    types::{EntryId, PayloadId},
};

/// Every queue and backing-store operation returns this error.
///
/// None of these are swallowed: the submission path turns them into a
/// rejection before the message counts as accepted, the dispatcher logs them
/// and leaves the entry for the next scan.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Reading or writing the backing store failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Queue entry not found: {0}")]
    NotFound(EntryId),

    #[error("Payload not found: {0}")]
    PayloadNotFound(PayloadId),

    #[error("Queue entry already exists: {0}")]
    AlreadyExists(EntryId),

    /// The requested kind change is not an edge of the lifecycle.
    #[error("Invalid queue transition from {from} to {to}")]
    InvalidTransition { from: QueueKind, to: QueueKind },

    /// The caller's lease expired and the entry was reclaimed or re-claimed.
    #[error("Lease on {0} is no longer held")]
    LeaseLost(EntryId),

    #[error("Queue validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Lock poisoning and other invariants that should not break.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Queue capacity exceeded: {0} entries")]
    CapacityExceeded(usize),
}

impl QueueError {
    /// `true` for errors a later attempt may not hit again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::CapacityExceeded(_) | Self::Internal(_))
    }

    #[must_use]
    pub const fn is_lease_lost(&self) -> bool {
        matches!(self, Self::LeaseLost(_))
    }
}

/// Encoding failures for persisted entries.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Decoded, but the content does not match where it was stored.
    #[error("Corrupted queue entry: {0}")]
    Corrupted(String),
}

/// Rejected input, before anything is written.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Entries cannot be created in the {0} queue")]
    InitialKind(QueueKind),

    #[error("Entry has no recipients")]
    NoRecipients,

    #[error("Split plan is invalid: {0}")]
    SplitPlan(String),

    #[error("Invalid queue configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
