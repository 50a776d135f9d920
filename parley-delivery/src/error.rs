//! Typed errors for delivery.
//!
//! - Permanent failures are not retried and land the recipient in `Error`
//! - Transient failures are retried with backoff until the budget runs out
//! - System errors are problems on our side (queue, configuration)

use parley_queue::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    #[error("Transient failure: {0}")]
    Transient(#[from] TransientError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Failures a retry would hit again.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// The recipient does not exist or refuses list mail.
    #[error("Recipient rejected: {0}")]
    RecipientRejected(String),

    /// The message itself was refused (size, content).
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// The stored message could not be rendered for sending.
    #[error("Message cannot be rendered: {0}")]
    Unrenderable(String),
}

/// Failures worth another attempt later.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Transport busy: {0}")]
    Busy(String),

    /// The call did not finish within the configured timeout.
    #[error("Transport call timed out after {0}s")]
    Timeout(u64),

    /// Not enough of the lease was left to start another call.
    #[error("Lease budget exhausted before all recipients were tried")]
    LeaseBudget,
}

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A delivery task panicked or was cancelled.
    #[error("Delivery task failed: {0}")]
    Task(String),
}

impl From<QueueError> for DeliveryError {
    fn from(value: QueueError) -> Self {
        Self::System(SystemError::Queue(value))
    }
}

impl DeliveryError {
    /// Returns `true` if this error is transient and should be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}
