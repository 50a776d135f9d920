//! Error types shared by every parley crate.

use thiserror::Error;

/// Failures of the repository interface.
///
/// Reads and writes never fail silently; callers either propagate these or
/// turn them into a submission-time rejection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    /// The named record does not exist.
    #[error("This {0} is not present in the repository")]
    NotFound(&'static str),

    /// The write would violate a uniqueness constraint.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The write was rejected before touching any record.
    #[error("Invalid update: {0}")]
    Invalid(String),

    /// The backing store could not be reached.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    /// Returns `true` when retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A posting policy whose parameters contradict each other.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("announce-only lists cannot moderate non-subscribers; nobody but owners may post")]
    AnnounceOnlyModeration,

    #[error("holding unauthorised posts requires a moderation mode other than none")]
    HoldWithoutModeration,

    #[error("moderator address `{0}` is not a valid address")]
    InvalidModerator(String),
}

impl From<PolicyError> for RepositoryError {
    fn from(value: PolicyError) -> Self {
        Self::Invalid(value.to_string())
    }
}

/// Malformed input found while transforming a message.
///
/// These are never retried: the same bytes would fail the same way.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StructuralError {
    /// No blank line separates the header block from the body.
    #[error("message has no header/body separator")]
    MissingSeparator,

    /// A header line has no `:`.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    /// A folded continuation line appears before any header.
    #[error("continuation line without a preceding header")]
    OrphanContinuation,

    /// A header the transformation depends on is missing or unreadable.
    #[error("missing or unreadable {0} header")]
    UnreadableHeader(&'static str),
}
