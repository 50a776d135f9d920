use parley_common::{Mutations, StructuralError};
use thiserror::Error;

use crate::post::Post;

/// Why a post was refused. Neither kind is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// The sender may not post to the list.
    #[error("{0}")]
    Policy(String),

    /// The message could not be processed as given.
    #[error("malformed message: {0}")]
    Structural(String),
}

impl RejectReason {
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_))
    }
}

impl From<StructuralError> for RejectReason {
    fn from(value: StructuralError) -> Self {
        Self::Structural(value.to_string())
    }
}

/// Terminal verdict of the filter chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Distribute to `recipients`. Digest subscribers are reported
    /// separately and not delivered individually.
    Accept {
        recipients: Vec<String>,
        digest: Vec<String>,
        mutations: Mutations,
    },
    Reject(RejectReason),
    /// Wait for a moderator.
    Hold(String),
    /// Accepted, but distribution waits.
    Defer {
        recipients: Vec<String>,
        digest: Vec<String>,
        mutations: Mutations,
        reason: String,
    },
}

impl PostAction {
    #[must_use]
    pub fn policy_reject(reason: impl Into<String>) -> Self {
        Self::Reject(RejectReason::Policy(reason.into()))
    }

    #[must_use]
    pub fn structural_reject(error: StructuralError) -> Self {
        Self::Reject(error.into())
    }

    /// Short name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accept { .. } => "accept",
            Self::Reject(_) => "reject",
            Self::Hold(_) => "hold",
            Self::Defer { .. } => "defer",
        }
    }
}

/// Result of one filter stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    Continue(Post),
    Terminal(PostAction),
}

impl FilterOutcome {
    #[must_use]
    pub const fn action(&self) -> Option<&PostAction> {
        match self {
            Self::Terminal(action) => Some(action),
            Self::Continue(_) => None,
        }
    }

    #[must_use]
    pub fn into_action(self) -> Option<PostAction> {
        match self {
            Self::Terminal(action) => Some(action),
            Self::Continue(_) => None,
        }
    }
}
