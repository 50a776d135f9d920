use std::sync::Arc;

use parley_filters::{ListRequest, RejectReason};
use parley_queue::{EntryId, QueueKind};

/// A message handed over by whatever received it, with its envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub raw: Arc<[u8]>,
    pub envelope_from: String,
    /// The list address, possibly with a `+extension`.
    pub envelope_to: String,
}

impl Submission {
    #[must_use]
    pub fn new(
        raw: impl Into<Arc<[u8]>>,
        envelope_from: impl Into<String>,
        envelope_to: impl Into<String>,
    ) -> Self {
        Self {
            raw: raw.into(),
            envelope_from: envelope_from.into(),
            envelope_to: envelope_to.into(),
        }
    }
}

/// What became of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionReceipt {
    /// Durably queued as `id`, currently in `kind`.
    Queued { id: EntryId, kind: QueueKind },

    /// Refused by the filter chain. `notice` is the queued note to the
    /// author, if one was sent.
    Rejected {
        reason: RejectReason,
        notice: Option<EntryId>,
    },

    /// A list request was handled. `reply` is the queued answer or
    /// forwarded message.
    Request {
        request: ListRequest,
        reply: Option<EntryId>,
    },

    /// Accepted, but nobody receives individual posts.
    NoRecipients,
}

impl SubmissionReceipt {
    /// The entry holding the post itself, when it was queued.
    #[must_use]
    pub const fn queued(&self) -> Option<&EntryId> {
        match self {
            Self::Queued { id, .. } => Some(id),
            _ => None,
        }
    }
}
