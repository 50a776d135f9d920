use std::sync::Arc;

use parley_common::{ListId, Mutations, now_ms};
use serde::{Deserialize, Serialize};

use crate::{
    kind::QueueKind,
    types::{EntryId, LeaseToken, PayloadId},
};

/// A time-bounded claim on an entry by one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: LeaseToken,
    pub holder: String,
    pub expires_at_ms: u64,
}

impl Lease {
    #[must_use]
    pub const fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

/// Where an entry came from. `origin` is the entry created at submission;
/// `parent` is set on entries produced by a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub origin: EntryId,
    pub parent: Option<EntryId>,
}

/// Written onto an entry before its children are, so a split interrupted by
/// a crash can be finished on restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRecord {
    pub children: Vec<QueueEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub kind: QueueKind,
    pub list: ListId,
    /// The unmodified submitted message.
    pub payload: PayloadId,
    /// Header deltas applied when rendering the payload for delivery.
    pub mutations: Mutations,
    pub sender: String,
    pub recipients: Vec<String>,
    /// Digest subscribers recorded at acceptance; not delivered individually.
    pub digest: Vec<String>,
    pub created_at_ms: u64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at_ms: Option<u64>,
    pub lease: Option<Lease>,
    /// Target kind of an `Incoming` entry, applied once the submission
    /// finishes or by recovery if it does not.
    pub route: Option<QueueKind>,
    pub provenance: Provenance,
    /// Why the entry is where it is (hold reason, defer reason, ...).
    pub comment: Option<String>,
    /// `attempts` at the last administrative requeue; retries are counted
    /// from here.
    pub requeued_at_attempt: u32,
    pub split: Option<SplitRecord>,
}

impl QueueEntry {
    /// Attempts since the entry was created or last requeued.
    #[must_use]
    pub const fn effective_attempts(&self) -> u32 {
        self.attempts.saturating_sub(self.requeued_at_attempt)
    }

    /// Claimed by a worker whose lease is still running.
    #[must_use]
    pub fn is_leased(&self, now_ms: u64) -> bool {
        self.lease.as_ref().is_some_and(|l| !l.is_expired(now_ms))
    }

    /// Not yet due for another attempt.
    #[must_use]
    pub fn is_waiting(&self, now_ms: u64) -> bool {
        self.next_attempt_at_ms.is_some_and(|at| at > now_ms)
    }

    /// A split has started; the children replace this entry.
    #[must_use]
    pub const fn is_splitting(&self) -> bool {
        self.split.is_some()
    }
}

/// Input to [`Queue::enqueue`](crate::Queue::enqueue).
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub kind: QueueKind,
    pub list: ListId,
    pub payload: Arc<[u8]>,
    pub mutations: Mutations,
    pub sender: String,
    pub recipients: Vec<String>,
    pub digest: Vec<String>,
    pub next_attempt_at_ms: Option<u64>,
    pub route: Option<QueueKind>,
    pub comment: Option<String>,
}

impl NewEntry {
    /// An entry for `recipients`, straight into `Outgoing`.
    #[must_use]
    pub fn outgoing(
        list: ListId,
        payload: impl Into<Arc<[u8]>>,
        sender: impl Into<String>,
        recipients: Vec<String>,
    ) -> Self {
        Self {
            kind: QueueKind::Outgoing,
            list,
            payload: payload.into(),
            mutations: Mutations::new(),
            sender: sender.into(),
            recipients,
            digest: Vec::new(),
            next_attempt_at_ms: None,
            route: None,
            comment: None,
        }
    }

    /// An `Incoming` entry that will be routed to `route`.
    #[must_use]
    pub fn incoming(
        list: ListId,
        payload: impl Into<Arc<[u8]>>,
        sender: impl Into<String>,
        route: QueueKind,
    ) -> Self {
        Self {
            kind: QueueKind::Incoming,
            route: Some(route),
            ..Self::outgoing(list, payload, sender, Vec::new())
        }
    }

    #[must_use]
    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    #[must_use]
    pub fn with_mutations(mut self, mutations: Mutations) -> Self {
        self.mutations = mutations;
        self
    }

    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub(crate) fn into_entry(self, payload: PayloadId) -> QueueEntry {
        let id = EntryId::generate();
        QueueEntry {
            provenance: Provenance {
                origin: id.clone(),
                parent: None,
            },
            id,
            kind: self.kind,
            list: self.list,
            payload,
            mutations: self.mutations,
            sender: self.sender,
            recipients: self.recipients,
            digest: self.digest,
            created_at_ms: now_ms(),
            attempts: 0,
            last_error: None,
            next_attempt_at_ms: self.next_attempt_at_ms,
            lease: None,
            route: self.route,
            comment: self.comment,
            requeued_at_attempt: 0,
            split: None,
        }
    }
}

/// An entry claimed through a lease. Operations that change a claimed entry
/// take the claim and fail with `LeaseLost` if the lease moved on.
#[derive(Debug, Clone)]
pub struct Claim {
    pub entry: QueueEntry,
    pub token: LeaseToken,
}

impl Claim {
    #[must_use]
    pub const fn id(&self) -> &EntryId {
        &self.entry.id
    }
}

/// Result of one delivery attempt, reported by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    TransientFailure(String),
    PermanentFailure(String),
}

/// What [`Queue::mark_result`](crate::Queue::mark_result) did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub id: EntryId,
    pub from: QueueKind,
    /// `None` when the entry was removed after delivery.
    pub to: Option<QueueKind>,
    pub attempts: u32,
}

impl Transition {
    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.to.is_none()
    }
}

/// One child of a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPart {
    pub kind: QueueKind,
    pub recipients: Vec<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at_ms: Option<u64>,
}

/// Decides when a transiently failed entry is tried again.
///
/// Implemented by the dispatcher's retry policy; kept as a trait so the
/// queue does not depend on the delivery crate.
pub trait RetrySchedule: Send + Sync {
    /// `true` once `attempts` (counted since the last requeue) uses up the
    /// allowed attempts.
    fn is_exhausted(&self, attempts: u32) -> bool;

    fn next_attempt_at_ms(&self, attempts: u32, now_ms: u64) -> u64;
}
