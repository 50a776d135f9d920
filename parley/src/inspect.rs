//! Operator view of the queue: listing entries and the administrative
//! moves (requeue, moderator release and discard).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_common::{ListId, audit, internal};
use parley_filters::{Post, PostAction};
use parley_queue::{EntryId, QueueEntry, QueueError, QueueKind};
use serde::{Deserialize, Serialize};

use crate::{controller::Parley, error::InspectError};

/// What an operator needs to see about an entry, without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub id: EntryId,
    pub kind: QueueKind,
    pub list: ListId,
    pub sender: String,
    pub recipients: usize,
    pub digest: usize,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub leased_by: Option<String>,
    pub parent: Option<EntryId>,
    pub comment: Option<String>,
}

fn timestamp(ms: u64) -> Option<DateTime<Utc>> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

impl From<&QueueEntry> for EntrySummary {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            id: entry.id.clone(),
            kind: entry.kind,
            list: entry.list,
            sender: entry.sender.clone(),
            recipients: entry.recipients.len(),
            digest: entry.digest.len(),
            attempts: entry.attempts,
            last_error: entry.last_error.clone(),
            created_at: timestamp(entry.created_at_ms),
            next_attempt_at: entry.next_attempt_at_ms.and_then(timestamp),
            leased_by: entry.lease.as_ref().map(|lease| lease.holder.clone()),
            parent: entry.provenance.parent.clone(),
            comment: entry.comment.clone(),
        }
    }
}

#[async_trait]
pub trait QueueInspector: Send + Sync {
    /// Entries of `kind`, oldest first.
    fn list(&self, kind: QueueKind) -> Vec<EntrySummary>;

    fn entry(&self, id: &EntryId) -> Result<EntrySummary, InspectError>;

    /// Visible entries per kind.
    fn counts(&self) -> BTreeMap<QueueKind, usize>;

    /// Give an `Error` entry a fresh retry budget.
    async fn requeue(&self, id: &EntryId) -> Result<EntrySummary, InspectError>;

    /// Approve a held post. It is evaluated again, as approved, against
    /// the list as it is now.
    async fn release_held(&self, id: &EntryId) -> Result<EntrySummary, InspectError>;

    /// Refuse a held post, moving it to `Error` with `reason`.
    async fn discard_held(&self, id: &EntryId, reason: &str) -> Result<EntrySummary, InspectError>;
}

#[async_trait]
impl QueueInspector for Parley {
    fn list(&self, kind: QueueKind) -> Vec<EntrySummary> {
        self.queue
            .list(kind)
            .iter()
            .map(EntrySummary::from)
            .collect()
    }

    fn entry(&self, id: &EntryId) -> Result<EntrySummary, InspectError> {
        Ok(EntrySummary::from(&self.queue.get(id)?))
    }

    fn counts(&self) -> BTreeMap<QueueKind, usize> {
        self.queue.counts()
    }

    async fn requeue(&self, id: &EntryId) -> Result<EntrySummary, InspectError> {
        let entry = self.queue.requeue(id).await?;
        Ok(EntrySummary::from(&entry))
    }

    async fn release_held(&self, id: &EntryId) -> Result<EntrySummary, InspectError> {
        let held = self.queue.get(id)?;
        if held.kind != QueueKind::Held {
            return Err(QueueError::InvalidTransition {
                from: held.kind,
                to: QueueKind::Outgoing,
            }
            .into());
        }

        let payload = self.queue.payload(&held.payload).await?;
        let context = self.contexts.get(self.repository.as_ref(), held.list).await?;
        let post = Post::new(held.list, &held.sender, payload).approved();
        let list = held.list.to_string();

        let (recipients, digest, mutations) = match self.chain.run(post, &context) {
            PostAction::Accept {
                recipients,
                digest,
                mutations,
            }
            | PostAction::Defer {
                recipients,
                digest,
                mutations,
                ..
            } => (recipients, digest, mutations),
            PostAction::Reject(reason) => {
                let reason = reason.to_string();
                self.queue.discard_held(id, &reason).await?;
                audit::log_post_rejected(&list, &held.sender, &reason, false);
                return Err(InspectError::Rejected(reason));
            }
            PostAction::Hold(reason) => return Err(InspectError::Rejected(reason)),
        };

        if recipients.is_empty() {
            let entry = self.queue.discard_held(id, "no recipients at release").await?;
            internal!(level = INFO, "Held entry {id} released with nobody to deliver to");
            return Ok(EntrySummary::from(&entry));
        }

        let accepted = recipients.clone();
        let entry = self
            .queue
            .release_held(id, recipients, digest, mutations)
            .await?;
        audit::log_post_accepted(&id.to_string(), &list, &held.sender, &accepted);

        Ok(EntrySummary::from(&entry))
    }

    async fn discard_held(&self, id: &EntryId, reason: &str) -> Result<EntrySummary, InspectError> {
        let entry = self.queue.discard_held(id, reason).await?;
        let list = entry.list.to_string();
        audit::log_post_rejected(&list, &entry.sender, reason, false);
        Ok(EntrySummary::from(&entry))
    }
}
