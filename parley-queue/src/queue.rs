//! The durable queue: an index of entries over a [`BackingStore`], with
//! per-entry leases and per-entry mutual exclusion.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use ahash::AHashSet;
use dashmap::DashMap;
use parley_common::{Mutations, internal, now_ms};
use parley_tracing::traced;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    QueueError, ValidationError,
    entry::{
        Claim, Lease, NewEntry, Outcome, Provenance, QueueEntry, RetrySchedule, SplitPart,
        SplitRecord, Transition,
    },
    kind::QueueKind,
    r#trait::BackingStore,
    types::{EntryId, LeaseToken, PayloadId},
};

/// Default lease granted by [`Queue::dequeue_batch`].
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

/// What [`Queue::recover`] found on restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries loaded from the backing store.
    pub entries: usize,
    /// Entries that could not be decoded and were skipped.
    pub unreadable: usize,
    /// Splits interrupted by the crash and completed now.
    pub finished_splits: usize,
    /// Leases that had expired and were cleared.
    pub reclaimed: usize,
    /// `Incoming` entries left behind by an interrupted submission.
    pub stale_incoming: usize,
    /// Payloads no entry referenced, removed.
    pub orphan_payloads: usize,
}

/// Durable queue of message jobs.
///
/// Every entry lives in the backing store and in an in-process index. Any
/// change to an entry happens under that entry's lock and is written to the
/// store before the index, so the index never runs ahead of what is durable.
/// Independent entries never contend.
#[derive(Debug)]
pub struct Queue {
    store: Arc<dyn BackingStore>,
    index: DashMap<EntryId, QueueEntry>,
    locks: DashMap<EntryId, Arc<Mutex<()>>>,
    lease: Duration,
}

impl Queue {
    /// A queue with an empty index. Call [`recover`](Self::recover) before
    /// use if `store` may already hold entries.
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self {
            store,
            index: DashMap::new(),
            locks: DashMap::new(),
            lease: DEFAULT_LEASE,
        }
    }

    /// Open a queue over `store` and run recovery.
    ///
    /// # Errors
    /// Any error reading the backing store.
    pub async fn open(store: Arc<dyn BackingStore>) -> crate::Result<Self> {
        let queue = Self::new(store);
        queue.recover().await?;
        Ok(queue)
    }

    /// How long a claim is valid before the entry becomes reclaimable.
    #[must_use]
    pub const fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    #[must_use]
    pub const fn lease(&self) -> Duration {
        self.lease
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    async fn lock(&self, id: &EntryId) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(id.clone()).or_default().clone();
        lock.lock_owned().await
    }

    fn lease_until(&self, now: u64) -> u64 {
        let lease = u64::try_from(self.lease.as_millis()).unwrap_or(u64::MAX);
        now.saturating_add(lease)
    }

    fn indexed(&self, id: &EntryId) -> crate::Result<QueueEntry> {
        self.index
            .get(id)
            .map(|entry| entry.value().clone())
            .filter(|entry| !entry.is_splitting())
            .ok_or_else(|| QueueError::NotFound(id.clone()))
    }

    /// The current entry, if `claim` still holds its lease.
    fn claimed(&self, claim: &Claim) -> crate::Result<QueueEntry> {
        let entry = self.indexed(claim.id())?;
        if entry
            .lease
            .as_ref()
            .is_some_and(|lease| lease.token == claim.token)
        {
            Ok(entry)
        } else {
            Err(QueueError::LeaseLost(claim.id().clone()))
        }
    }

    async fn persist(&self, entry: QueueEntry) -> crate::Result<QueueEntry> {
        self.store.put_entry(&entry).await?;
        self.index.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn remove(&self, id: &EntryId) -> crate::Result<()> {
        match self.store.delete_entry(id).await {
            Ok(()) | Err(QueueError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.index.remove(id);
        self.locks.remove(id);
        Ok(())
    }

    /// Delete `payload` once no entry refers to it.
    async fn release_payload(&self, payload: &PayloadId) -> crate::Result<()> {
        let referenced = self.index.iter().any(|entry| {
            entry.payload == *payload
                || entry
                    .split
                    .as_ref()
                    .is_some_and(|split| split.children.iter().any(|c| c.payload == *payload))
        });

        if referenced {
            return Ok(());
        }

        match self.store.delete_payload(payload).await {
            Ok(()) | Err(QueueError::PayloadNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn insert_new(&self, new: NewEntry, lease: Option<Lease>) -> crate::Result<QueueEntry> {
        match new.kind {
            QueueKind::Incoming => {}
            QueueKind::Outgoing if new.recipients.is_empty() => {
                return Err(ValidationError::NoRecipients.into());
            }
            QueueKind::Outgoing => {}
            other => return Err(ValidationError::InitialKind(other).into()),
        }

        let payload_id = PayloadId::generate();
        self.store.put_payload(&payload_id, &new.payload).await?;

        let mut entry = new.into_entry(payload_id.clone());
        entry.lease = lease;

        if let Err(e) = self.store.put_entry(&entry).await {
            // Orphaned otherwise until the next recovery
            let _ = self.store.delete_payload(&payload_id).await;
            return Err(e);
        }

        self.index.insert(entry.id.clone(), entry.clone());

        internal!(
            level = DEBUG,
            "Enqueued {} into {} for list {} ({} recipients)",
            entry.id,
            entry.kind,
            entry.list,
            entry.recipients.len()
        );

        Ok(entry)
    }

    /// Durably store a new entry. Returns once the payload and the entry are
    /// both written.
    ///
    /// # Errors
    /// - [`ValidationError::InitialKind`] unless `new.kind` is `Incoming` or `Outgoing`
    /// - [`ValidationError::NoRecipients`] for an `Outgoing` entry without recipients
    /// - Any backing store error; nothing is left behind in that case
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(list = %new.list, kind = %new.kind)), timing(precision = "ms"))]
    pub async fn enqueue(&self, new: NewEntry) -> crate::Result<EntryId> {
        self.insert_new(new, None).await.map(|entry| entry.id)
    }

    /// Durably store a new entry already claimed by `holder`.
    ///
    /// The submission path uses this for its `Incoming` entry so the
    /// dispatcher leaves it alone until it is routed.
    ///
    /// # Errors
    /// As [`enqueue`](Self::enqueue).
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(list = %new.list, kind = %new.kind)), timing(precision = "ms"))]
    pub async fn enqueue_claimed(&self, new: NewEntry, holder: &str) -> crate::Result<Claim> {
        let token = LeaseToken::generate();
        let lease = Lease {
            token: token.clone(),
            holder: holder.to_string(),
            expires_at_ms: self.lease_until(now_ms()),
        };
        let entry = self.insert_new(new, Some(lease)).await?;
        Ok(Claim { entry, token })
    }

    /// Claim up to `max` entries of `kind`, oldest first.
    ///
    /// Skips entries under a live lease and, for `Deferred`, entries that
    /// are not yet due. An entry is never handed to two callers while its
    /// lease runs.
    ///
    /// # Errors
    /// Any backing store error. Claims made before the error are kept and
    /// expire with their leases.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "ms"))]
    pub async fn dequeue_batch(
        &self,
        kind: QueueKind,
        max: usize,
        holder: &str,
    ) -> crate::Result<Vec<Claim>> {
        let now = now_ms();
        let eligible = |entry: &QueueEntry| {
            entry.kind == kind
                && !entry.is_splitting()
                && !entry.is_leased(now)
                && !(kind == QueueKind::Deferred && entry.is_waiting(now))
        };

        let mut candidates: Vec<EntryId> = self
            .index
            .iter()
            .filter(|entry| eligible(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        candidates.sort();

        let mut claims = Vec::new();
        for id in candidates {
            if claims.len() >= max {
                break;
            }

            let _guard = self.lock(&id).await;
            // Someone else may have claimed or moved it since the scan
            let Some(mut entry) = self.index.get(&id).map(|e| e.value().clone()) else {
                continue;
            };
            if !eligible(&entry) {
                continue;
            }

            let token = LeaseToken::generate();
            entry.lease = Some(Lease {
                token: token.clone(),
                holder: holder.to_string(),
                expires_at_ms: self.lease_until(now),
            });

            let entry = self.persist(entry).await?;
            claims.push(Claim { entry, token });
        }

        if !claims.is_empty() {
            internal!(
                level = DEBUG,
                "{holder} claimed {} {kind} entries",
                claims.len()
            );
        }

        Ok(claims)
    }

    /// Record the outcome of a delivery attempt on a claimed `Outgoing` entry.
    ///
    /// - `Delivered` removes the entry (and its payload once unreferenced)
    /// - `TransientFailure` counts an attempt and moves the entry to
    ///   `Deferred`, or to `Error` on the attempt that exhausts `retry`
    /// - `PermanentFailure` counts an attempt and moves the entry to `Error`
    ///
    /// # Errors
    /// - [`QueueError::LeaseLost`] if the claim's lease was reclaimed
    /// - [`QueueError::InvalidTransition`] if the entry is not `Outgoing`;
    ///   the claim is released and the entry otherwise untouched
    /// - Any backing store error; the entry is unchanged in that case
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self, claim, retry), fields(id = %claim.id())), timing(precision = "ms"))]
    pub async fn mark_result(
        &self,
        claim: &Claim,
        outcome: Outcome,
        retry: &dyn RetrySchedule,
    ) -> crate::Result<Transition> {
        let _guard = self.lock(claim.id()).await;
        let mut entry = self.claimed(claim)?;
        let from = entry.kind;

        if from != QueueKind::Outgoing {
            let to = match outcome {
                Outcome::Delivered => QueueKind::Outgoing,
                Outcome::TransientFailure(_) => QueueKind::Deferred,
                Outcome::PermanentFailure(_) => QueueKind::Error,
            };
            entry.lease = None;
            self.persist(entry).await?;
            return Err(QueueError::InvalidTransition { from, to });
        }

        let (to, error) = match outcome {
            Outcome::Delivered => (None, None),
            Outcome::TransientFailure(reason) => {
                entry.attempts = entry.attempts.saturating_add(1);
                if retry.is_exhausted(entry.effective_attempts()) {
                    (Some(QueueKind::Error), Some(reason))
                } else {
                    entry.next_attempt_at_ms =
                        Some(retry.next_attempt_at_ms(entry.effective_attempts(), now_ms()));
                    (Some(QueueKind::Deferred), Some(reason))
                }
            }
            Outcome::PermanentFailure(reason) => {
                entry.attempts = entry.attempts.saturating_add(1);
                (Some(QueueKind::Error), Some(reason))
            }
        };

        let Some(to) = to else {
            self.remove(&entry.id).await?;
            self.release_payload(&entry.payload).await?;
            internal!(level = DEBUG, "Entry {} delivered and removed", entry.id);
            return Ok(Transition {
                id: entry.id,
                from,
                to: None,
                attempts: entry.attempts,
            });
        };

        if to == QueueKind::Error {
            entry.next_attempt_at_ms = None;
        }
        entry.kind = to;
        entry.last_error = error;
        entry.lease = None;

        let entry = self.persist(entry).await?;
        internal!(
            level = DEBUG,
            "Entry {} moved {from} -> {to} after {} attempts",
            entry.id,
            entry.attempts
        );

        Ok(Transition {
            id: entry.id,
            from,
            to: Some(to),
            attempts: entry.attempts,
        })
    }

    /// Move a claimed entry to `kind` and release it.
    ///
    /// # Errors
    /// - [`QueueError::LeaseLost`] if the claim's lease was reclaimed
    /// - [`QueueError::InvalidTransition`] if `kind` is not a lifecycle edge
    /// - [`ValidationError::NoRecipients`] when routing to `Outgoing` without recipients
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self, claim), fields(id = %claim.id())), timing(precision = "ms"))]
    pub async fn route(&self, claim: &Claim, kind: QueueKind) -> crate::Result<Transition> {
        let _guard = self.lock(claim.id()).await;
        let entry = self.claimed(claim)?;
        self.move_entry(entry, kind, None).await
    }

    async fn move_entry(
        &self,
        mut entry: QueueEntry,
        to: QueueKind,
        error: Option<String>,
    ) -> crate::Result<Transition> {
        let from = entry.kind;
        if !from.can_transition_to(to) {
            return Err(QueueError::InvalidTransition { from, to });
        }
        if to == QueueKind::Outgoing && entry.recipients.is_empty() {
            return Err(ValidationError::NoRecipients.into());
        }

        entry.kind = to;
        entry.lease = None;
        entry.route = None;
        if to != QueueKind::Deferred {
            entry.next_attempt_at_ms = None;
        }
        if error.is_some() {
            entry.last_error = error;
        }

        let entry = self.persist(entry).await?;
        internal!(level = DEBUG, "Entry {} moved {from} -> {to}", entry.id);

        Ok(Transition {
            id: entry.id,
            from,
            to: Some(to),
            attempts: entry.attempts,
        })
    }

    /// Replace a claimed entry by one child per part.
    ///
    /// Children share the parent's payload and mutations and record it as
    /// their parent. The parent is first tagged with the full set of
    /// children, so a failure or crash part way through is finished by
    /// [`finish_pending_splits`](Self::finish_pending_splits) and the parent
    /// and its children are never both visible.
    ///
    /// # Errors
    /// - [`QueueError::LeaseLost`] if the claim's lease was reclaimed
    /// - [`ValidationError::SplitPlan`] for an empty plan, a part without
    ///   recipients, or a part whose kind is not reachable from the parent
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self, claim, parts), fields(id = %claim.id(), parts = parts.len())), timing(precision = "ms"))]
    pub async fn split(&self, claim: &Claim, parts: Vec<SplitPart>) -> crate::Result<Vec<EntryId>> {
        let _guard = self.lock(claim.id()).await;
        let mut parent = self.claimed(claim)?;

        if parts.is_empty() {
            return Err(ValidationError::SplitPlan("no parts".to_string()).into());
        }
        if let Some(part) = parts.iter().find(|part| part.recipients.is_empty()) {
            return Err(ValidationError::SplitPlan(format!("{} part has no recipients", part.kind)).into());
        }
        if let Some(part) = parts
            .iter()
            .find(|part| !parent.kind.can_transition_to(part.kind))
        {
            return Err(QueueError::InvalidTransition {
                from: parent.kind,
                to: part.kind,
            });
        }

        let children: Vec<QueueEntry> = parts
            .into_iter()
            .enumerate()
            .map(|(i, part)| QueueEntry {
                id: EntryId::generate(),
                kind: part.kind,
                list: parent.list,
                payload: parent.payload.clone(),
                mutations: parent.mutations.clone(),
                sender: parent.sender.clone(),
                recipients: part.recipients,
                digest: if i == 0 { parent.digest.clone() } else { Vec::new() },
                created_at_ms: parent.created_at_ms,
                attempts: part.attempts.max(parent.attempts),
                last_error: part.last_error,
                next_attempt_at_ms: part.next_attempt_at_ms,
                lease: None,
                route: None,
                provenance: Provenance {
                    origin: parent.provenance.origin.clone(),
                    parent: Some(parent.id.clone()),
                },
                comment: parent.comment.clone(),
                requeued_at_attempt: parent.requeued_at_attempt,
                split: None,
            })
            .collect();

        parent.split = Some(SplitRecord {
            children: children.clone(),
        });
        let parent = self.persist(parent).await?;

        self.finish_split(parent).await
    }

    /// Write any missing children of a tagged parent, then delete it.
    async fn finish_split(&self, parent: QueueEntry) -> crate::Result<Vec<EntryId>> {
        let Some(split) = parent.split.as_ref() else {
            return Ok(Vec::new());
        };

        let mut ids = Vec::with_capacity(split.children.len());
        for child in &split.children {
            if !self.index.contains_key(&child.id) {
                self.persist(child.clone()).await?;
            }
            ids.push(child.id.clone());
        }

        self.remove(&parent.id).await?;

        internal!(
            level = DEBUG,
            "Entry {} split into {}",
            parent.id,
            ids.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(ids)
    }

    /// Finish every split whose parent is tagged but still stored.
    ///
    /// A split that failed part way (a child write refused by the store)
    /// leaves its parent tagged and invisible; this writes the missing
    /// children and deletes the parent.
    ///
    /// # Errors
    /// Any backing store error. Splits finished before the error stay
    /// finished.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "ms"))]
    pub async fn finish_pending_splits(&self) -> crate::Result<usize> {
        let ids: Vec<EntryId> = self
            .index
            .iter()
            .filter(|entry| entry.is_splitting())
            .map(|entry| entry.key().clone())
            .collect();

        let mut finished = 0;
        for id in ids {
            let _guard = self.lock(&id).await;
            let Some(parent) = self
                .index
                .get(&id)
                .filter(|entry| entry.is_splitting())
                .map(|entry| entry.value().clone())
            else {
                continue;
            };
            self.finish_split(parent).await?;
            finished += 1;
        }

        if finished > 0 {
            internal!(level = INFO, "Finished {finished} interrupted splits");
        }

        Ok(finished)
    }

    /// Give up a claim without changing the entry.
    ///
    /// # Errors
    /// [`QueueError::LeaseLost`] if the lease was already reclaimed.
    pub async fn release(&self, claim: &Claim) -> crate::Result<()> {
        let _guard = self.lock(claim.id()).await;
        let mut entry = self.claimed(claim)?;
        entry.lease = None;
        self.persist(entry).await?;
        Ok(())
    }

    /// Clear every expired lease, making those entries claimable again.
    ///
    /// # Errors
    /// Any backing store error.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "ms"))]
    pub async fn reclaim_expired(&self) -> crate::Result<usize> {
        let now = now_ms();
        let expired = |entry: &QueueEntry| {
            entry
                .lease
                .as_ref()
                .is_some_and(|lease| lease.is_expired(now))
        };

        let ids: Vec<EntryId> = self
            .index
            .iter()
            .filter(|entry| expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut reclaimed = 0;
        for id in ids {
            let _guard = self.lock(&id).await;
            let Some(mut entry) = self.index.get(&id).map(|e| e.value().clone()) else {
                continue;
            };
            if !expired(&entry) {
                continue;
            }

            if let Some(lease) = entry.lease.take() {
                internal!(
                    level = INFO,
                    "Reclaimed {} ({}) from expired lease held by {}",
                    entry.id,
                    entry.kind,
                    lease.holder
                );
            }
            self.persist(entry).await?;
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    /// Route `Incoming` entries whose submission never finished.
    ///
    /// Each goes to the kind recorded when it was enqueued, or to `Error`
    /// when none was recorded or the recorded kind cannot be reached.
    ///
    /// # Errors
    /// Any backing store error.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "ms"))]
    pub async fn route_stale_incoming(&self) -> crate::Result<Vec<Transition>> {
        let now = now_ms();
        let stale = |entry: &QueueEntry| {
            entry.kind == QueueKind::Incoming && !entry.is_splitting() && !entry.is_leased(now)
        };

        let ids: Vec<EntryId> = self
            .index
            .iter()
            .filter(|entry| stale(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut transitions = Vec::new();
        for id in ids {
            let _guard = self.lock(&id).await;
            let Some(entry) = self.index.get(&id).map(|e| e.value().clone()) else {
                continue;
            };
            if !stale(&entry) {
                continue;
            }

            let target = match entry.route {
                Some(QueueKind::Outgoing) if entry.recipients.is_empty() => None,
                Some(kind) if QueueKind::Incoming.can_transition_to(kind) => Some(kind),
                _ => None,
            };

            let transition = match target {
                Some(kind) => self.move_entry(entry, kind, None).await?,
                None => {
                    self.move_entry(
                        entry,
                        QueueKind::Error,
                        Some("submission interrupted before routing".to_string()),
                    )
                    .await?
                }
            };

            internal!(
                level = WARN,
                "Routed stale incoming entry {} to {}",
                transition.id,
                transition.to.map_or("nowhere", QueueKind::as_str)
            );
            transitions.push(transition);
        }

        Ok(transitions)
    }

    /// Move every due `Deferred` entry back to `Outgoing`.
    ///
    /// # Errors
    /// Any backing store error.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "ms"))]
    pub async fn promote_due(&self) -> crate::Result<usize> {
        let now = now_ms();
        let due = |entry: &QueueEntry| {
            entry.kind == QueueKind::Deferred
                && !entry.is_splitting()
                && !entry.is_leased(now)
                && !entry.is_waiting(now)
        };

        let ids: Vec<EntryId> = self
            .index
            .iter()
            .filter(|entry| due(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut promoted = 0;
        for id in ids {
            let _guard = self.lock(&id).await;
            let Some(entry) = self.index.get(&id).map(|e| e.value().clone()) else {
                continue;
            };
            if due(&entry) {
                self.move_entry(entry, QueueKind::Outgoing, None).await?;
                promoted += 1;
            }
        }

        Ok(promoted)
    }

    /// Reload the index from the backing store and repair what a crash
    /// left behind: interrupted splits are finished, expired leases are
    /// cleared and payloads no entry refers to are deleted. Stale
    /// `Incoming` entries are counted; [`route_stale_incoming`](Self::route_stale_incoming)
    /// moves them on.
    ///
    /// Run before the queue accepts new work, since a payload written by a
    /// concurrent enqueue looks orphaned until its entry is written.
    ///
    /// # Errors
    /// Any backing store error other than an undecodable entry.
    #[traced(instrument(level = tracing::Level::INFO, skip(self)), timing(precision = "ms"))]
    pub async fn recover(&self) -> crate::Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        self.index.clear();

        for id in self.store.list_entries().await? {
            match self.store.get_entry(&id).await {
                Ok(entry) => {
                    self.index.insert(id, entry);
                    report.entries += 1;
                }
                Err(QueueError::Serialization(e)) => {
                    internal!(level = WARN, "Skipping unreadable queue entry {id}: {e}");
                    report.unreadable += 1;
                }
                Err(QueueError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        report.finished_splits = self.finish_pending_splits().await?;

        report.reclaimed = self.reclaim_expired().await?;

        let now = now_ms();
        report.stale_incoming = self
            .index
            .iter()
            .filter(|entry| entry.kind == QueueKind::Incoming && !entry.is_leased(now))
            .count();

        let referenced: AHashSet<PayloadId> = self
            .index
            .iter()
            .map(|entry| entry.payload.clone())
            .collect();
        for payload in self.store.list_payloads().await? {
            if !referenced.contains(&payload) {
                match self.store.delete_payload(&payload).await {
                    Ok(()) | Err(QueueError::PayloadNotFound(_)) => report.orphan_payloads += 1,
                    Err(e) => return Err(e),
                }
            }
        }

        internal!(
            level = INFO,
            "Queue recovered: {} entries, {} unreadable, {} splits finished, {} leases reclaimed, {} stale incoming, {} orphan payloads",
            report.entries,
            report.unreadable,
            report.finished_splits,
            report.reclaimed,
            report.stale_incoming,
            report.orphan_payloads
        );

        Ok(report)
    }

    /// Entries of `kind`, oldest first.
    #[must_use]
    pub fn list(&self, kind: QueueKind) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self
            .index
            .iter()
            .filter(|entry| entry.kind == kind && !entry.is_splitting())
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// # Errors
    /// [`QueueError::NotFound`] if no such entry is visible.
    pub fn get(&self, id: &EntryId) -> crate::Result<QueueEntry> {
        self.indexed(id)
    }

    /// The unmodified submitted message.
    ///
    /// # Errors
    /// [`QueueError::PayloadNotFound`] or any backing store error.
    pub async fn payload(&self, id: &PayloadId) -> crate::Result<Arc<[u8]>> {
        self.store.get_payload(id).await
    }

    /// Visible entries per kind; every kind is present.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<QueueKind, usize> {
        let mut counts: BTreeMap<QueueKind, usize> =
            QueueKind::ALL.into_iter().map(|kind| (kind, 0)).collect();
        for entry in self.index.iter().filter(|entry| !entry.is_splitting()) {
            *counts.entry(entry.kind).or_default() += 1;
        }
        counts
    }

    /// Total visible entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index
            .iter()
            .filter(|entry| !entry.is_splitting())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unclaimed(&self, id: &EntryId, expected: QueueKind, to: QueueKind) -> crate::Result<QueueEntry> {
        let entry = self.indexed(id)?;
        if entry.kind != expected {
            return Err(QueueError::InvalidTransition {
                from: entry.kind,
                to,
            });
        }
        if entry.is_leased(now_ms()) {
            return Err(QueueError::LeaseLost(id.clone()));
        }
        Ok(entry)
    }

    /// Administrative requeue of an `Error` entry back to `Outgoing`.
    ///
    /// Attempts keep counting up, but the retry budget starts over.
    ///
    /// # Errors
    /// - [`QueueError::InvalidTransition`] unless the entry is in `Error`
    /// - [`ValidationError::NoRecipients`] if the entry has nobody to deliver to
    #[traced(instrument(level = tracing::Level::INFO, skip(self), fields(id = %id)), timing(precision = "ms"))]
    pub async fn requeue(&self, id: &EntryId) -> crate::Result<QueueEntry> {
        let _guard = self.lock(id).await;
        let mut entry = self.unclaimed(id, QueueKind::Error, QueueKind::Outgoing)?;
        if entry.recipients.is_empty() {
            return Err(ValidationError::NoRecipients.into());
        }

        entry.kind = QueueKind::Outgoing;
        entry.requeued_at_attempt = entry.attempts;
        entry.next_attempt_at_ms = None;
        entry.lease = None;

        let entry = self.persist(entry).await?;
        internal!(level = INFO, "Entry {} requeued from error", entry.id);
        Ok(entry)
    }

    /// Moderator approval: move a `Held` entry to `Outgoing` with the
    /// recipients and header changes computed at release time.
    ///
    /// # Errors
    /// - [`QueueError::InvalidTransition`] unless the entry is `Held`
    /// - [`ValidationError::NoRecipients`] if `recipients` is empty
    #[traced(instrument(level = tracing::Level::INFO, skip(self, recipients, digest, mutations), fields(id = %id)), timing(precision = "ms"))]
    pub async fn release_held(
        &self,
        id: &EntryId,
        recipients: Vec<String>,
        digest: Vec<String>,
        mutations: Mutations,
    ) -> crate::Result<QueueEntry> {
        let _guard = self.lock(id).await;
        let mut entry = self.unclaimed(id, QueueKind::Held, QueueKind::Outgoing)?;

        entry.recipients = recipients;
        entry.digest = digest;
        entry.mutations = mutations;
        entry.comment = None;

        self.move_entry(entry, QueueKind::Outgoing, None).await?;
        self.indexed(id)
    }

    /// Moderator rejection: move a `Held` entry to `Error`.
    ///
    /// # Errors
    /// [`QueueError::InvalidTransition`] unless the entry is `Held`.
    #[traced(instrument(level = tracing::Level::INFO, skip(self), fields(id = %id)), timing(precision = "ms"))]
    pub async fn discard_held(&self, id: &EntryId, reason: &str) -> crate::Result<QueueEntry> {
        let _guard = self.lock(id).await;
        let entry = self.unclaimed(id, QueueKind::Held, QueueKind::Error)?;
        self.move_entry(entry, QueueKind::Error, Some(reason.to_string()))
            .await?;
        self.indexed(id)
    }
}
