#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    collections::HashSet,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parley_common::{ListId, now_ms};
use parley_queue::{
    BackingStore, EntryId, MemoryBackingStore, NewEntry, Outcome, PayloadId, Queue, QueueEntry,
    QueueError, QueueKind, RetrySchedule, SplitPart, SplitRecord,
};
use pretty_assertions::assert_eq;

/// Memory store that refuses one entry write once `allowed` more have
/// succeeded.
#[derive(Debug, Default)]
struct FailingStore {
    inner: MemoryBackingStore,
    allowed: AtomicUsize,
    armed: AtomicBool,
}

impl FailingStore {
    fn fail_entry_write_after(&self, allowed: usize) {
        self.allowed.store(allowed, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackingStore for FailingStore {
    async fn put_entry(&self, entry: &QueueEntry) -> parley_queue::Result<()> {
        if self.armed.load(Ordering::SeqCst) {
            if self.allowed.load(Ordering::SeqCst) == 0 {
                self.armed.store(false, Ordering::SeqCst);
                return Err(QueueError::Io(io::Error::other("disk full")));
            }
            self.allowed.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.put_entry(entry).await
    }

    async fn get_entry(&self, id: &EntryId) -> parley_queue::Result<QueueEntry> {
        self.inner.get_entry(id).await
    }

    async fn delete_entry(&self, id: &EntryId) -> parley_queue::Result<()> {
        self.inner.delete_entry(id).await
    }

    async fn list_entries(&self) -> parley_queue::Result<Vec<EntryId>> {
        self.inner.list_entries().await
    }

    async fn put_payload(&self, id: &PayloadId, data: &[u8]) -> parley_queue::Result<()> {
        self.inner.put_payload(id, data).await
    }

    async fn get_payload(&self, id: &PayloadId) -> parley_queue::Result<Arc<[u8]>> {
        self.inner.get_payload(id).await
    }

    async fn delete_payload(&self, id: &PayloadId) -> parley_queue::Result<()> {
        self.inner.delete_payload(id).await
    }

    async fn list_payloads(&self) -> parley_queue::Result<Vec<PayloadId>> {
        self.inner.list_payloads().await
    }
}

/// Gives up once `max` attempts have failed; retries are immediately due.
struct Attempts(u32);

impl RetrySchedule for Attempts {
    fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.0
    }

    fn next_attempt_at_ms(&self, _attempts: u32, now_ms: u64) -> u64 {
        now_ms
    }
}

fn post(recipients: &[&str]) -> NewEntry {
    NewEntry::outgoing(
        ListId(1),
        b"Subject: queued\n\nbody\n".to_vec(),
        "sender@example.org",
        recipients.iter().map(ToString::to_string).collect(),
    )
}

#[tokio::test]
async fn test_enqueue_dequeue_delivered_leaves_nothing() {
    let store = MemoryBackingStore::new();
    let queue = Queue::new(Arc::new(store.clone()));

    queue.enqueue(post(&["a@example.org"])).await.unwrap();
    let claims = queue.dequeue_batch(QueueKind::Outgoing, 5, "w").await.unwrap();
    assert_eq!(claims.len(), 1);

    queue
        .mark_result(&claims[0], Outcome::Delivered, &Attempts(3))
        .await
        .unwrap();

    for kind in QueueKind::ALL {
        assert!(queue.list(kind).is_empty(), "{kind} should be empty");
    }
    assert!(store.is_empty());
    assert_eq!(store.payload_count(), 0);
}

#[tokio::test]
async fn test_transient_failure_reaches_error_on_exact_attempt() {
    let queue = Queue::new(Arc::new(MemoryBackingStore::new()));
    let id = queue.enqueue(post(&["a@example.org"])).await.unwrap();
    let retry = Attempts(3);

    let mut seen = Vec::new();
    for _ in 0..3 {
        queue.promote_due().await.unwrap();
        let claim = queue
            .dequeue_batch(QueueKind::Outgoing, 1, "w")
            .await
            .unwrap()
            .remove(0);
        let transition = queue
            .mark_result(&claim, Outcome::TransientFailure("busy".into()), &retry)
            .await
            .unwrap();
        seen.push((transition.attempts, transition.to));
    }

    assert_eq!(
        seen,
        vec![
            (1, Some(QueueKind::Deferred)),
            (2, Some(QueueKind::Deferred)),
            (3, Some(QueueKind::Error)),
        ]
    );
    assert_eq!(queue.get(&id).unwrap().kind, QueueKind::Error);
    assert_eq!(queue.promote_due().await.unwrap(), 0);
}

#[tokio::test]
async fn test_attempts_never_decrease() {
    let queue = Queue::new(Arc::new(MemoryBackingStore::new()));
    let id = queue.enqueue(post(&["a@example.org"])).await.unwrap();
    let retry = Attempts(10);

    let mut last = 0;
    for _ in 0..5 {
        queue.promote_due().await.unwrap();
        let claim = queue
            .dequeue_batch(QueueKind::Outgoing, 1, "w")
            .await
            .unwrap()
            .remove(0);
        queue
            .mark_result(&claim, Outcome::TransientFailure("busy".into()), &retry)
            .await
            .unwrap();

        let attempts = queue.get(&id).unwrap().attempts;
        assert!(attempts > last);
        last = attempts;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dequeue_never_double_claims() {
    let queue = Arc::new(Queue::new(Arc::new(MemoryBackingStore::new())));
    for i in 0..50 {
        queue
            .enqueue(post(&[&format!("user{i}@example.org")]))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for worker in 0..8 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            queue
                .dequeue_batch(QueueKind::Outgoing, 10, &format!("worker-{worker}"))
                .await
                .unwrap()
        }));
    }

    let mut claimed = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for claim in handle.await.unwrap() {
            total += 1;
            assert!(claimed.insert(claim.id().clone()), "{} claimed twice", claim.id());
        }
    }

    assert_eq!(total, 50);
}

#[tokio::test]
async fn test_expired_leases_are_reclaimed_on_recovery() {
    let store = MemoryBackingStore::new();
    let crashed = Queue::new(Arc::new(store.clone())).with_lease(Duration::ZERO);
    crashed.enqueue(post(&["a@example.org"])).await.unwrap();
    let claims = crashed.dequeue_batch(QueueKind::Outgoing, 1, "crashed").await.unwrap();
    assert!(claims[0].entry.lease.is_some());

    let restarted = Queue::new(Arc::new(store));
    let report = restarted.recover().await.unwrap();
    assert_eq!(report.entries, 1);
    assert_eq!(report.reclaimed, 1);

    let entry = &restarted.list(QueueKind::Outgoing)[0];
    assert!(entry.lease.is_none());
    assert_eq!(
        restarted
            .dequeue_batch(QueueKind::Outgoing, 1, "fresh")
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_interrupted_split_is_finished_on_recovery() {
    let store = MemoryBackingStore::new();
    let queue = Queue::new(Arc::new(store.clone()));
    let parent_id = queue
        .enqueue(post(&["a@example.org", "b@example.org"]))
        .await
        .unwrap();

    // Simulate a crash after the parent was tagged but before any child
    // was written
    let mut parent = queue.get(&parent_id).unwrap();
    let mut child = parent.clone();
    child.id = EntryId::generate();
    child.kind = QueueKind::Error;
    child.recipients = vec!["b@example.org".into()];
    child.provenance.parent = Some(parent_id.clone());
    parent.split = Some(SplitRecord {
        children: vec![child.clone()],
    });
    store.put_entry(&parent).await.unwrap();

    let restarted = Queue::new(Arc::new(store.clone()));
    let report = restarted.recover().await.unwrap();
    assert_eq!(report.finished_splits, 1);
    assert_eq!(report.orphan_payloads, 0);

    assert!(restarted.get(&parent_id).is_err());
    let errored = restarted.list(QueueKind::Error);
    assert_eq!(errored.len(), 1);
    assert_eq!(errored[0].id, child.id);
    assert_eq!(store.len(), 1);
    assert_eq!(store.payload_count(), 1);
}

#[tokio::test]
async fn test_split_failing_on_second_child_is_finished_later() {
    let store = Arc::new(FailingStore::default());
    let queue = Queue::new(store.clone());
    let parent_id = queue
        .enqueue(post(&["a@example.org", "b@example.org"]))
        .await
        .unwrap();
    let claims = queue.dequeue_batch(QueueKind::Outgoing, 1, "w").await.unwrap();

    // Parent tag and first child are written, the second child is refused
    store.fail_entry_write_after(2);
    let parts = vec![
        SplitPart {
            kind: QueueKind::Deferred,
            recipients: vec!["a@example.org".into()],
            attempts: 1,
            last_error: Some("451 try later".into()),
            next_attempt_at_ms: Some(now_ms()),
        },
        SplitPart {
            kind: QueueKind::Error,
            recipients: vec!["b@example.org".into()],
            attempts: 1,
            last_error: Some("550 no such user".into()),
            next_attempt_at_ms: None,
        },
    ];
    let err = queue.split(&claims[0], parts).await.unwrap_err();
    assert!(matches!(err, QueueError::Io(_)));

    // Neither the parent nor a partial set of children is visible
    assert!(queue.get(&parent_id).is_err());
    assert!(queue.list(QueueKind::Deferred).is_empty());
    assert!(queue.list(QueueKind::Error).is_empty());

    assert_eq!(queue.finish_pending_splits().await.unwrap(), 1);
    assert_eq!(queue.finish_pending_splits().await.unwrap(), 0);

    assert!(queue.get(&parent_id).is_err());
    let deferred = queue.list(QueueKind::Deferred);
    let errored = queue.list(QueueKind::Error);
    assert_eq!(deferred.len(), 1);
    assert_eq!(errored.len(), 1);
    assert_eq!(deferred[0].recipients, vec!["a@example.org".to_string()]);
    assert_eq!(errored[0].recipients, vec!["b@example.org".to_string()]);
    assert_eq!(deferred[0].provenance.parent.as_ref(), Some(&parent_id));
    assert_eq!(store.inner.len(), 2);
    assert_eq!(store.inner.payload_count(), 1);
}

#[tokio::test]
async fn test_stale_incoming_is_routed() {
    let store = MemoryBackingStore::new();
    let crashed = Queue::new(Arc::new(store.clone())).with_lease(Duration::ZERO);

    let held = NewEntry::incoming(ListId(1), b"a\n\nb".to_vec(), "s@example.org", QueueKind::Held);
    let outgoing = NewEntry::incoming(ListId(1), b"a\n\nb".to_vec(), "s@example.org", QueueKind::Outgoing)
        .with_recipients(vec!["r@example.org".into()]);
    let orphan = NewEntry::incoming(ListId(1), b"a\n\nb".to_vec(), "s@example.org", QueueKind::Outgoing);

    let held = crashed.enqueue_claimed(held, "submission").await.unwrap();
    let outgoing = crashed.enqueue_claimed(outgoing, "submission").await.unwrap();
    let orphan = crashed.enqueue_claimed(orphan, "submission").await.unwrap();

    let restarted = Queue::new(Arc::new(store));
    let report = restarted.recover().await.unwrap();
    assert_eq!(report.stale_incoming, 3);

    let transitions = restarted.route_stale_incoming().await.unwrap();
    assert_eq!(transitions.len(), 3);

    assert_eq!(restarted.get(held.id()).unwrap().kind, QueueKind::Held);
    assert_eq!(restarted.get(outgoing.id()).unwrap().kind, QueueKind::Outgoing);

    // Routed to Outgoing without recipients cannot be delivered
    let orphan = restarted.get(orphan.id()).unwrap();
    assert_eq!(orphan.kind, QueueKind::Error);
    assert!(orphan.last_error.is_some());
    assert!(restarted.list(QueueKind::Incoming).is_empty());
}

#[tokio::test]
async fn test_orphan_payloads_removed_on_recovery() {
    let store = MemoryBackingStore::new();
    store
        .put_payload(&PayloadId::generate(), b"lost")
        .await
        .unwrap();

    let queue = Queue::open(Arc::new(store.clone())).await.unwrap();
    assert!(queue.is_empty());
    assert_eq!(store.payload_count(), 0);
}

#[tokio::test]
async fn test_deferred_not_due_is_not_promoted() {
    let queue = Queue::new(Arc::new(MemoryBackingStore::new()));
    let mut new = post(&["a@example.org"]);
    new.kind = QueueKind::Incoming;
    new.route = Some(QueueKind::Deferred);
    new.next_attempt_at_ms = Some(now_ms() + 3_600_000);

    let claim = queue.enqueue_claimed(new, "submission").await.unwrap();
    queue.route(&claim, QueueKind::Deferred).await.unwrap();

    assert_eq!(queue.promote_due().await.unwrap(), 0);
    assert_eq!(queue.list(QueueKind::Deferred).len(), 1);
}
