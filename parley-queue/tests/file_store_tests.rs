#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{path::PathBuf, sync::Arc};

use parley_common::ListId;
use parley_queue::{
    BackingStore, FileBackingStore, NewEntry, Outcome, Queue, QueueError, QueueKind,
    RetrySchedule,
};

struct NoRetry;

impl RetrySchedule for NoRetry {
    fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= 1
    }

    fn next_attempt_at_ms(&self, _attempts: u32, now_ms: u64) -> u64 {
        now_ms
    }
}

fn store_in(dir: &tempfile::TempDir) -> FileBackingStore {
    let store = FileBackingStore::builder()
        .path(dir.path().to_path_buf())
        .build()
        .expect("temp dir is a valid queue path");
    store.init().expect("init");
    store
}

fn post(recipients: &[&str]) -> NewEntry {
    NewEntry::outgoing(
        ListId(3),
        b"Subject: stored\r\nMessage-ID: <a@example.org>\r\n\r\nbody\r\n".to_vec(),
        "sender@example.org",
        recipients.iter().map(ToString::to_string).collect(),
    )
}

#[test]
fn test_path_validation_rejects_parent_dir() {
    let result = FileBackingStore::builder()
        .path(PathBuf::from("/var/spool/../etc/passwd"))
        .build();

    assert!(result.is_err());
    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("cannot contain '..'")
    );
}

#[test]
fn test_path_validation_rejects_relative_paths() {
    let result = FileBackingStore::builder()
        .path(PathBuf::from("relative/path"))
        .build();

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("must be absolute"));
}

#[test]
#[cfg(unix)]
fn test_path_validation_rejects_unix_system_directories() {
    let system_paths = vec![
        "/etc/parley",
        "/bin/queue",
        "/sbin/mail",
        "/usr/bin/data",
        "/boot/queue",
        "/sys/messages",
        "/proc/mail",
        "/dev/queue",
    ];

    for path in system_paths {
        let result = FileBackingStore::builder()
            .path(PathBuf::from(path))
            .build();

        assert!(result.is_err(), "Path {path} should be rejected but wasn't");
        assert!(
            result.unwrap_err().to_string().contains("system directory"),
            "Wrong error for path {path}"
        );
    }
}

#[test]
#[cfg(unix)]
fn test_path_validation_accepts_valid_unix_paths() {
    for path in ["/var/spool/parley", "/home/user/lists", "/tmp/test-queue"] {
        let result = FileBackingStore::builder()
            .path(PathBuf::from(path))
            .build();

        assert!(
            result.is_ok(),
            "Valid path {} was rejected: {:?}",
            path,
            result.unwrap_err()
        );
    }
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn test_init_creates_layout_and_cleans_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("queue");
    let store = FileBackingStore::builder().path(root.clone()).build().unwrap();
    store.init().unwrap();

    assert!(root.join("entries").is_dir());
    assert!(root.join("payloads").is_dir());

    std::fs::write(root.join("entries/.tmp_01ARZ3NDEKTSV4RRFFQ69G5FAV.bin"), b"partial").unwrap();
    std::fs::write(root.join("payloads/01ARZ3NDEKTSV4RRFFQ69G5FAV.eml.deleted"), b"gone").unwrap();
    std::fs::write(root.join("entries/notes.txt"), b"ignored").unwrap();

    assert!(store.list_entries().await.unwrap().is_empty());
    assert!(store.list_payloads().await.unwrap().is_empty());

    store.init().unwrap();
    assert!(!root.join("entries/.tmp_01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").exists());
    assert!(!root.join("payloads/01ARZ3NDEKTSV4RRFFQ69G5FAV.eml.deleted").exists());
    assert!(root.join("entries/notes.txt").exists());
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn test_init_rejects_file_in_place_of_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("queue");
    std::fs::write(&root, b"not a directory").unwrap();

    let store = FileBackingStore::builder().path(root).build().unwrap();
    assert!(store.init().is_err());
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn test_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let id = {
        let queue = Queue::new(Arc::new(store_in(&dir)));
        queue.enqueue(post(&["a@example.org", "b@example.org"])).await.unwrap()
    };

    let queue = Queue::open(Arc::new(store_in(&dir))).await.unwrap();
    let entry = queue.get(&id).unwrap();
    assert_eq!(entry.kind, QueueKind::Outgoing);
    assert_eq!(entry.recipients.len(), 2);

    let payload = queue.payload(&entry.payload).await.unwrap();
    assert!(payload.starts_with(b"Subject: stored"));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn test_delivered_entry_leaves_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let queue = Queue::new(Arc::new(store.clone()));

    queue.enqueue(post(&["a@example.org"])).await.unwrap();
    let claim = queue
        .dequeue_batch(QueueKind::Outgoing, 1, "worker")
        .await
        .unwrap()
        .remove(0);
    queue
        .mark_result(&claim, Outcome::Delivered, &NoRetry)
        .await
        .unwrap();

    assert!(store.list_entries().await.unwrap().is_empty());
    assert!(store.list_payloads().await.unwrap().is_empty());
    assert_eq!(std::fs::read_dir(dir.path().join("entries")).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(dir.path().join("payloads")).unwrap().count(), 0);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn test_error_entry_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Queue::new(Arc::new(store_in(&dir)));

    let id = queue.enqueue(post(&["a@example.org"])).await.unwrap();
    let claim = queue
        .dequeue_batch(QueueKind::Outgoing, 1, "worker")
        .await
        .unwrap()
        .remove(0);
    queue
        .mark_result(&claim, Outcome::TransientFailure("421 try later".into()), &NoRetry)
        .await
        .unwrap();

    let reopened = Queue::open(Arc::new(store_in(&dir))).await.unwrap();
    let entry = reopened.get(&id).unwrap();
    assert_eq!(entry.kind, QueueKind::Error);
    assert_eq!(entry.attempts, 1);
    assert_eq!(entry.last_error.as_deref(), Some("421 try later"));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn test_corrupted_entry_is_skipped_on_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let queue = Queue::new(Arc::new(store.clone()));
    let id = queue.enqueue(post(&["a@example.org"])).await.unwrap();

    std::fs::write(
        dir.path().join("entries").join("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin"),
        b"\xff\xff\xff\xff",
    )
    .unwrap();

    let queue = Queue::new(Arc::new(store));
    let report = queue.recover().await.unwrap();
    assert_eq!(report.entries, 1);
    assert_eq!(report.unreadable, 1);
    assert!(queue.get(&id).is_ok());
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn test_missing_entry_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let id = parley_queue::EntryId::generate();

    assert!(matches!(store.get_entry(&id).await, Err(QueueError::NotFound(_))));
    assert!(matches!(store.delete_entry(&id).await, Err(QueueError::NotFound(_))));
}
