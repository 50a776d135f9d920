use std::{
    collections::HashMap,
    io,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    QueueError,
    entry::QueueEntry,
    r#trait::BackingStore,
    types::{EntryId, PayloadId},
};

/// In-memory backing store
///
/// Entries and payloads live in two `HashMap`s behind `RwLock`s. Intended for
/// tests and for deployments that accept losing the queue on restart.
///
/// # Capacity Management
/// An optional capacity bounds the number of entries. Inserting a new entry
/// past the limit fails with [`QueueError::CapacityExceeded`]; replacing an
/// existing entry always succeeds.
///
/// # Failure injection
/// [`set_fail_writes`](Self::set_fail_writes) makes every write fail with an
/// I/O error, so callers can exercise their storage-failure paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackingStore {
    entries: Arc<RwLock<HashMap<EntryId, QueueEntry>>>,
    payloads: Arc<RwLock<HashMap<PayloadId, Arc<[u8]>>>>,
    capacity: Option<usize>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding at most `capacity` entries
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Number of stored entries
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn payload_count(&self) -> usize {
        self.payloads
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> crate::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(QueueError::Io(io::Error::other("memory store is failing writes")));
        }
        Ok(())
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn put_entry(&self, entry: &QueueEntry) -> crate::Result<()> {
        self.check_writable()?;

        let mut entries = self.entries.write()?;
        if let Some(cap) = self.capacity
            && !entries.contains_key(&entry.id)
            && entries.len() >= cap
        {
            return Err(QueueError::CapacityExceeded(cap));
        }

        entries.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn get_entry(&self, id: &EntryId) -> crate::Result<QueueEntry> {
        self.entries
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(id.clone()))
    }

    async fn delete_entry(&self, id: &EntryId) -> crate::Result<()> {
        self.check_writable()?;
        self.entries
            .write()?
            .remove(id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        Ok(())
    }

    async fn list_entries(&self) -> crate::Result<Vec<EntryId>> {
        let mut ids: Vec<_> = self.entries.read()?.keys().cloned().collect();

        // ULIDs are lexicographically sortable by creation time
        ids.sort();

        Ok(ids)
    }

    async fn put_payload(&self, id: &PayloadId, data: &[u8]) -> crate::Result<()> {
        self.check_writable()?;
        self.payloads.write()?.insert(id.clone(), Arc::from(data));
        Ok(())
    }

    async fn get_payload(&self, id: &PayloadId) -> crate::Result<Arc<[u8]>> {
        self.payloads
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| QueueError::PayloadNotFound(id.clone()))
    }

    async fn delete_payload(&self, id: &PayloadId) -> crate::Result<()> {
        self.check_writable()?;
        self.payloads
            .write()?
            .remove(id)
            .ok_or_else(|| QueueError::PayloadNotFound(id.clone()))?;
        Ok(())
    }

    async fn list_payloads(&self) -> crate::Result<Vec<PayloadId>> {
        let mut ids: Vec<_> = self.payloads.read()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use parley_common::ListId;

    use super::*;
    use crate::entry::NewEntry;

    fn entry() -> QueueEntry {
        NewEntry::outgoing(
            ListId(1),
            b"Subject: hi\n\nbody".to_vec(),
            "alice@example.org",
            vec!["bob@example.org".to_string()],
        )
        .into_entry(PayloadId::generate())
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_memory_store_basic_operations() {
        let store = MemoryBackingStore::new();
        let entry = entry();

        store.put_entry(&entry).await.expect("Failed to write");
        assert_eq!(store.list_entries().await.expect("Failed to list"), vec![entry.id.clone()]);
        assert_eq!(store.get_entry(&entry.id).await.expect("Failed to read"), entry);

        store.delete_entry(&entry.id).await.expect("Failed to delete");
        assert!(store.is_empty());
        assert!(matches!(
            store.get_entry(&entry.id).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_memory_store_capacity_limit() {
        let store = MemoryBackingStore::with_capacity(2);
        let first = entry();
        store.put_entry(&first).await.expect("First write should succeed");
        store.put_entry(&entry()).await.expect("Second write should succeed");

        let result = store.put_entry(&entry()).await;
        assert!(matches!(result, Err(QueueError::CapacityExceeded(2))));

        // Replacing an existing entry is not an insertion
        let mut updated = first.clone();
        updated.attempts = 1;
        store.put_entry(&updated).await.expect("Update should succeed");

        store.delete_entry(&first.id).await.expect("Failed to delete");
        store.put_entry(&entry()).await.expect("Write after delete should succeed");
        assert_eq!(store.capacity(), Some(2));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_payloads() {
        let store = MemoryBackingStore::new();
        let id = PayloadId::generate();
        store.put_payload(&id, b"raw").await.expect("Failed to write");
        assert_eq!(&*store.get_payload(&id).await.expect("Failed to read"), b"raw");
        assert_eq!(store.payload_count(), 1);

        store.delete_payload(&id).await.expect("Failed to delete");
        assert!(matches!(
            store.get_payload(&id).await,
            Err(QueueError::PayloadNotFound(_))
        ));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_fail_writes() {
        let store = MemoryBackingStore::new();
        store.set_fail_writes(true);
        let result = store.put_entry(&entry()).await;
        assert!(matches!(result, Err(QueueError::Io(_))));

        store.set_fail_writes(false);
        store.put_entry(&entry()).await.expect("Write should succeed");
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_entry_ordering() {
        let store = MemoryBackingStore::new();
        let mut generated = Vec::new();
        for _ in 0..10 {
            let entry = entry();
            store.put_entry(&entry).await.expect("Failed to write");
            generated.push(entry.id);
        }

        generated.sort();
        assert_eq!(store.list_entries().await.expect("Failed to list"), generated);
    }
}
