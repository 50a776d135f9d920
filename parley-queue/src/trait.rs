use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    entry::QueueEntry,
    types::{EntryId, PayloadId},
};

/// Durable storage underneath a [`Queue`](crate::Queue).
///
/// Entries and payloads are stored separately: an entry is small metadata
/// rewritten on every transition, a payload is the submitted message written
/// once and shared by every entry derived from it.
///
/// A `put_*` call must not return `Ok` until the write is durable, and must
/// replace any previous value atomically; a reader never observes a
/// half-written entry.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Insert or replace an entry.
    async fn put_entry(&self, entry: &QueueEntry) -> crate::Result<()>;

    async fn get_entry(&self, id: &EntryId) -> crate::Result<QueueEntry>;

    async fn delete_entry(&self, id: &EntryId) -> crate::Result<()>;

    /// Every stored entry id, oldest first.
    async fn list_entries(&self) -> crate::Result<Vec<EntryId>>;

    async fn put_payload(&self, id: &PayloadId, data: &[u8]) -> crate::Result<()>;

    async fn get_payload(&self, id: &PayloadId) -> crate::Result<Arc<[u8]>>;

    async fn delete_payload(&self, id: &PayloadId) -> crate::Result<()>;

    /// Every stored payload id, oldest first.
    async fn list_payloads(&self) -> crate::Result<Vec<PayloadId>>;
}
