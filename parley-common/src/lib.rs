pub mod address;
pub mod audit;
pub mod error;
pub mod logging;
pub mod message;
pub mod models;
pub mod repository;

pub use error::{PolicyError, RepositoryError, StructuralError};
pub use message::{Mutation, Mutations};
pub use models::{
    Account, AccountChangeset, Changeset, ListId, ListOwner, ListOwnerChangeset,
    ListSubscription, ListSubscriptionChangeset, MailingList, MailingListChangeset,
    Moderation, PendingConfirmation, PostPolicy, Posting, SenderRole, SubscriptionPolicy,
    UnauthorizedAction,
};
pub use repository::{MemoryRepository, Repository};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}

/// Milliseconds since the Unix epoch, the timestamp unit used across the
/// queue and the dispatcher.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
