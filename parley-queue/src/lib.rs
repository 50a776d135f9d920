pub mod backends;
pub mod config;
pub mod entry;
pub mod error;
pub mod kind;
pub mod queue;
pub mod r#trait;
pub mod types;

pub use backends::{FileBackingStore, FileBackingStoreBuilder, MemoryBackingStore};
pub use config::QueueConfig;
pub use entry::{
    Claim, Lease, NewEntry, Outcome, Provenance, QueueEntry, RetrySchedule, SplitPart,
    SplitRecord, Transition,
};
pub use error::{QueueError, Result, SerializationError, ValidationError};
pub use kind::QueueKind;
pub use queue::{DEFAULT_LEASE, Queue, RecoveryReport};
pub use r#trait::BackingStore;
pub use types::{EntryId, LeaseToken, PayloadId};
