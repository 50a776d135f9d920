//! Backing store implementations for the queue
//!
//! - `memory`: in-memory storage for tests and transient deployments
//! - `file`: directory-based storage for production use

pub mod file;
pub mod memory;

pub use file::{FileBackingStore, FileBackingStoreBuilder};
pub use memory::MemoryBackingStore;
