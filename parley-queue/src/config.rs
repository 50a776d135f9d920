use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Deserializer};

use crate::{
    backends::{FileBackingStore, MemoryBackingStore},
    r#trait::BackingStore,
};

/// Configuration for the queue backing store
///
/// File-backed queue in RON config:
/// ```ron
/// Parley (
///     queue: File(
///         path: "/var/spool/parley",
///     ),
/// )
/// ```
///
/// Memory-backed queue, optionally bounded:
/// ```ron
/// Parley (
///     queue: Memory(
///         capacity: Some(1000),
///     ),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum QueueConfig {
    /// Directory-backed queue (production)
    File {
        #[serde(deserialize_with = "validated_path")]
        path: PathBuf,
    },
    /// In-memory queue; lost on restart
    Memory {
        /// Maximum number of entries (omit for unlimited)
        #[serde(default)]
        capacity: Option<usize>,
    },
}

fn validated_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    let path = PathBuf::deserialize(deserializer)?;
    FileBackingStore::validate_path(&path).map_err(serde::de::Error::custom)?;
    Ok(path)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::File {
            path: FileBackingStore::default().path().to_path_buf(),
        }
    }
}

impl QueueConfig {
    /// Filesystem path for file-backed queues
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File { path } => Some(path.as_path()),
            Self::Memory { .. } => None,
        }
    }

    /// Build the configured store, creating and cleaning the queue
    /// directory for file-backed queues.
    ///
    /// # Errors
    /// Returns an error if the path is invalid or the queue directory cannot
    /// be initialised
    pub fn into_backing_store(self) -> anyhow::Result<Arc<dyn BackingStore>> {
        match self {
            Self::File { path } => {
                let store = FileBackingStore::builder().path(path).build()?;
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory { capacity } => Ok(capacity.map_or_else(
                || Arc::new(MemoryBackingStore::new()) as Arc<dyn BackingStore>,
                |capacity| Arc::new(MemoryBackingStore::with_capacity(capacity)),
            )),
        }
    }
}
