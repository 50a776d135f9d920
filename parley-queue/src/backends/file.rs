use std::{
    io::{Error, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use parley_common::internal;
use parley_tracing::traced;
use tokio::fs;

use crate::{
    QueueError, SerializationError,
    entry::QueueEntry,
    r#trait::BackingStore,
    types::{EntryId, PayloadId},
};

const ENTRIES_DIR: &str = "entries";
const PAYLOADS_DIR: &str = "payloads";
const TEMP_PREFIX: &str = ".tmp_";
const DELETED_SUFFIX: &str = ".deleted";

/// File-based backing store
///
/// Layout under the configured directory:
/// - `entries/{ulid}.bin`: entry metadata, bincode encoded
/// - `payloads/{ulid}.eml`: the raw submitted message
///
/// # Atomicity
/// Every write goes to `.tmp_{name}` and is renamed into place, so a crash
/// never leaves a half-written file under a real name. Deletes rename to
/// `{name}.deleted` first and remove second; leftovers of either kind are
/// ignored by listing and removed by [`init`](Self::init).
///
/// # Security
/// The directory is validated when built, and only file
/// names that parse as ULIDs with the expected extension are ever read.
#[derive(Debug, Clone)]
pub struct FileBackingStore {
    path: PathBuf,
}

impl Default for FileBackingStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/parley"),
        }
    }
}

impl FileBackingStore {
    /// Validate a queue directory
    ///
    /// Rejects relative paths, paths with `..` components and paths inside
    /// system directories.
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn validate_path(path: &Path) -> anyhow::Result<()> {
        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(anyhow::anyhow!(
                "Queue path cannot contain '..' components: {}",
                path.display()
            ));
        }

        if !path.is_absolute() {
            return Err(anyhow::anyhow!(
                "Queue path must be absolute: {}",
                path.display()
            ));
        }

        let sensitive_prefixes = [
            "/etc",
            "/bin",
            "/sbin",
            "/usr/bin",
            "/usr/sbin",
            "/boot",
            "/sys",
            "/proc",
            "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(anyhow::anyhow!(
                "Queue path cannot be in system directory {prefix}: {}",
                path.display()
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the queue directories and clear leftovers of interrupted
    /// writes and deletes.
    ///
    /// # Errors
    /// - If a directory cannot be created
    /// - If the path exists but is not a directory
    pub fn init(&self) -> anyhow::Result<()> {
        internal!("Initialising queue at {} ...", self.path.display());

        for dir in [
            self.path.clone(),
            self.path.join(ENTRIES_DIR),
            self.path.join(PAYLOADS_DIR),
        ] {
            if !dir.try_exists()? {
                internal!("{} does not exist, creating...", dir.display());
                std::fs::create_dir_all(&dir)?;
            } else if !dir.is_dir() {
                return Err(Error::new(
                    ErrorKind::NotADirectory,
                    format!("Expected {} to be a Directory, but it is not", dir.display()),
                )
                .into());
            }
        }

        let cleaned = Self::cleanup_dir(&self.path.join(ENTRIES_DIR))?
            + Self::cleanup_dir(&self.path.join(PAYLOADS_DIR))?;

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} leftover temporary or deleted files from queue"
            );
        }

        Ok(())
    }

    fn cleanup_dir(dir: &Path) -> anyhow::Result<usize> {
        let mut cleaned = 0;

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(DELETED_SUFFIX) || filename.starts_with(TEMP_PREFIX) {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        Ok(cleaned)
    }

    fn entry_path(&self, id: &EntryId) -> PathBuf {
        self.path.join(ENTRIES_DIR).join(id.filename())
    }

    fn payload_path(&self, id: &PayloadId) -> PathBuf {
        self.path.join(PAYLOADS_DIR).join(id.filename())
    }

    async fn write_atomic(dir: &Path, filename: &str, data: &[u8]) -> crate::Result<()> {
        let temp = dir.join(format!("{TEMP_PREFIX}{filename}"));
        fs::write(&temp, data).await?;
        fs::rename(&temp, dir.join(filename)).await?;
        Ok(())
    }

    /// Two-phase delete. Returns `false` if the file did not exist.
    async fn remove_two_phase(path: &Path) -> crate::Result<bool> {
        let mut deleted = path.as_os_str().to_owned();
        deleted.push(DELETED_SUFFIX);
        let deleted = PathBuf::from(deleted);

        match fs::rename(path, &deleted).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        // Left behind on failure, and removed by the next init
        fs::remove_file(&deleted).await?;
        Ok(true)
    }

    async fn list_dir<T>(
        dir: &Path,
        parse: impl Fn(&str) -> Option<T> + Send,
    ) -> crate::Result<Vec<T>>
    where
        T: Ord + Send,
    {
        let mut entries = fs::read_dir(dir).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if !filename.starts_with(TEMP_PREFIX)
                && let Some(id) = parse(&filename)
            {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self, entry), fields(id = %entry.id)), timing(precision = "ms"))]
    async fn put_entry(&self, entry: &QueueEntry) -> crate::Result<()> {
        let encoded = bincode::serde::encode_to_vec(entry, bincode::config::standard())
            .map_err(SerializationError::from)?;

        Self::write_atomic(&self.path.join(ENTRIES_DIR), &entry.id.filename(), &encoded).await?;

        internal!(level = DEBUG, "Wrote queue entry {} ({})", entry.id, entry.kind);
        Ok(())
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(id = %id)), timing(precision = "ms"))]
    async fn get_entry(&self, id: &EntryId) -> crate::Result<QueueEntry> {
        let bytes = match fs::read(self.entry_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(QueueError::NotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let (entry, _): (QueueEntry, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(SerializationError::from)?;

        if entry.id != *id {
            return Err(SerializationError::Corrupted(format!(
                "{} contains entry {}",
                id.filename(),
                entry.id
            ))
            .into());
        }

        Ok(entry)
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(id = %id)), timing(precision = "ms"))]
    async fn delete_entry(&self, id: &EntryId) -> crate::Result<()> {
        if !Self::remove_two_phase(&self.entry_path(id)).await? {
            return Err(QueueError::NotFound(id.clone()));
        }

        internal!(level = DEBUG, "Deleted queue entry {id}");
        Ok(())
    }

    async fn list_entries(&self) -> crate::Result<Vec<EntryId>> {
        Self::list_dir(&self.path.join(ENTRIES_DIR), EntryId::from_filename).await
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self, data), fields(id = %id, size = data.len())), timing(precision = "ms"))]
    async fn put_payload(&self, id: &PayloadId, data: &[u8]) -> crate::Result<()> {
        Self::write_atomic(&self.path.join(PAYLOADS_DIR), &id.filename(), data).await
    }

    async fn get_payload(&self, id: &PayloadId) -> crate::Result<Arc<[u8]>> {
        match fs::read(self.payload_path(id)).await {
            Ok(bytes) => Ok(Arc::from(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(QueueError::PayloadNotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_payload(&self, id: &PayloadId) -> crate::Result<()> {
        if !Self::remove_two_phase(&self.payload_path(id)).await? {
            return Err(QueueError::PayloadNotFound(id.clone()));
        }
        Ok(())
    }

    async fn list_payloads(&self) -> crate::Result<Vec<PayloadId>> {
        Self::list_dir(&self.path.join(PAYLOADS_DIR), PayloadId::from_filename).await
    }
}

/// Builder for `FileBackingStore`
#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: PathBuf,
}

impl FileBackingStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Build the final `FileBackingStore`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> anyhow::Result<FileBackingStore> {
        FileBackingStore::validate_path(&self.path)?;
        Ok(FileBackingStore { path: self.path })
    }
}
