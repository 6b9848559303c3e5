//! Storage backends for the persisted snapshot.
//!
//! A backend stores one opaque JSON document. The store decides what goes
//! into it; backends only move bytes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::StateError;

/// File name of the snapshot inside the persistence directory.
pub const SNAPSHOT_FILE_NAME: &str = "player-state.json";

/// A place the snapshot document can be read from and written to.
pub trait SnapshotStorage: Send + Sync + std::fmt::Debug {
    /// Read the stored document, or `None` if nothing has been saved yet.
    fn load(&self) -> Result<Option<String>, StateError>;

    /// Replace the stored document.
    fn save(&self, contents: &str) -> Result<(), StateError>;
}

/// Snapshot stored as a JSON file.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Store the snapshot at an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store the snapshot as [`SNAPSHOT_FILE_NAME`] inside `directory`.
    pub fn in_directory(directory: impl AsRef<Path>) -> Self {
        Self::new(directory.as_ref().join(SNAPSHOT_FILE_NAME))
    }

    /// The snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStorage for FileStorage {
    fn load(&self) -> Result<Option<String>, StateError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, contents: &str) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), bytes = contents.len(), "snapshot written");
        Ok(())
    }
}

/// In-memory snapshot slot.
///
/// Clones share the slot, so a test can keep a handle to inspect what the
/// store wrote or to seed a document before the store opens it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStorage {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot that already holds `contents`.
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(contents.into()))),
        }
    }

    /// The currently stored document.
    pub fn contents(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>, StateError> {
        Ok(self.contents())
    }

    fn save(&self, contents: &str) -> Result<(), StateError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(contents.to_owned());
        Ok(())
    }
}
