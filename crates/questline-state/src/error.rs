//! Error types for snapshot persistence.
//!
//! Mutators on the store are infallible. Only reading and writing the
//! persisted snapshot can fail, and a failed load is recovered by starting
//! from empty state.

/// Errors that can occur when loading or saving a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Reading or writing the storage backend failed.
    #[error("snapshot storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot is not valid JSON or does not match the schema.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The snapshot was written by a newer schema than this build reads.
    #[error("unsupported snapshot schema version {found} (newest supported is {supported})")]
    UnsupportedVersion {
        /// Version found in the snapshot.
        found: u32,
        /// Newest version this build understands.
        supported: u32,
    },
}
