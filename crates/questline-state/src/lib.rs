//! Canonical player state for the Questline progression engine.
//!
//! One [`PlayerStateStore`] per process holds the wallet, visit history,
//! stats, session, and achievements. The event bridge and the rule engines
//! are its only writers; everything else reads through selectors.
//!
//! # Modules
//!
//! - [`store`] -- The store, its mutators and selectors
//! - [`level`] -- The level formula
//! - [`snapshot`] -- Versioned persisted snapshot
//! - [`storage`] -- File and in-memory snapshot backends
//! - [`error`] -- Persistence errors

pub mod error;
pub mod level;
pub mod snapshot;
pub mod storage;
pub mod store;

pub use error::StateError;
pub use level::{level_for_xp, xp_for_level};
pub use snapshot::{PersistedSnapshot, SCHEMA_VERSION};
pub use storage::{FileStorage, MemoryStorage, SNAPSHOT_FILE_NAME, SnapshotStorage};
pub use store::{PlayerStateStore, VisitTally, XpChange};
