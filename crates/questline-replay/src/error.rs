//! Error types for the replay binary.

use std::path::PathBuf;

/// Top-level error for the replay binary.
///
/// Each variant wraps a specific failure so `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The command line did not name an events file.
    #[error("usage: questline-replay <events.json>")]
    Usage,

    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: questline_engines::ConfigError,
    },

    /// The events file could not be read.
    #[error("failed to read events file {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The events file failed boundary validation.
    #[error("invalid events file: {source}")]
    Events {
        /// The underlying validation error.
        #[from]
        source: questline_types::EventError,
    },

    /// The final snapshot could not be written.
    #[error("persistence error: {source}")]
    State {
        /// The underlying store error.
        #[from]
        source: questline_state::StateError,
    },
}
