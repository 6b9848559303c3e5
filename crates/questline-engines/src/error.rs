//! Error types for the engines.
//!
//! Most engine work happens inside bus handlers, where failures are logged
//! rather than returned. The errors here cover the calls a host makes
//! directly: lifecycle transitions and building the runtime from config.

use crate::config::ConfigError;
use crate::lifecycle::LifecyclePhase;

/// Errors returned by engine entry points.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A lifecycle call arrived in a phase that does not allow it.
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        /// Phase the manager was in.
        from: LifecyclePhase,
        /// Phase the call tried to enter.
        to: LifecyclePhase,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Snapshot persistence failed.
    #[error(transparent)]
    State(#[from] questline_state::StateError),
}
