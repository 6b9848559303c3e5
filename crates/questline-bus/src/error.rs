//! Error types for analytics export.
//!
//! Handler failures are not errors at this level: [`crate::EventBus::emit`]
//! catches them and reports counts. Only the analytics transport produces
//! typed errors, and even those are recovered by requeueing.

/// Errors that can occur when shipping an analytics batch.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    /// The HTTP request could not be sent or the response could not be read.
    #[error("analytics transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("analytics endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The sink is deliberately refusing batches (in-memory outage simulation).
    #[error("analytics sink unavailable")]
    Unavailable,
}
