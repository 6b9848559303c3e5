//! Boundary validation errors for events and identifiers.

use crate::events::EventKind;

/// Errors raised when an event or identifier fails validation at an
/// external boundary (analytics replay, auth payloads).
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The payload is not valid JSON, or carries an unknown `type`
    /// discriminator, or is missing a required field.
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload parsed but violates a semantic constraint.
    #[error("invalid {kind} event: {reason}")]
    Invalid {
        /// Discriminator of the offending event.
        kind: EventKind,
        /// What is wrong with it.
        reason: String,
    },

    /// A wallet address failed validation.
    #[error("invalid wallet address: {0}")]
    InvalidWallet(String),

    /// An event inside a batch failed validation.
    #[error("event #{index} in batch: {source}")]
    InBatch {
        /// Zero-based position of the event in the batch.
        index: usize,
        /// The underlying validation failure.
        #[source]
        source: Box<Self>,
    },
}
