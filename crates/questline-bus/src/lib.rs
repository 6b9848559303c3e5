//! Event bus and analytics export for the Questline progression engine.
//!
//! Engines never call each other directly. They emit [`WorldEvent`]s on the
//! [`EventBus`] and subscribe to the kinds they care about. Every emitted
//! event is also buffered for batched export to an analytics endpoint.
//!
//! # Modules
//!
//! - [`bus`] -- Subscription registry and ordered, failure-isolated delivery
//! - [`analytics`] -- Bounded queue, periodic flush, HTTP and in-memory sinks
//! - [`error`] -- Analytics transport errors
//!
//! [`WorldEvent`]: questline_types::WorldEvent

pub mod analytics;
pub mod bus;
pub mod error;

pub use analytics::{
    AnalyticsConfig, AnalyticsQueue, AnalyticsSink, FlushOutcome, HttpSink, MemorySink,
};
pub use bus::{DeliveryReport, EventBus, HandlerFuture, HandlerResult, Subscription};
pub use error::AnalyticsError;
