//! Reactive rule engines and session lifecycle for the Questline
//! progression engine.
//!
//! Upstream systems publish movement, interaction, and auth events on the
//! shared [`EventBus`]. The [`EventStateBridge`] turns them into store
//! mutations; the XP, achievement, and airdrop engines react to the same
//! events and publish their own results; the [`LifecycleManager`] drives
//! session boundaries and the gameplay tick. [`Progression`] wires all of
//! them to one bus and one store.
//!
//! # Modules
//!
//! - [`achievements`] -- Catalog-driven, idempotent unlocking
//! - [`airdrop`] -- Pure score computation and the throttled engine
//! - [`bridge`] -- Event to state translation
//! - [`catalog`] -- The built-in achievement catalog
//! - [`clock`] -- Injectable time source
//! - [`config`] -- Configuration loading from `questline-config.yaml`
//! - [`error`] -- Engine errors
//! - [`lifecycle`] -- Session state machine and gameplay tick
//! - [`rate_limit`] -- Per-wallet sliding-window XP limiter
//! - [`rules`] -- The XP rules table
//! - [`runtime`] -- The [`Progression`] facade
//! - [`xp`] -- XP granting and the XP engine
//!
//! [`EventBus`]: questline_bus::EventBus

pub mod achievements;
pub mod airdrop;
pub mod bridge;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod rate_limit;
pub mod rules;
pub mod runtime;
pub mod xp;

mod wiring;

pub use achievements::AchievementEngine;
pub use airdrop::{AirdropEngine, ScoreInputs, compute_score};
pub use bridge::EventStateBridge;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AchievementConfig, AirdropConfig, ConfigError, LifecycleConfig, PersistenceConfig,
    ProgressionConfig, ScoreWeights,
};
pub use error::EngineError;
pub use lifecycle::{
    LifecycleManager, LifecyclePhase, PageSignal, SessionObserver, SessionSummary,
};
pub use rate_limit::{RateDecision, RateLimiter};
pub use rules::XpConfig;
pub use runtime::Progression;
pub use xp::{XpEngine, XpGrantor};
