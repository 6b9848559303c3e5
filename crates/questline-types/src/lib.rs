//! Shared type definitions for the Questline progression engine.
//!
//! This crate is the single source of truth for types shared by the bus,
//! the state store, and the rule engines. Types flow to `TypeScript` via
//! `ts-rs` so the HUD can subscribe to events without hand-written mirrors.
//!
//! # Modules
//!
//! - [`ids`] -- Session/event identifiers and the validated wallet address
//! - [`events`] -- The closed [`WorldEvent`] sum type and its payloads
//! - [`state`] -- Canonical player state records
//! - [`achievements`] -- Achievement definition and condition types
//! - [`score`] -- Airdrop score snapshot
//! - [`error`] -- Boundary validation errors

pub mod achievements;
pub mod error;
pub mod events;
pub mod ids;
pub mod score;
pub mod state;

// Re-export all public types at crate root for convenience.
pub use achievements::{
    AchievementCategory, AchievementCondition, AchievementDefinition, ConditionKind,
};
pub use error::EventError;
pub use events::{
    AchievementUnlocked, AnalyticsBatch, AreaDiscovered, CreatorTerminalUsed, DiscoveredArea,
    DistrictEntered, EventKind, EventPayload, GameplayTick, InteractionCompleted, LevelUp,
    MessageSent, ParcelEntered, PlayerMoved, SessionEndReason, SessionEnded, SessionStarted,
    UserLoggedIn, WorldEvent, XpCapReached, XpGained, XpSource,
};
pub use ids::{EventId, SessionId, WalletAddress};
pub use score::{AirdropScore, AppliedMultiplier, ScoreBreakdown};
pub use state::{
    AchievementRecord, DistrictVisit, ParcelCoord, ParcelVisit, PlayerState, PlayerStats, Position,
    Session,
};
