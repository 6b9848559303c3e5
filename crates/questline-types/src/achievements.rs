//! Achievement definition types.
//!
//! The catalog itself lives in `questline_engines::catalog`; this module
//! only defines the shape of a definition so that the unlocked-event payload
//! can share the category enum with the HUD.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Grouping used by the HUD to lay out achievement badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum AchievementCategory {
    /// Parcel and district discovery.
    Exploration,
    /// Time spent in the world.
    Session,
    /// Interactions with NPCs and other players.
    Social,
    /// Use of creator tooling.
    Creator,
    /// On-chain identity milestones.
    Identity,
}

/// Condition that must hold over authoritative state for an achievement to
/// unlock. Exactly one condition per definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AchievementCondition {
    /// At least `count` distinct parcels visited.
    ParcelCount {
        /// Threshold.
        count: u64,
    },
    /// At least `count` distinct districts visited.
    DistrictCount {
        /// Threshold.
        count: u64,
    },
    /// Every known district visited.
    AllDistricts,
    /// At least `count` distinct landmark districts visited.
    LandmarkVisit {
        /// Threshold.
        count: u64,
    },
    /// A single session lasted at least `minutes`.
    SessionTime {
        /// Threshold in whole minutes.
        minutes: u64,
    },
    /// A session has been started.
    FirstSession,
    /// At least `count` completed interactions of any type.
    InteractionCount {
        /// Threshold.
        count: u64,
    },
    /// At least `count` completed interactions of one specific type.
    InteractionType {
        /// The `interactionType` string reported by the dialogue system.
        interaction_type: &'static str,
        /// Threshold.
        count: u64,
    },
    /// The wallet has an on-chain profile.
    ProfileExists,
    /// At least `count` chat messages sent.
    MessageSent {
        /// Threshold.
        count: u64,
    },
}

/// Coarse condition category used to narrow candidates per event before the
/// full condition is re-validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConditionKind {
    /// [`AchievementCondition::ParcelCount`].
    ParcelCount,
    /// [`AchievementCondition::DistrictCount`].
    DistrictCount,
    /// [`AchievementCondition::AllDistricts`].
    AllDistricts,
    /// [`AchievementCondition::LandmarkVisit`].
    LandmarkVisit,
    /// [`AchievementCondition::SessionTime`].
    SessionTime,
    /// [`AchievementCondition::FirstSession`].
    FirstSession,
    /// [`AchievementCondition::InteractionCount`].
    InteractionCount,
    /// [`AchievementCondition::InteractionType`].
    InteractionType,
    /// [`AchievementCondition::ProfileExists`].
    ProfileExists,
    /// [`AchievementCondition::MessageSent`].
    MessageSent,
}

impl AchievementCondition {
    /// The category this condition belongs to.
    pub const fn kind(&self) -> ConditionKind {
        match self {
            Self::ParcelCount { .. } => ConditionKind::ParcelCount,
            Self::DistrictCount { .. } => ConditionKind::DistrictCount,
            Self::AllDistricts => ConditionKind::AllDistricts,
            Self::LandmarkVisit { .. } => ConditionKind::LandmarkVisit,
            Self::SessionTime { .. } => ConditionKind::SessionTime,
            Self::FirstSession => ConditionKind::FirstSession,
            Self::InteractionCount { .. } => ConditionKind::InteractionCount,
            Self::InteractionType { .. } => ConditionKind::InteractionType,
            Self::ProfileExists => ConditionKind::ProfileExists,
            Self::MessageSent { .. } => ConditionKind::MessageSent,
        }
    }
}

/// A static achievement definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AchievementDefinition {
    /// Stable identifier, also the key in the player's achievement map.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// One-line description shown on the badge.
    pub description: &'static str,
    /// Badge grouping.
    pub category: AchievementCategory,
    /// XP granted on unlock.
    pub xp_bonus: u64,
    /// Unlock condition.
    pub condition: AchievementCondition,
    /// Skipped entirely unless the engine runs against mainnet.
    pub mainnet_only: bool,
}
