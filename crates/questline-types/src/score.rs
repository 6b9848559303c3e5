//! Airdrop score snapshot.
//!
//! Scores use [`Decimal`] throughout so that recomputing from identical
//! inputs always produces a bit-identical result.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Weighted contribution of each statistic to the base score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ScoreBreakdown {
    /// `weight.xp * totalXP`.
    #[ts(as = "String")]
    pub xp: Decimal,
    /// `weight.achievements * achievementsCount`.
    #[ts(as = "String")]
    pub achievements: Decimal,
    /// `weight.districts * districtsVisited`.
    #[ts(as = "String")]
    pub districts: Decimal,
    /// `weight.parcels * parcelsVisited`.
    #[ts(as = "String")]
    pub parcels: Decimal,
    /// `weight.session_minutes * totalSessionMinutes`.
    #[ts(as = "String")]
    pub session_minutes: Decimal,
    /// `weight.creator_terminal_uses * creatorTerminalUses`.
    #[ts(as = "String")]
    pub creator_terminal_uses: Decimal,
}

impl ScoreBreakdown {
    /// Sum of all contributions.
    pub fn total(&self) -> Decimal {
        self.xp
            .saturating_add(self.achievements)
            .saturating_add(self.districts)
            .saturating_add(self.parcels)
            .saturating_add(self.session_minutes)
            .saturating_add(self.creator_terminal_uses)
    }
}

/// A named multiplicative bonus applied after the weighted sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct AppliedMultiplier {
    /// Bonus name, e.g. `mainnet_profile`.
    pub name: String,
    /// Factor the running score was multiplied by.
    #[ts(as = "String")]
    pub factor: Decimal,
}

/// A computed airdrop score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct AirdropScore {
    /// Per-category contributions.
    pub breakdown: ScoreBreakdown,
    /// Multipliers in the order they were applied.
    pub multipliers: Vec<AppliedMultiplier>,
    /// Weighted sum before multipliers.
    #[ts(as = "String")]
    pub base_score: Decimal,
    /// Final score after multipliers and the cap.
    #[ts(as = "String")]
    pub total_score: Decimal,
    /// Whether the configured maximum clamped the score.
    pub capped: bool,
    /// When the score was computed.
    pub computed_at: DateTime<Utc>,
}
