//! The XP rules table.
//!
//! One table holds every base amount. The XP engine grants from it and the
//! event bridge reads the first-visit amounts from it for the XP hint on
//! `AREA_DISCOVERED`, so the two can never disagree.

use std::collections::BTreeMap;

use questline_types::DiscoveredArea;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;

/// XP amounts, cap, and multiplier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct XpConfig {
    /// First entry into a parcel.
    #[serde(default = "default_parcel_first_visit")]
    pub parcel_first_visit: u64,

    /// First entry into a district.
    #[serde(default = "default_district_first_visit")]
    pub district_first_visit: u64,

    /// Completed interaction whose type has no explicit amount.
    #[serde(default = "default_interaction_default")]
    pub interaction_default: u64,

    /// Per-interaction-type amounts, keyed by the reported `interactionType`.
    #[serde(default = "default_interaction_amounts")]
    pub interaction_amounts: BTreeMap<String, u64>,

    /// Bonus granted for every full interval of session time.
    #[serde(default = "default_session_bonus")]
    pub session_bonus: u64,

    /// Length of the session-time interval in minutes. 0 disables it.
    #[serde(default = "default_session_bonus_interval_minutes")]
    pub session_bonus_interval_minutes: u64,

    /// One-off bonus once a session passes the long-session threshold.
    #[serde(default = "default_long_session_bonus")]
    pub long_session_bonus: u64,

    /// Session length in minutes that earns the long-session bonus. 0
    /// disables it.
    #[serde(default = "default_long_session_threshold_minutes")]
    pub long_session_threshold_minutes: u64,

    /// Most XP any wallet may receive in a trailing 60-second window.
    #[serde(default = "default_max_xp_per_minute")]
    pub max_xp_per_minute: u64,

    /// Global multiplier applied to every base amount, result floored.
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
}

impl Default for XpConfig {
    fn default() -> Self {
        Self {
            parcel_first_visit: default_parcel_first_visit(),
            district_first_visit: default_district_first_visit(),
            interaction_default: default_interaction_default(),
            interaction_amounts: default_interaction_amounts(),
            session_bonus: default_session_bonus(),
            session_bonus_interval_minutes: default_session_bonus_interval_minutes(),
            long_session_bonus: default_long_session_bonus(),
            long_session_threshold_minutes: default_long_session_threshold_minutes(),
            max_xp_per_minute: default_max_xp_per_minute(),
            multiplier: default_multiplier(),
        }
    }
}

impl XpConfig {
    /// Base amount for discovering `area` for the first time.
    pub const fn first_visit_amount(&self, area: &DiscoveredArea) -> u64 {
        match area {
            DiscoveredArea::Parcel { .. } => self.parcel_first_visit,
            DiscoveredArea::District { .. } => self.district_first_visit,
        }
    }

    /// Base amount for completing an interaction of `interaction_type`.
    pub fn interaction_amount(&self, interaction_type: &str) -> u64 {
        self.interaction_amounts
            .get(interaction_type)
            .copied()
            .unwrap_or(self.interaction_default)
    }

    /// Apply the global multiplier and floor the result.
    ///
    /// A zero or negative multiplier yields 0; an overflowing product
    /// saturates at `u64::MAX`.
    pub fn apply_multiplier(&self, base: u64) -> u64 {
        if self.multiplier <= Decimal::ZERO {
            return 0;
        }
        Decimal::from(base)
            .checked_mul(self.multiplier)
            .and_then(|scaled| scaled.floor().to_u64())
            .unwrap_or(u64::MAX)
    }
}

const fn default_parcel_first_visit() -> u64 {
    10
}

const fn default_district_first_visit() -> u64 {
    50
}

const fn default_interaction_default() -> u64 {
    5
}

fn default_interaction_amounts() -> BTreeMap<String, u64> {
    BTreeMap::from([
        ("npc_dialogue".to_owned(), 10),
        ("quest_complete".to_owned(), 40),
        ("creator_terminal".to_owned(), 15),
    ])
}

const fn default_session_bonus() -> u64 {
    5
}

const fn default_session_bonus_interval_minutes() -> u64 {
    10
}

const fn default_long_session_bonus() -> u64 {
    100
}

const fn default_long_session_threshold_minutes() -> u64 {
    60
}

const fn default_max_xp_per_minute() -> u64 {
    100
}

const fn default_multiplier() -> Decimal {
    Decimal::ONE
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn interaction_amount_falls_back_to_default() {
        let rules = XpConfig::default();
        assert_eq!(rules.interaction_amount("npc_dialogue"), 10);
        assert_eq!(rules.interaction_amount("wave"), 5);
    }

    #[test]
    fn multiplier_floors() {
        let rules = XpConfig {
            multiplier: Decimal::new(15, 1),
            ..XpConfig::default()
        };
        assert_eq!(rules.apply_multiplier(5), 7);
        assert_eq!(rules.apply_multiplier(0), 0);

        let negative = XpConfig {
            multiplier: Decimal::new(-2, 0),
            ..XpConfig::default()
        };
        assert_eq!(negative.apply_multiplier(10), 0);
    }

    #[test]
    fn first_visit_amounts_come_from_the_table() {
        let rules = XpConfig {
            parcel_first_visit: 1,
            ..XpConfig::default()
        };
        assert_eq!(rules.first_visit_amount(&DiscoveredArea::Parcel { x: 0, z: 0 }), 1);
        assert_eq!(
            rules.first_visit_amount(&DiscoveredArea::District {
                id: "harbor".to_owned()
            }),
            50
        );
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let rules: XpConfig = serde_yml::from_str("max_xp_per_minute: 50\nmultiplier: 2").unwrap();
        assert_eq!(rules.max_xp_per_minute, 50);
        assert_eq!(rules.multiplier, Decimal::new(2, 0));
        assert_eq!(rules.parcel_first_visit, 10);
    }
}
