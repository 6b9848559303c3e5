//! Versioned persisted snapshot.
//!
//! Only the durable subset of [`PlayerState`] is written: the wallet, both
//! visit maps, stats, and achievements. Maps are stored as ordered lists of
//! `[key, record]` pairs and rebuilt into maps on load. Position, current
//! parcel/district and the session are transient and start empty after a
//! reload.
//!
//! Snapshots without a `schemaVersion` field predate versioning and are read
//! as version 1.

use std::collections::BTreeMap;

use questline_types::{
    AchievementRecord, DistrictVisit, ParcelCoord, ParcelVisit, PlayerState, PlayerStats,
    WalletAddress,
};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::level::level_for_xp;

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// On-disk representation of the durable player state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    /// Schema version the snapshot was written with.
    #[serde(default = "legacy_version")]
    pub schema_version: u32,
    /// Wallet the snapshot belongs to.
    #[serde(default)]
    pub wallet_address: Option<WalletAddress>,
    /// Parcel visit records as `[key, record]` pairs.
    #[serde(default)]
    pub parcels_visited: Vec<(ParcelCoord, ParcelVisit)>,
    /// District visit records as `[id, record]` pairs.
    #[serde(default)]
    pub districts_visited: Vec<(String, DistrictVisit)>,
    /// Cumulative statistics.
    #[serde(default)]
    pub stats: PlayerStats,
    /// Unlocked achievements as `[id, record]` pairs.
    #[serde(default)]
    pub achievements: Vec<(String, AchievementRecord)>,
}

const fn legacy_version() -> u32 {
    1
}

impl PersistedSnapshot {
    /// Capture the durable subset of `state`.
    pub fn capture(state: &PlayerState) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            wallet_address: state.wallet_address.clone(),
            parcels_visited: state
                .parcels_visited
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            districts_visited: state
                .districts_visited
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            stats: state.stats.clone(),
            achievements: state
                .achievements
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Rebuild a [`PlayerState`] from the snapshot.
    ///
    /// Derived statistics are recomputed from the restored maps so a
    /// hand-edited or stale snapshot cannot break the count and level
    /// invariants. Duplicate keys keep the last record.
    pub fn restore(self) -> PlayerState {
        let parcels_visited: BTreeMap<_, _> = self.parcels_visited.into_iter().collect();
        let districts_visited: BTreeMap<_, _> = self.districts_visited.into_iter().collect();
        let achievements: BTreeMap<_, _> = self.achievements.into_iter().collect();

        let stats = PlayerStats {
            level: level_for_xp(self.stats.total_xp),
            total_parcels_visited: len_u64(parcels_visited.len()),
            total_districts_visited: len_u64(districts_visited.len()),
            ..self.stats
        };

        PlayerState {
            wallet_address: self.wallet_address,
            parcels_visited,
            districts_visited,
            stats,
            achievements,
            ..PlayerState::default()
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and version-check a JSON snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Serialization`] for malformed JSON and
    /// [`StateError::UnsupportedVersion`] for snapshots written by a newer
    /// schema.
    pub fn from_json(raw: &str) -> Result<Self, StateError> {
        let snapshot: Self = serde_json::from_str(raw)?;
        if snapshot.schema_version > SCHEMA_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: snapshot.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(snapshot)
    }
}

/// Map length as the `u64` used by the stats counters.
pub(crate) fn len_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}
