//! Canonical player state data model.
//!
//! These are plain data types. All mutation goes through
//! `questline_state::PlayerStateStore`; nothing here enforces invariants on
//! its own beyond what the types make unrepresentable.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ts_rs::TS;

use crate::ids::{SessionId, WalletAddress};

// ---------------------------------------------------------------------------
// World coordinates
// ---------------------------------------------------------------------------

/// Continuous world-space position of the player avatar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Position {
    /// East-west axis.
    pub x: f64,
    /// Vertical axis.
    pub y: f64,
    /// North-south axis.
    pub z: f64,
}

/// Integer key of a parcel, the smallest addressable world unit.
///
/// Serializes as the string `"x,z"` so it can be used as a map key in
/// JSON and as the first element of a persisted `[key, record]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParcelCoord {
    /// Parcel column.
    pub x: i32,
    /// Parcel row.
    pub z: i32,
}

impl ParcelCoord {
    /// Create a parcel key from its two coordinates.
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl core::fmt::Display for ParcelCoord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

/// Error returned when a `"x,z"` parcel key cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid parcel key {0:?}, expected \"x,z\"")]
pub struct ParseParcelCoordError(String);

impl FromStr for ParcelCoord {
    type Err = ParseParcelCoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, z) = s
            .split_once(',')
            .ok_or_else(|| ParseParcelCoordError(s.to_owned()))?;
        let x = x
            .trim()
            .parse()
            .map_err(|_err| ParseParcelCoordError(s.to_owned()))?;
        let z = z
            .trim()
            .parse()
            .map_err(|_err| ParseParcelCoordError(s.to_owned()))?;
        Ok(Self { x, z })
    }
}

impl Serialize for ParcelCoord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ParcelCoord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Visit records
// ---------------------------------------------------------------------------

/// Visit history for a single parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ParcelVisit {
    /// Parcel column.
    pub x: i32,
    /// Parcel row.
    pub z: i32,
    /// When the parcel was first recorded for this wallet.
    pub first_visit_time: DateTime<Utc>,
    /// Most recent entry into the parcel.
    pub last_visit_time: DateTime<Utc>,
    /// Number of recorded entries. Never decreases.
    pub visit_count: u32,
}

/// Visit history for a single district.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct DistrictVisit {
    /// District identifier.
    pub district_id: String,
    /// Display name, when the movement system supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district_name: Option<String>,
    /// When the district was first recorded for this wallet.
    pub first_visit_time: DateTime<Utc>,
    /// Most recent entry into the district.
    pub last_visit_time: DateTime<Utc>,
    /// Number of recorded entries. Never decreases.
    pub visit_count: u32,
}

// ---------------------------------------------------------------------------
// Session, stats, achievements
// ---------------------------------------------------------------------------

/// A bounded interval of activity for one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Session {
    /// Fresh identifier generated on wallet connect.
    pub session_id: SessionId,
    /// Wallet that owns the session.
    pub wallet_address: WalletAddress,
    /// When the session started.
    pub start_time: DateTime<Utc>,
    /// Last movement or interaction observed during the session.
    pub last_activity_time: DateTime<Utc>,
    /// `false` once the session has been ended.
    pub is_active: bool,
    /// Set when the session ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Whether the one-per-session long-session XP bonus has been granted.
    #[serde(default)]
    pub long_session_bonus_granted: bool,
}

impl Session {
    /// Milliseconds between the session start and `now` (or the end time,
    /// once ended). Never negative.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        let until = self.end_time.unwrap_or(now);
        u64::try_from(until.signed_duration_since(self.start_time).num_milliseconds())
            .unwrap_or(0)
    }
}

/// Cumulative player statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PlayerStats {
    /// Total XP ever granted.
    pub total_xp: u64,
    /// Level derived from `total_xp`; starts at 1.
    pub level: u32,
    /// Sum of the durations of all ended sessions, in milliseconds.
    pub total_session_time: u64,
    /// Number of distinct parcels visited.
    pub total_parcels_visited: u64,
    /// Number of distinct districts visited.
    pub total_districts_visited: u64,
}

impl Default for PlayerStats {
    fn default() -> Self {
        Self {
            total_xp: 0,
            level: 1,
            total_session_time: 0,
            total_parcels_visited: 0,
            total_districts_visited: 0,
        }
    }
}

/// Unlock record for a single achievement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct AchievementRecord {
    /// When the achievement unlocked.
    pub unlocked_at: DateTime<Utc>,
    /// Cleared only by explicit acknowledgment from the HUD.
    pub is_new: bool,
}

/// The single canonical player state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerState {
    /// Connected wallet, if any.
    pub wallet_address: Option<WalletAddress>,
    /// Last reported avatar position.
    pub position: Position,
    /// Parcel the avatar is standing in.
    pub current_parcel: Option<ParcelCoord>,
    /// District the avatar is standing in.
    pub current_district: Option<String>,
    /// Every parcel ever visited, keyed by coordinate.
    pub parcels_visited: BTreeMap<ParcelCoord, ParcelVisit>,
    /// Every district ever visited, keyed by id.
    pub districts_visited: BTreeMap<String, DistrictVisit>,
    /// Current (or most recently ended) session.
    pub session: Option<Session>,
    /// Cumulative statistics.
    pub stats: PlayerStats,
    /// Unlocked achievements keyed by achievement id.
    pub achievements: BTreeMap<String, AchievementRecord>,
}

impl PlayerState {
    /// The session, but only while it is active.
    pub fn active_session(&self) -> Option<&Session> {
        self.session.as_ref().filter(|s| s.is_active)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parcel_coord_string_roundtrip() {
        let coord = ParcelCoord::new(-3, 17);
        assert_eq!(coord.to_string(), "-3,17");
        assert_eq!("-3,17".parse::<ParcelCoord>().unwrap(), coord);
        assert_eq!(" 4 , 5 ".parse::<ParcelCoord>().unwrap(), ParcelCoord::new(4, 5));
    }

    #[test]
    fn parcel_coord_rejects_garbage() {
        assert!("4".parse::<ParcelCoord>().is_err());
        assert!("a,b".parse::<ParcelCoord>().is_err());
        assert!("1,2,3".parse::<ParcelCoord>().is_err());
    }

    #[test]
    fn stats_default_to_level_one() {
        let stats = PlayerStats::default();
        assert_eq!(stats.level, 1);
        assert_eq!(stats.total_xp, 0);
    }

    #[test]
    fn session_elapsed_uses_end_time_once_ended() {
        let start = Utc::now();
        let mut session = Session {
            session_id: SessionId::new(),
            wallet_address: WalletAddress::parse("0xabc").unwrap(),
            start_time: start,
            last_activity_time: start,
            is_active: true,
            end_time: None,
            long_session_bonus_granted: false,
        };
        let later = start + chrono::Duration::seconds(90);
        assert_eq!(session.elapsed_ms(later), 90_000);

        session.end_time = Some(start + chrono::Duration::seconds(30));
        assert_eq!(session.elapsed_ms(later), 30_000);
        // A clock that went backwards never yields a negative duration.
        session.end_time = None;
        assert_eq!(session.elapsed_ms(start - chrono::Duration::seconds(5)), 0);
    }
}
