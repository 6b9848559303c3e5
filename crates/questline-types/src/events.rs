//! The closed set of events that flow over the progression bus.
//!
//! [`WorldEvent`] is an immutable envelope (id, timestamp, optional session
//! and wallet) around an [`EventPayload`]. On the wire the payload is
//! flattened into the envelope and discriminated by a `type` field:
//!
//! ```json
//! { "id": "...", "timestamp": "...", "walletAddress": "0xabc",
//!   "type": "PARCEL_ENTERED", "x": 3, "z": -1, "isFirstVisit": true }
//! ```
//!
//! Anything arriving from outside the process (analytics replay, auth
//! payloads) goes through [`WorldEvent::from_json`] or
//! [`AnalyticsBatch::from_json`], which reject unknown discriminators and
//! semantically invalid payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::achievements::AchievementCategory;
use crate::error::EventError;
use crate::ids::{EventId, SessionId, WalletAddress};
use crate::score::AirdropScore;
use crate::state::Position;

// ---------------------------------------------------------------------------
// Discriminator
// ---------------------------------------------------------------------------

/// Discriminator of an [`EventPayload`]; handlers subscribe by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum EventKind {
    /// Avatar position changed.
    PlayerMoved,
    /// Avatar crossed into a parcel.
    ParcelEntered,
    /// Avatar crossed into a district.
    DistrictEntered,
    /// A parcel or district was visited for the first time.
    AreaDiscovered,
    /// A session began.
    SessionStarted,
    /// A session ended.
    SessionEnded,
    /// The auth layer connected a wallet.
    UserLoggedIn,
    /// The auth layer disconnected the wallet.
    UserLoggedOut,
    /// The dialogue system finished an interaction.
    InteractionCompleted,
    /// The creator terminal ran a command.
    CreatorTerminalUsed,
    /// An on-chain profile was created.
    ProfileCreated,
    /// A chat message was sent.
    MessageSent,
    /// XP was granted.
    XpGained,
    /// An XP request was reduced or denied by the per-minute cap.
    XpCapReached,
    /// Total XP crossed a level boundary.
    LevelUp,
    /// An achievement unlocked.
    AchievementUnlocked,
    /// A fresh airdrop score was computed.
    AirdropScoreUpdated,
    /// The world finished loading.
    WorldLoaded,
    /// Gameplay began.
    GameplayStarted,
    /// Periodic gameplay heartbeat.
    GameplayTick,
}

impl EventKind {
    /// Wire name of the discriminator.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlayerMoved => "PLAYER_MOVED",
            Self::ParcelEntered => "PARCEL_ENTERED",
            Self::DistrictEntered => "DISTRICT_ENTERED",
            Self::AreaDiscovered => "AREA_DISCOVERED",
            Self::SessionStarted => "SESSION_STARTED",
            Self::SessionEnded => "SESSION_ENDED",
            Self::UserLoggedIn => "USER_LOGGED_IN",
            Self::UserLoggedOut => "USER_LOGGED_OUT",
            Self::InteractionCompleted => "INTERACTION_COMPLETED",
            Self::CreatorTerminalUsed => "CREATOR_TERMINAL_USED",
            Self::ProfileCreated => "PROFILE_CREATED",
            Self::MessageSent => "MESSAGE_SENT",
            Self::XpGained => "XP_GAINED",
            Self::XpCapReached => "XP_CAP_REACHED",
            Self::LevelUp => "LEVEL_UP",
            Self::AchievementUnlocked => "ACHIEVEMENT_UNLOCKED",
            Self::AirdropScoreUpdated => "AIRDROP_SCORE_UPDATED",
            Self::WorldLoaded => "WORLD_LOADED",
            Self::GameplayStarted => "GAMEPLAY_STARTED",
            Self::GameplayTick => "GAMEPLAY_TICK",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payload enums
// ---------------------------------------------------------------------------

/// Which system produced an XP grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum XpSource {
    /// First visit to a parcel.
    ParcelDiscovery,
    /// First visit to a district.
    DistrictDiscovery,
    /// A completed interaction.
    Interaction,
    /// Periodic bonus for time in session.
    SessionTime,
    /// One-off bonus for a long session.
    LongSession,
    /// Achievement unlock bonus.
    Achievement,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SessionEndReason {
    /// The user logged out.
    Logout,
    /// The wallet disconnected.
    WalletDisconnect,
    /// A different wallet connected while a session was active.
    WalletSwitch,
    /// The page was unloaded or hidden.
    TabClose,
    /// No activity within the idle timeout.
    Inactivity,
    /// Ended explicitly by the host.
    Manual,
}

/// A newly discovered area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum DiscoveredArea {
    /// A parcel.
    Parcel {
        /// Parcel column.
        x: i32,
        /// Parcel row.
        z: i32,
    },
    /// A district.
    District {
        /// District identifier.
        id: String,
    },
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// Payload of [`EventKind::PlayerMoved`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PlayerMoved {
    /// New avatar position.
    pub position: Position,
}

/// Payload of [`EventKind::ParcelEntered`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ParcelEntered {
    /// Parcel column.
    pub x: i32,
    /// Parcel row.
    pub z: i32,
    /// Authoritative first-visit flag computed by the movement system.
    pub is_first_visit: bool,
}

/// Payload of [`EventKind::DistrictEntered`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct DistrictEntered {
    /// District identifier.
    pub district_id: String,
    /// Display name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district_name: Option<String>,
    /// Authoritative first-visit flag computed by the movement system.
    pub is_first_visit: bool,
}

/// Payload of [`EventKind::AreaDiscovered`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct AreaDiscovered {
    /// What was discovered.
    pub area: DiscoveredArea,
    /// First-visit XP from the rules table, for the HUD toast.
    pub xp_hint: u64,
}

/// Payload of [`EventKind::SessionStarted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SessionStarted {
    /// The new session.
    pub session_id: SessionId,
}

/// Payload of [`EventKind::SessionEnded`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SessionEnded {
    /// The session that ended.
    pub session_id: SessionId,
    /// Why it ended.
    pub reason: SessionEndReason,
    /// Session length in milliseconds.
    pub duration_ms: u64,
    /// Distinct parcels entered during the session.
    #[serde(default)]
    pub parcels_visited: u64,
    /// Distinct districts entered during the session.
    #[serde(default)]
    pub districts_visited: u64,
}

/// Payload of [`EventKind::UserLoggedIn`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct UserLoggedIn {
    /// The connected wallet. Serialized as `wallet`, since the envelope
    /// already owns `walletAddress`.
    pub wallet: WalletAddress,
    /// Whether the auth layer is connected to mainnet.
    pub is_mainnet: bool,
    /// Whether the wallet already owns an on-chain profile.
    #[serde(default)]
    pub has_mainnet_profile: bool,
    /// Whether the wallet is enrolled in the beta program.
    #[serde(default)]
    pub is_beta_user: bool,
}

/// Payload of [`EventKind::InteractionCompleted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct InteractionCompleted {
    /// Free-form interaction type, e.g. `npc_dialogue`.
    pub interaction_type: String,
    /// What was interacted with, if relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

/// Payload of [`EventKind::CreatorTerminalUsed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct CreatorTerminalUsed {
    /// The command that ran, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Payload of [`EventKind::MessageSent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct MessageSent {
    /// Chat channel, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Payload of [`EventKind::XpGained`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct XpGained {
    /// XP actually granted.
    pub amount: u64,
    /// Where it came from.
    pub source: XpSource,
    /// Total XP after the grant.
    pub total_xp: u64,
    /// Level after the grant.
    pub level: u32,
}

/// Payload of [`EventKind::XpCapReached`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct XpCapReached {
    /// Source of the reduced request.
    pub source: XpSource,
    /// Amount requested after the multiplier.
    pub requested: u64,
    /// Amount actually granted.
    pub granted: u64,
    /// Amount denied (`requested - granted`).
    pub capped_amount: u64,
    /// The configured per-minute cap.
    pub max_xp_per_minute: u64,
}

/// Payload of [`EventKind::LevelUp`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct LevelUp {
    /// Level before the grant.
    pub previous_level: u32,
    /// Level after the grant.
    pub level: u32,
    /// Total XP after the grant.
    pub total_xp: u64,
}

/// Payload of [`EventKind::AchievementUnlocked`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct AchievementUnlocked {
    /// Catalog id.
    pub achievement_id: String,
    /// Display name.
    pub name: String,
    /// Badge grouping.
    pub category: AchievementCategory,
    /// Bonus XP attached to the achievement.
    pub xp_bonus: u64,
}

/// Payload of [`EventKind::GameplayTick`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct GameplayTick {
    /// Milliseconds since the session started.
    pub elapsed_ms: u64,
}

// ---------------------------------------------------------------------------
// Payload sum type and envelope
// ---------------------------------------------------------------------------

/// Closed sum type of every event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum EventPayload {
    /// See [`PlayerMoved`].
    PlayerMoved(PlayerMoved),
    /// See [`ParcelEntered`].
    ParcelEntered(ParcelEntered),
    /// See [`DistrictEntered`].
    DistrictEntered(DistrictEntered),
    /// See [`AreaDiscovered`].
    AreaDiscovered(AreaDiscovered),
    /// See [`SessionStarted`].
    SessionStarted(SessionStarted),
    /// See [`SessionEnded`].
    SessionEnded(SessionEnded),
    /// See [`UserLoggedIn`].
    UserLoggedIn(UserLoggedIn),
    /// The wallet disconnected.
    UserLoggedOut,
    /// See [`InteractionCompleted`].
    InteractionCompleted(InteractionCompleted),
    /// See [`CreatorTerminalUsed`].
    CreatorTerminalUsed(CreatorTerminalUsed),
    /// An on-chain profile was created for the wallet.
    ProfileCreated,
    /// See [`MessageSent`].
    MessageSent(MessageSent),
    /// See [`XpGained`].
    XpGained(XpGained),
    /// See [`XpCapReached`].
    XpCapReached(XpCapReached),
    /// See [`LevelUp`].
    LevelUp(LevelUp),
    /// See [`AchievementUnlocked`].
    AchievementUnlocked(AchievementUnlocked),
    /// A freshly computed [`AirdropScore`].
    AirdropScoreUpdated(Box<AirdropScore>),
    /// The world finished loading.
    WorldLoaded,
    /// Gameplay began.
    GameplayStarted,
    /// See [`GameplayTick`].
    GameplayTick(GameplayTick),
}

impl EventPayload {
    /// The discriminator of this payload.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::PlayerMoved(_) => EventKind::PlayerMoved,
            Self::ParcelEntered(_) => EventKind::ParcelEntered,
            Self::DistrictEntered(_) => EventKind::DistrictEntered,
            Self::AreaDiscovered(_) => EventKind::AreaDiscovered,
            Self::SessionStarted(_) => EventKind::SessionStarted,
            Self::SessionEnded(_) => EventKind::SessionEnded,
            Self::UserLoggedIn(_) => EventKind::UserLoggedIn,
            Self::UserLoggedOut => EventKind::UserLoggedOut,
            Self::InteractionCompleted(_) => EventKind::InteractionCompleted,
            Self::CreatorTerminalUsed(_) => EventKind::CreatorTerminalUsed,
            Self::ProfileCreated => EventKind::ProfileCreated,
            Self::MessageSent(_) => EventKind::MessageSent,
            Self::XpGained(_) => EventKind::XpGained,
            Self::XpCapReached(_) => EventKind::XpCapReached,
            Self::LevelUp(_) => EventKind::LevelUp,
            Self::AchievementUnlocked(_) => EventKind::AchievementUnlocked,
            Self::AirdropScoreUpdated(_) => EventKind::AirdropScoreUpdated,
            Self::WorldLoaded => EventKind::WorldLoaded,
            Self::GameplayStarted => EventKind::GameplayStarted,
            Self::GameplayTick(_) => EventKind::GameplayTick,
        }
    }
}

/// Immutable, timestamped event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldEvent {
    /// Unique event id.
    pub id: EventId,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Session the event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Wallet the event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<WalletAddress>,
    /// Type-specific payload, flattened into the envelope on the wire.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl WorldEvent {
    /// Create an event with a fresh id and no session or wallet.
    pub fn new(payload: EventPayload, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            timestamp,
            session_id: None,
            wallet_address: None,
            payload,
        }
    }

    /// Attach a wallet address.
    #[must_use]
    pub fn with_wallet(mut self, wallet: Option<WalletAddress>) -> Self {
        self.wallet_address = wallet;
        self
    }

    /// Attach a session id.
    #[must_use]
    pub const fn with_session(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    /// The discriminator of the payload.
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Check semantic constraints the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Invalid`] describing the first violation found.
    pub fn validate(&self) -> Result<(), EventError> {
        let invalid = |reason: &str| EventError::Invalid {
            kind: self.kind(),
            reason: reason.to_owned(),
        };
        match &self.payload {
            EventPayload::DistrictEntered(p) if p.district_id.trim().is_empty() => {
                Err(invalid("district id is empty"))
            }
            EventPayload::AreaDiscovered(AreaDiscovered {
                area: DiscoveredArea::District { id },
                ..
            }) if id.trim().is_empty() => Err(invalid("district id is empty")),
            EventPayload::InteractionCompleted(p) if p.interaction_type.trim().is_empty() => {
                Err(invalid("interaction type is empty"))
            }
            EventPayload::PlayerMoved(p)
                if !(p.position.x.is_finite()
                    && p.position.y.is_finite()
                    && p.position.z.is_finite()) =>
            {
                Err(invalid("position is not finite"))
            }
            EventPayload::XpCapReached(p)
                if p.granted.checked_add(p.capped_amount) != Some(p.requested) =>
            {
                Err(invalid("granted + capped_amount must equal requested"))
            }
            EventPayload::LevelUp(p) if p.level <= p.previous_level => {
                Err(invalid("level must increase"))
            }
            _ => Ok(()),
        }
    }

    /// Parse and validate a single event received from outside the process.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Malformed`] for invalid JSON or an unknown
    /// `type`, and [`EventError::Invalid`] for semantic violations.
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        let event: Self = serde_json::from_str(json)?;
        event.validate()?;
        Ok(event)
    }
}

/// The body of an analytics POST: `{ "events": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsBatch {
    /// Buffered events in emission order.
    pub events: Vec<WorldEvent>,
}

impl AnalyticsBatch {
    /// Parse and validate a recorded batch.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Malformed`] if the document does not parse, or
    /// [`EventError::InBatch`] naming the first event that fails validation.
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        let batch: Self = serde_json::from_str(json)?;
        for (index, event) in batch.events.iter().enumerate() {
            event.validate().map_err(|e| EventError::InBatch {
                index,
                source: Box::new(e),
            })?;
        }
        Ok(batch)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn wallet() -> WalletAddress {
        WalletAddress::parse("0xfeed").unwrap()
    }

    #[test]
    fn envelope_flattens_payload_with_type_tag() {
        let event = WorldEvent::new(
            EventPayload::ParcelEntered(ParcelEntered {
                x: 3,
                z: -1,
                is_first_visit: true,
            }),
            Utc::now(),
        )
        .with_wallet(Some(wallet()));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PARCEL_ENTERED");
        assert_eq!(json["x"], 3);
        assert_eq!(json["isFirstVisit"], true);
        assert_eq!(json["walletAddress"], "0xfeed");
        assert!(json.get("sessionId").is_none());

        let back = WorldEvent::from_json(&json.to_string()).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.kind(), EventKind::ParcelEntered);
    }

    #[test]
    fn unit_payloads_parse() {
        let json = format!(
            r#"{{"id":"{}","timestamp":"2026-01-01T00:00:00Z","type":"PROFILE_CREATED"}}"#,
            EventId::new()
        );
        let event = WorldEvent::from_json(&json).unwrap();
        assert_eq!(event.kind(), EventKind::ProfileCreated);
    }

    #[test]
    fn unknown_discriminator_fails_loudly() {
        let json = format!(
            r#"{{"id":"{}","timestamp":"2026-01-01T00:00:00Z","type":"TELEPORTED","x":1}}"#,
            EventId::new()
        );
        let err = WorldEvent::from_json(&json).unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }

    #[test]
    fn empty_interaction_type_is_rejected() {
        let event = WorldEvent::new(
            EventPayload::InteractionCompleted(InteractionCompleted {
                interaction_type: "  ".to_owned(),
                target_id: None,
            }),
            Utc::now(),
        );
        let json = serde_json::to_string(&event).unwrap();
        let err = WorldEvent::from_json(&json).unwrap_err();
        assert!(matches!(
            err,
            EventError::Invalid {
                kind: EventKind::InteractionCompleted,
                ..
            }
        ));
    }

    #[test]
    fn invalid_wallet_in_envelope_is_rejected() {
        let json = format!(
            r#"{{"id":"{}","timestamp":"2026-01-01T00:00:00Z","walletAddress":"","type":"WORLD_LOADED"}}"#,
            EventId::new()
        );
        assert!(WorldEvent::from_json(&json).is_err());
    }

    #[test]
    fn batch_reports_offending_index() {
        let good = WorldEvent::new(EventPayload::WorldLoaded, Utc::now());
        let bad = WorldEvent::new(
            EventPayload::DistrictEntered(DistrictEntered {
                district_id: String::new(),
                district_name: None,
                is_first_visit: true,
            }),
            Utc::now(),
        );
        let batch = AnalyticsBatch {
            events: vec![good, bad],
        };
        let json = serde_json::to_string(&batch).unwrap();
        let err = AnalyticsBatch::from_json(&json).unwrap_err();
        assert!(matches!(err, EventError::InBatch { index: 1, .. }));
    }

    #[test]
    fn kind_wire_names_match_serde() {
        for kind in [
            EventKind::XpGained,
            EventKind::XpCapReached,
            EventKind::AirdropScoreUpdated,
            EventKind::UserLoggedOut,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }
}
