//! The static achievement catalog.
//!
//! Definitions are compiled in. District lists referenced by
//! `AllDistricts` and `LandmarkVisit` conditions come from
//! [`AchievementConfig`](crate::config::AchievementConfig) so they can track
//! the world map without a rebuild.

use questline_types::{
    AchievementCategory, AchievementCondition, AchievementDefinition, ConditionKind,
};

/// Interaction type reported for creator terminal commands.
pub const CREATOR_TERMINAL_INTERACTION: &str = "creator_terminal";

/// Every achievement, in display order.
pub static CATALOG: &[AchievementDefinition] = &[
    AchievementDefinition {
        id: "FIRST_STEPS",
        name: "First Steps",
        description: "Start your first session.",
        category: AchievementCategory::Session,
        xp_bonus: 10,
        condition: AchievementCondition::FirstSession,
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "PIONEER_I",
        name: "Pioneer I",
        description: "Visit 10 parcels.",
        category: AchievementCategory::Exploration,
        xp_bonus: 10,
        condition: AchievementCondition::ParcelCount { count: 10 },
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "PIONEER_II",
        name: "Pioneer II",
        description: "Visit 50 parcels.",
        category: AchievementCategory::Exploration,
        xp_bonus: 50,
        condition: AchievementCondition::ParcelCount { count: 50 },
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "PIONEER_III",
        name: "Pioneer III",
        description: "Visit 250 parcels.",
        category: AchievementCategory::Exploration,
        xp_bonus: 150,
        condition: AchievementCondition::ParcelCount { count: 250 },
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "MAINNET_SURVEYOR",
        name: "Mainnet Surveyor",
        description: "Visit 25 parcels on mainnet.",
        category: AchievementCategory::Exploration,
        xp_bonus: 75,
        condition: AchievementCondition::ParcelCount { count: 25 },
        mainnet_only: true,
    },
    AchievementDefinition {
        id: "DISTRICT_HOPPER",
        name: "District Hopper",
        description: "Visit 3 districts.",
        category: AchievementCategory::Exploration,
        xp_bonus: 30,
        condition: AchievementCondition::DistrictCount { count: 3 },
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "CARTOGRAPHER",
        name: "Cartographer",
        description: "Visit every district.",
        category: AchievementCategory::Exploration,
        xp_bonus: 200,
        condition: AchievementCondition::AllDistricts,
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "SIGHTSEER",
        name: "Sightseer",
        description: "Visit 3 landmark districts.",
        category: AchievementCategory::Exploration,
        xp_bonus: 60,
        condition: AchievementCondition::LandmarkVisit { count: 3 },
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "MARATHON",
        name: "Marathon",
        description: "Stay for 60 minutes in one session.",
        category: AchievementCategory::Session,
        xp_bonus: 50,
        condition: AchievementCondition::SessionTime { minutes: 60 },
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "SOCIALITE",
        name: "Socialite",
        description: "Complete 10 interactions.",
        category: AchievementCategory::Social,
        xp_bonus: 25,
        condition: AchievementCondition::InteractionCount { count: 10 },
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "STORYTELLER",
        name: "Storyteller",
        description: "Hold 5 conversations with NPCs.",
        category: AchievementCategory::Social,
        xp_bonus: 25,
        condition: AchievementCondition::InteractionType {
            interaction_type: "npc_dialogue",
            count: 5,
        },
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "CHATTERBOX",
        name: "Chatterbox",
        description: "Send 10 chat messages.",
        category: AchievementCategory::Social,
        xp_bonus: 20,
        condition: AchievementCondition::MessageSent { count: 10 },
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "TINKERER",
        name: "Tinkerer",
        description: "Run 3 creator terminal commands.",
        category: AchievementCategory::Creator,
        xp_bonus: 40,
        condition: AchievementCondition::InteractionType {
            interaction_type: CREATOR_TERMINAL_INTERACTION,
            count: 3,
        },
        mainnet_only: false,
    },
    AchievementDefinition {
        id: "ON_CHAIN",
        name: "On Chain",
        description: "Own an on-chain profile.",
        category: AchievementCategory::Identity,
        xp_bonus: 50,
        condition: AchievementCondition::ProfileExists,
        mainnet_only: true,
    },
];

/// Look up a definition by id.
pub fn find(id: &str) -> Option<&'static AchievementDefinition> {
    CATALOG.iter().find(|def| def.id == id)
}

/// Definitions whose condition belongs to one of `kinds`.
pub fn with_condition_kinds<'a>(
    catalog: &'static [AchievementDefinition],
    kinds: &'a [ConditionKind],
) -> impl Iterator<Item = &'static AchievementDefinition> + 'a {
    catalog
        .iter()
        .filter(move |def| kinds.contains(&def.condition.kind()))
}
