//! Catalog-driven, idempotent achievement unlocking.
//!
//! Each relevant event narrows the catalog to definitions whose condition
//! kind the event can affect, then re-checks every candidate's full
//! condition against the store before unlocking. Unlocking goes through the
//! store, which refuses a second unlock of the same id, so re-delivered
//! events never award a bonus twice.
//!
//! Interaction and chat tallies live on the engine and start from zero on
//! every [`AchievementEngine::start`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use questline_bus::{EventBus, HandlerResult};
use questline_state::PlayerStateStore;
use questline_types::{
    AchievementCondition, AchievementDefinition, AchievementUnlocked, ConditionKind, EventKind,
    EventPayload, WalletAddress, WorldEvent, XpSource,
};
use tracing::{debug, info};

use crate::catalog::{self, CATALOG, CREATOR_TERMINAL_INTERACTION};
use crate::clock::Clock;
use crate::config::AchievementConfig;
use crate::wiring::{Subscriptions, subscribe};
use crate::xp::XpGrantor;

const MS_PER_MINUTE: u64 = 60_000;

/// Every kind the engine listens to.
const SUBSCRIBED_KINDS: [EventKind; 9] = [
    EventKind::ParcelEntered,
    EventKind::DistrictEntered,
    EventKind::SessionStarted,
    EventKind::SessionEnded,
    EventKind::GameplayTick,
    EventKind::InteractionCompleted,
    EventKind::CreatorTerminalUsed,
    EventKind::ProfileCreated,
    EventKind::MessageSent,
];

/// Condition kinds an event can move towards satisfaction.
const fn affected_conditions(payload: &EventPayload) -> &'static [ConditionKind] {
    match payload {
        EventPayload::ParcelEntered(_) => &[ConditionKind::ParcelCount],
        EventPayload::DistrictEntered(_) => &[
            ConditionKind::DistrictCount,
            ConditionKind::AllDistricts,
            ConditionKind::LandmarkVisit,
        ],
        EventPayload::SessionStarted(_) => &[ConditionKind::FirstSession],
        EventPayload::SessionEnded(_) | EventPayload::GameplayTick(_) => {
            &[ConditionKind::SessionTime]
        }
        EventPayload::InteractionCompleted(_) => &[
            ConditionKind::InteractionCount,
            ConditionKind::InteractionType,
        ],
        EventPayload::CreatorTerminalUsed(_) => &[ConditionKind::InteractionType],
        EventPayload::ProfileCreated => &[ConditionKind::ProfileExists],
        EventPayload::MessageSent(_) => &[ConditionKind::MessageSent],
        _ => &[],
    }
}

#[derive(Debug, Default)]
struct Tallies {
    interactions: u64,
    by_type: HashMap<String, u64>,
    messages: u64,
}

impl Tallies {
    fn record_interaction(&mut self, interaction_type: &str, counts_as_interaction: bool) {
        if counts_as_interaction {
            self.interactions = self.interactions.saturating_add(1);
        }
        let entry = self.by_type.entry(interaction_type.to_owned()).or_default();
        *entry = entry.saturating_add(1);
    }

    fn of_type(&self, interaction_type: &str) -> u64 {
        self.by_type.get(interaction_type).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct AchievementRuntime {
    wallet: Option<WalletAddress>,
    is_mainnet: bool,
    has_profile: bool,
    tallies: Tallies,
}

/// Unlocks catalog achievements for the started wallet.
#[derive(Debug)]
pub struct AchievementEngine {
    catalog: &'static [AchievementDefinition],
    config: AchievementConfig,
    store: Arc<PlayerStateStore>,
    bus: EventBus,
    grantor: Arc<XpGrantor>,
    clock: Arc<dyn Clock>,
    runtime: Mutex<AchievementRuntime>,
    subscriptions: Subscriptions,
}

impl AchievementEngine {
    /// Create a stopped engine over the built-in catalog.
    pub fn new(
        store: Arc<PlayerStateStore>,
        bus: EventBus,
        grantor: Arc<XpGrantor>,
        config: AchievementConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog: CATALOG,
            config,
            store,
            bus,
            grantor,
            clock,
            runtime: Mutex::new(AchievementRuntime::default()),
            subscriptions: Subscriptions::default(),
        }
    }

    /// Replace the catalog.
    #[must_use]
    pub const fn with_catalog(mut self, catalog: &'static [AchievementDefinition]) -> Self {
        self.catalog = catalog;
        self
    }

    fn lock(&self) -> MutexGuard<'_, AchievementRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The catalog in use.
    pub const fn definitions(&self) -> &'static [AchievementDefinition] {
        self.catalog
    }

    /// Whether the engine is started.
    pub fn is_running(&self) -> bool {
        self.lock().wallet.is_some()
    }

    /// Start unlocking for `wallet`.
    ///
    /// Tallies start from zero. The whole catalog is evaluated once against
    /// the current state, so milestones reached before a reload unlock
    /// without waiting for a new event. Returns the ids unlocked by that
    /// catch-up pass.
    pub async fn start(
        self: &Arc<Self>,
        wallet: WalletAddress,
        is_mainnet: bool,
        has_profile: bool,
    ) -> Vec<&'static str> {
        if self.is_running() {
            self.stop();
        }
        {
            let mut runtime = self.lock();
            runtime.wallet = Some(wallet.clone());
            runtime.is_mainnet = is_mainnet;
            runtime.has_profile = has_profile;
            runtime.tallies = Tallies::default();
        }
        for kind in SUBSCRIBED_KINDS {
            self.subscriptions.push(subscribe(
                &self.bus,
                kind,
                self,
                |engine, event| async move { engine.on_event(&event).await },
            ));
        }
        info!(wallet = %wallet, is_mainnet, "achievement engine started");

        let all: Vec<ConditionKind> = self.catalog.iter().map(|d| d.condition.kind()).collect();
        let unlocked = self.evaluate(&wallet, &all).await;
        if !unlocked.is_empty() {
            info!(wallet = %wallet, count = unlocked.len(), "catch-up unlocks");
        }
        unlocked
    }

    /// Stop unlocking and forget the tallies.
    pub fn stop(&self) {
        self.subscriptions.release();
        let previous = std::mem::take(&mut *self.lock());
        if let Some(wallet) = previous.wallet {
            info!(wallet = %wallet, "achievement engine stopped");
        }
    }

    /// Clear the `is_new` flag of one achievement.
    pub fn acknowledge(&self, achievement_id: &str) -> bool {
        self.store.acknowledge_achievement(achievement_id)
    }

    /// Clear every `is_new` flag.
    pub fn acknowledge_all(&self) -> usize {
        self.store.acknowledge_all_achievements()
    }

    async fn on_event(&self, event: &WorldEvent) -> HandlerResult {
        let Some(wallet) = self.lock().wallet.clone() else {
            return Ok(());
        };
        if event.wallet_address.as_ref().is_some_and(|w| w != &wallet) {
            return Ok(());
        }

        {
            let mut runtime = self.lock();
            match &event.payload {
                EventPayload::InteractionCompleted(p) => {
                    runtime.tallies.record_interaction(&p.interaction_type, true);
                }
                EventPayload::CreatorTerminalUsed(_) => {
                    runtime
                        .tallies
                        .record_interaction(CREATOR_TERMINAL_INTERACTION, false);
                }
                EventPayload::MessageSent(_) => {
                    runtime.tallies.messages = runtime.tallies.messages.saturating_add(1);
                }
                EventPayload::ProfileCreated => runtime.has_profile = true,
                _ => {}
            }
        }

        self.evaluate(&wallet, affected_conditions(&event.payload))
            .await;
        Ok(())
    }

    /// Unlock every eligible, not-yet-unlocked definition of `kinds` whose
    /// condition holds. Returns the ids unlocked.
    async fn evaluate(&self, wallet: &WalletAddress, kinds: &[ConditionKind]) -> Vec<&'static str> {
        if kinds.is_empty() {
            return Vec::new();
        }
        let is_mainnet = self.lock().is_mainnet;
        let candidates: Vec<&'static AchievementDefinition> =
            catalog::with_condition_kinds(self.catalog, kinds)
                .filter(|def| is_mainnet || !def.mainnet_only)
                .filter(|def| !self.store.has_achievement(def.id))
                .collect();

        let mut unlocked = Vec::new();
        for def in candidates {
            if self.is_satisfied(def) && self.unlock(wallet, def).await {
                unlocked.push(def.id);
            }
        }
        unlocked
    }

    /// Check the full condition against authoritative state.
    ///
    /// Anything that cannot be established (no session, an empty district
    /// list) counts as not satisfied.
    fn is_satisfied(&self, def: &AchievementDefinition) -> bool {
        match def.condition {
            AchievementCondition::ParcelCount { count } => {
                self.store.parcels_visited_count() >= count
            }
            AchievementCondition::DistrictCount { count } => {
                self.store.districts_visited_count() >= count
            }
            AchievementCondition::AllDistricts => {
                let districts = &self.config.districts;
                let total = u64::try_from(districts.len()).unwrap_or(u64::MAX);
                total > 0 && self.store.count_visited_districts(districts) >= total
            }
            AchievementCondition::LandmarkVisit { count } => {
                !self.config.landmarks.is_empty()
                    && self.store.count_visited_districts(&self.config.landmarks) >= count
            }
            AchievementCondition::SessionTime { minutes } => {
                let now = self.clock.now();
                self.store
                    .session()
                    .is_some_and(|s| s.elapsed_ms(now) / MS_PER_MINUTE >= minutes)
            }
            AchievementCondition::FirstSession => self.store.session().is_some(),
            AchievementCondition::InteractionCount { count } => {
                self.lock().tallies.interactions >= count
            }
            AchievementCondition::InteractionType {
                interaction_type,
                count,
            } => self.lock().tallies.of_type(interaction_type) >= count,
            AchievementCondition::ProfileExists => self.lock().has_profile,
            AchievementCondition::MessageSent { count } => self.lock().tallies.messages >= count,
        }
    }

    async fn unlock(&self, wallet: &WalletAddress, def: &AchievementDefinition) -> bool {
        let now = self.clock.now();
        if !self.store.unlock_achievement(def.id, now) {
            debug!(achievement = def.id, "already unlocked");
            return false;
        }
        info!(wallet = %wallet, achievement = def.id, xp_bonus = def.xp_bonus, "achievement unlocked");

        let session_id = self.store.active_session().map(|s| s.session_id);
        self.bus
            .emit(
                WorldEvent::new(
                    EventPayload::AchievementUnlocked(AchievementUnlocked {
                        achievement_id: def.id.to_owned(),
                        name: def.name.to_owned(),
                        category: def.category,
                        xp_bonus: def.xp_bonus,
                    }),
                    now,
                )
                .with_wallet(Some(wallet.clone()))
                .with_session(session_id),
            )
            .await;

        if def.xp_bonus > 0 {
            self.grantor
                .grant(wallet, def.xp_bonus, XpSource::Achievement)
                .await;
        }
        true
    }
}
