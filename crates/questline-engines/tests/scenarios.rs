//! End-to-end progression scenarios through the [`Progression`] facade.
//!
//! Every test drives time with a [`ManualClock`], so rate-limit windows and
//! session durations are exact.

#![allow(clippy::unwrap_used, clippy::unreachable, clippy::arithmetic_side_effects)]

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use futures::FutureExt;
use questline_bus::EventBus;
use questline_engines::{
    Clock, LifecycleConfig, LifecyclePhase, ManualClock, Progression, ProgressionConfig, XpConfig,
};
use questline_state::{MemoryStorage, PlayerStateStore};
use questline_types::{
    EventKind, EventPayload, InteractionCompleted, ParcelEntered, SessionEndReason, UserLoggedIn,
    WalletAddress, WorldEvent,
};

struct Harness {
    progression: Arc<Progression>,
    clock: Arc<ManualClock>,
    wallet: WalletAddress,
    seen: Arc<Mutex<Vec<WorldEvent>>>,
}

impl Harness {
    fn new(config: ProgressionConfig) -> Self {
        Self::with_store(config, PlayerStateStore::in_memory())
    }

    fn with_store(config: ProgressionConfig, store: PlayerStateStore) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let bus = EventBus::default();
        let progression = Progression::new(config, bus.clone(), Arc::new(store), clock.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::XpCapReached,
            EventKind::AchievementUnlocked,
            EventKind::SessionStarted,
            EventKind::SessionEnded,
        ] {
            let sink = Arc::clone(&seen);
            bus.on(kind, move |event| {
                sink.lock().unwrap().push(WorldEvent::clone(&event));
                async { Ok(()) }.boxed()
            });
        }

        Self {
            progression,
            clock,
            wallet: WalletAddress::parse("0x7a3f00000000000000000000000000000000beef").unwrap(),
            seen,
        }
    }

    fn event(&self, payload: EventPayload) -> WorldEvent {
        WorldEvent::new(payload, self.clock.now()).with_wallet(Some(self.wallet.clone()))
    }

    async fn login(&self, is_mainnet: bool) {
        self.progression
            .emit(self.event(EventPayload::UserLoggedIn(UserLoggedIn {
                wallet: self.wallet.clone(),
                is_mainnet,
                has_mainnet_profile: false,
                is_beta_user: false,
            })))
            .await;
    }

    async fn logout(&self) {
        self.progression
            .emit(self.event(EventPayload::UserLoggedOut))
            .await;
    }

    async fn enter_parcel(&self, x: i32, z: i32, is_first_visit: bool) {
        self.progression
            .emit(self.event(EventPayload::ParcelEntered(ParcelEntered {
                x,
                z,
                is_first_visit,
            })))
            .await;
    }

    async fn interact(&self, interaction_type: &str) {
        self.progression
            .emit(self.event(EventPayload::InteractionCompleted(InteractionCompleted {
                interaction_type: interaction_type.to_owned(),
                target_id: None,
            })))
            .await;
    }

    fn total_xp(&self) -> u64 {
        self.progression.store().total_xp()
    }

    fn seen_of(&self, kind: EventKind) -> Vec<WorldEvent> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }

    fn unlocks_of(&self, achievement_id: &str) -> usize {
        self.seen_of(EventKind::AchievementUnlocked)
            .iter()
            .filter(|e| {
                matches!(&e.payload, EventPayload::AchievementUnlocked(u) if u.achievement_id == achievement_id)
            })
            .count()
    }
}

fn config_with_xp(xp: XpConfig) -> ProgressionConfig {
    ProgressionConfig {
        xp,
        ..ProgressionConfig::default()
    }
}

#[tokio::test]
async fn twelve_new_parcels_unlock_pioneer_once() {
    let h = Harness::new(config_with_xp(XpConfig {
        parcel_first_visit: 1,
        ..XpConfig::default()
    }));
    h.login(false).await;
    let before = h.total_xp();

    for x in 0..12 {
        h.enter_parcel(x, 0, true).await;
    }
    // Revisits change nothing.
    h.enter_parcel(9, 0, false).await;
    h.enter_parcel(3, 0, false).await;

    let store = h.progression.store();
    assert_eq!(store.stats().total_parcels_visited, 12);
    assert!(store.has_achievement("PIONEER_I"));
    assert_eq!(h.unlocks_of("PIONEER_I"), 1);
    assert_eq!(h.total_xp() - before, 12 + 10);
}

#[tokio::test]
async fn burst_over_the_cap_grants_exactly_the_cap() {
    let h = Harness::new(config_with_xp(XpConfig {
        max_xp_per_minute: 50,
        ..XpConfig::default()
    }));
    h.login(false).await;
    // Let the login bonus age out of the window.
    h.clock.advance(Duration::seconds(61));
    let before = h.total_xp();

    h.interact("quest_complete").await;
    h.clock.advance(Duration::seconds(4));
    h.interact("quest_complete").await;

    assert_eq!(h.total_xp() - before, 50);
    let caps = h.seen_of(EventKind::XpCapReached);
    assert_eq!(caps.len(), 1);
    let EventPayload::XpCapReached(cap) = &caps[0].payload else {
        unreachable!("filtered by kind");
    };
    assert_eq!(cap.requested, 40);
    assert_eq!(cap.granted, 10);
    assert_eq!(cap.capped_amount, 30);
}

#[tokio::test]
async fn grants_leave_the_window_after_sixty_seconds() {
    let h = Harness::new(config_with_xp(XpConfig {
        max_xp_per_minute: 50,
        ..XpConfig::default()
    }));
    h.login(false).await;
    // FIRST_STEPS (10) and the quest (40) fill the window at t=0.
    h.interact("quest_complete").await;
    let full = h.total_xp();

    h.clock.advance(Duration::seconds(30));
    h.interact("wave").await;
    assert_eq!(h.total_xp(), full);

    h.clock.advance(Duration::seconds(30));
    h.interact("wave").await;
    assert_eq!(h.total_xp(), full + 5);
}

#[tokio::test]
async fn consecutive_sessions_accumulate_time() {
    let h = Harness::new(ProgressionConfig::default());

    h.login(false).await;
    h.clock.advance(Duration::minutes(10));
    h.logout().await;
    assert!(h.progression.store().active_session().is_none());

    h.login(false).await;
    h.clock.advance(Duration::minutes(5));
    h.logout().await;

    let started = h.seen_of(EventKind::SessionStarted);
    assert_eq!(started.len(), 2);
    assert_ne!(started[0].session_id, started[1].session_id);
    assert_eq!(h.seen_of(EventKind::SessionEnded).len(), 2);

    let store = h.progression.store();
    assert_eq!(store.stats().total_session_time, 15 * 60_000);
    assert!(store.session().is_some_and(|s| !s.is_active));
}

#[tokio::test]
async fn mainnet_only_achievements_stay_locked_off_mainnet() {
    let h = Harness::new(ProgressionConfig::default());
    h.login(false).await;

    for x in 0..30 {
        h.enter_parcel(x, 1, true).await;
    }
    h.progression
        .emit(h.event(EventPayload::ProfileCreated))
        .await;

    let store = h.progression.store();
    assert!(store.has_achievement("PIONEER_I"));
    assert!(!store.has_achievement("MAINNET_SURVEYOR"));
    assert!(!store.has_achievement("ON_CHAIN"));
    assert_eq!(h.unlocks_of("MAINNET_SURVEYOR"), 0);
}

#[tokio::test]
async fn progress_survives_a_reload() {
    let storage = MemoryStorage::new();
    let config = config_with_xp(XpConfig {
        parcel_first_visit: 1,
        ..XpConfig::default()
    });

    let first = Harness::with_store(
        config.clone(),
        PlayerStateStore::open(Arc::new(storage.clone())),
    );
    first.login(false).await;
    for x in 0..10 {
        first.enter_parcel(x, 2, true).await;
    }
    first.logout().await;
    let xp = first.total_xp();
    assert!(storage.contents().is_some());

    let second = Harness::with_store(config, PlayerStateStore::open(Arc::new(storage)));
    let store = second.progression.store();
    assert_eq!(store.wallet(), Some(second.wallet.clone()));
    assert_eq!(store.parcels_visited_count(), 10);
    assert_eq!(second.total_xp(), xp);
    assert!(store.has_achievement("PIONEER_I"));

    // Same wallet: nothing is reset and nothing is awarded twice.
    second.login(false).await;
    assert_eq!(second.total_xp(), xp);
    assert_eq!(second.unlocks_of("FIRST_STEPS"), 0);
}

#[tokio::test]
async fn idle_session_times_out_and_stops_the_engines() {
    let h = Harness::new(ProgressionConfig {
        lifecycle: LifecycleConfig {
            tick_interval_ms: 10_000,
            idle_timeout_seconds: 60,
        },
        ..ProgressionConfig::default()
    });
    h.login(false).await;
    let lifecycle = h.progression.lifecycle();
    lifecycle.on_world_loaded().await.unwrap();
    lifecycle.on_gameplay_start().await.unwrap();

    // Activity at 45s pushes the deadline out.
    h.clock.advance(Duration::seconds(45));
    h.enter_parcel(0, 0, true).await;
    h.clock.advance(Duration::seconds(45));
    lifecycle.on_gameplay_tick().await;
    assert_eq!(lifecycle.phase(), LifecyclePhase::GameplayActive);

    h.clock.advance(Duration::seconds(16));
    lifecycle.on_gameplay_tick().await;
    assert_eq!(lifecycle.phase(), LifecyclePhase::Idle);

    let ended = h.seen_of(EventKind::SessionEnded);
    assert_eq!(ended.len(), 1);
    let EventPayload::SessionEnded(end) = &ended[0].payload else {
        unreachable!("filtered by kind");
    };
    assert_eq!(end.reason, SessionEndReason::Inactivity);
    assert_eq!(end.duration_ms, 106_000);
    assert_eq!(end.parcels_visited, 1);

    assert!(!h.progression.xp().is_running());
    assert!(!h.progression.achievements().is_running());
    assert!(!h.progression.airdrop().is_running());
    assert!(h.progression.store().active_session().is_none());

    // Nothing is awarded until the wallet logs in again.
    let xp = h.total_xp();
    h.enter_parcel(1, 0, true).await;
    assert_eq!(h.total_xp(), xp);

    h.login(false).await;
    assert!(h.progression.xp().is_running());
    assert_eq!(h.seen_of(EventKind::SessionStarted).len(), 2);
}
