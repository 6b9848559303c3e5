//! Reactive, rate-limited XP awarding.
//!
//! [`XpGrantor`] is the only path through which XP reaches the store. It
//! applies the global multiplier, checks the per-wallet sliding window, adds
//! whatever fits, and emits `XP_GAINED`, `LEVEL_UP`, and `XP_CAP_REACHED` as
//! appropriate. Achievement bonuses go through the same grantor, so the
//! per-minute cap holds for every source.
//!
//! [`XpEngine`] subscribes to first-visit and interaction events while
//! started for a wallet, and runs a minute ticker for session-time bonuses.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use questline_bus::{EventBus, HandlerResult};
use questline_state::{PlayerStateStore, XpChange};
use questline_types::{
    EventKind, EventPayload, LevelUp, SessionId, WalletAddress, WorldEvent, XpCapReached,
    XpGained, XpSource,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::rate_limit::RateLimiter;
use crate::rules::XpConfig;
use crate::wiring::{Subscriptions, subscribe};

/// Period of the session-time ticker.
const MINUTE_TICK: Duration = Duration::from_secs(60);

/// Period of the rate-limiter history sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(120);

const MS_PER_MINUTE: u64 = 60_000;

// ---------------------------------------------------------------------------
// Grantor
// ---------------------------------------------------------------------------

/// Multiplier, rate limit, store update, and result events for one grant.
#[derive(Debug)]
pub struct XpGrantor {
    store: Arc<PlayerStateStore>,
    bus: EventBus,
    rules: Arc<XpConfig>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl XpGrantor {
    /// Create a grantor over the shared store and bus.
    pub fn new(
        store: Arc<PlayerStateStore>,
        bus: EventBus,
        rules: Arc<XpConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(rules.max_xp_per_minute);
        Self {
            store,
            bus,
            rules,
            limiter,
            clock,
        }
    }

    /// The rules table.
    pub fn rules(&self) -> &XpConfig {
        &self.rules
    }

    /// The sliding-window limiter.
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Grant `base` XP from `source` to `wallet`.
    ///
    /// The multiplied amount is checked against the window; whatever fits is
    /// added to the store. Returns the store change, or `None` when nothing
    /// was granted (zero amount or no room left).
    pub async fn grant(
        &self,
        wallet: &WalletAddress,
        base: u64,
        source: XpSource,
    ) -> Option<XpChange> {
        let requested = self.rules.apply_multiplier(base);
        if requested == 0 {
            debug!(wallet = %wallet, source = ?source, base, "zero XP amount skipped");
            return None;
        }

        let now = self.clock.now();
        let decision = self.limiter.check_and_record(wallet, requested, now);
        let session_id = self.store.active_session().map(|s| s.session_id);
        let envelope = |payload: EventPayload| {
            WorldEvent::new(payload, now)
                .with_wallet(Some(wallet.clone()))
                .with_session(session_id)
        };

        let change = if decision.allowed() {
            let change = self.store.add_xp(decision.granted);
            debug!(
                wallet = %wallet,
                source = ?source,
                amount = decision.granted,
                total_xp = change.total_xp,
                "XP granted"
            );
            self.bus
                .emit(envelope(EventPayload::XpGained(XpGained {
                    amount: decision.granted,
                    source,
                    total_xp: change.total_xp,
                    level: change.level,
                })))
                .await;
            if change.leveled_up() {
                info!(wallet = %wallet, level = change.level, total_xp = change.total_xp, "level up");
                self.bus
                    .emit(envelope(EventPayload::LevelUp(LevelUp {
                        previous_level: change.previous_level,
                        level: change.level,
                        total_xp: change.total_xp,
                    })))
                    .await;
            }
            Some(change)
        } else {
            None
        };

        if decision.is_capped() {
            warn!(
                wallet = %wallet,
                source = ?source,
                requested,
                granted = decision.granted,
                capped = decision.capped_amount,
                "XP rate limit reached"
            );
            self.bus
                .emit(envelope(EventPayload::XpCapReached(XpCapReached {
                    source,
                    requested,
                    granted: decision.granted,
                    capped_amount: decision.capped_amount,
                    max_xp_per_minute: self.limiter.max_per_window(),
                })))
                .await;
        }

        change
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct XpRuntime {
    wallet: Option<WalletAddress>,
    timers: Vec<JoinHandle<()>>,
    /// Session-time intervals already rewarded, per session.
    session_intervals: Option<(SessionId, u64)>,
}

/// Maps gameplay events to XP grants for the started wallet.
#[derive(Debug)]
pub struct XpEngine {
    grantor: Arc<XpGrantor>,
    store: Arc<PlayerStateStore>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    runtime: Mutex<XpRuntime>,
    subscriptions: Subscriptions,
}

impl XpEngine {
    /// Create a stopped engine.
    pub fn new(
        grantor: Arc<XpGrantor>,
        store: Arc<PlayerStateStore>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            grantor,
            store,
            bus,
            clock,
            runtime: Mutex::new(XpRuntime::default()),
            subscriptions: Subscriptions::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, XpRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The grantor shared with the achievement engine.
    pub const fn grantor(&self) -> &Arc<XpGrantor> {
        &self.grantor
    }

    /// Whether the engine is started.
    pub fn is_running(&self) -> bool {
        self.lock().wallet.is_some()
    }

    /// The wallet the engine is started for.
    pub fn wallet(&self) -> Option<WalletAddress> {
        self.lock().wallet.clone()
    }

    /// Start awarding XP to `wallet`.
    ///
    /// Starting an engine that is already running restarts it. Rate-limit
    /// history starts empty. Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>, wallet: WalletAddress) {
        if self.is_running() {
            self.stop();
        }

        self.subscriptions.push(subscribe(
            &self.bus,
            EventKind::ParcelEntered,
            self,
            |engine, event| async move { engine.on_area_entered(&event).await },
        ));
        self.subscriptions.push(subscribe(
            &self.bus,
            EventKind::DistrictEntered,
            self,
            |engine, event| async move { engine.on_area_entered(&event).await },
        ));
        self.subscriptions.push(subscribe(
            &self.bus,
            EventKind::InteractionCompleted,
            self,
            |engine, event| async move { engine.on_interaction(&event).await },
        ));

        let timers = vec![self.spawn_minute_ticker(), self.spawn_sweeper()];
        info!(wallet = %wallet, "XP engine started");
        let mut runtime = self.lock();
        runtime.wallet = Some(wallet);
        runtime.timers = timers;
        runtime.session_intervals = None;
    }

    /// Stop awarding XP: unsubscribe, cancel timers, forget rate history.
    pub fn stop(&self) {
        self.subscriptions.release();
        let (wallet, timers) = {
            let mut runtime = self.lock();
            runtime.session_intervals = None;
            (
                runtime.wallet.take(),
                std::mem::take(&mut runtime.timers),
            )
        };
        for timer in timers {
            timer.abort();
        }
        self.grantor.limiter().clear();
        if let Some(wallet) = wallet {
            info!(wallet = %wallet, "XP engine stopped");
        }
    }

    fn spawn_minute_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + MINUTE_TICK, MINUTE_TICK);
            loop {
                interval.tick().await;
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                engine.on_minute_tick().await;
            }
        })
    }

    fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + SWEEP_INTERVAL,
                SWEEP_INTERVAL,
            );
            loop {
                interval.tick().await;
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                let removed = engine.grantor.limiter().prune(engine.clock.now());
                debug!(removed, "rate-limit history swept");
            }
        })
    }

    /// The started wallet, if `event` belongs to it.
    fn wallet_for(&self, event: &WorldEvent) -> Option<WalletAddress> {
        let wallet = self.wallet()?;
        match &event.wallet_address {
            Some(other) if other != &wallet => {
                debug!(wallet = %wallet, other = %other, kind = %event.kind(), "event for another wallet ignored");
                None
            }
            _ => Some(wallet),
        }
    }

    async fn on_area_entered(&self, event: &WorldEvent) -> HandlerResult {
        let rules = self.grantor.rules();
        let (base, source) = match &event.payload {
            EventPayload::ParcelEntered(p) if p.is_first_visit => {
                (rules.parcel_first_visit, XpSource::ParcelDiscovery)
            }
            EventPayload::DistrictEntered(p) if p.is_first_visit => {
                (rules.district_first_visit, XpSource::DistrictDiscovery)
            }
            _ => return Ok(()),
        };
        if let Some(wallet) = self.wallet_for(event) {
            self.grantor.grant(&wallet, base, source).await;
        }
        Ok(())
    }

    async fn on_interaction(&self, event: &WorldEvent) -> HandlerResult {
        let EventPayload::InteractionCompleted(p) = &event.payload else {
            return Ok(());
        };
        let base = self.grantor.rules().interaction_amount(&p.interaction_type);
        if let Some(wallet) = self.wallet_for(event) {
            self.grantor.grant(&wallet, base, XpSource::Interaction).await;
        }
        Ok(())
    }

    /// Award session-time bonuses for the active session.
    ///
    /// Grants `session_bonus` once for every full interval of session time
    /// not yet rewarded, and the long-session bonus the first time the
    /// session passes the threshold. Runs every minute while started.
    pub async fn on_minute_tick(&self) {
        let Some(wallet) = self.wallet() else {
            return;
        };
        let Some(session) = self.store.active_session() else {
            return;
        };
        let minutes = session.elapsed_ms(self.clock.now()) / MS_PER_MINUTE;
        let rules = self.grantor.rules();

        let intervals = minutes
            .checked_div(rules.session_bonus_interval_minutes)
            .unwrap_or(0);
        let pending = {
            let mut runtime = self.lock();
            let rewarded = match runtime.session_intervals {
                Some((id, n)) if id == session.session_id => n,
                _ => 0,
            };
            runtime.session_intervals = Some((session.session_id, intervals.max(rewarded)));
            intervals.saturating_sub(rewarded)
        };
        for _ in 0..pending {
            self.grantor
                .grant(&wallet, rules.session_bonus, XpSource::SessionTime)
                .await;
        }

        let threshold = rules.long_session_threshold_minutes;
        if threshold > 0 && minutes >= threshold && self.store.mark_long_session_bonus() {
            info!(wallet = %wallet, minutes, "long session bonus");
            self.grantor
                .grant(&wallet, rules.long_session_bonus, XpSource::LongSession)
                .await;
        }
    }
}

impl Drop for XpEngine {
    fn drop(&mut self) {
        for timer in self.lock().timers.drain(..) {
            timer.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::Utc;
    use futures::FutureExt;
    use questline_types::{InteractionCompleted, ParcelEntered};

    use super::*;
    use crate::clock::ManualClock;

    struct Harness {
        bus: EventBus,
        store: Arc<PlayerStateStore>,
        clock: Arc<ManualClock>,
        engine: Arc<XpEngine>,
        wallet: WalletAddress,
        seen: Arc<Mutex<Vec<WorldEvent>>>,
    }

    fn harness(rules: XpConfig) -> Harness {
        let bus = EventBus::default();
        let store = Arc::new(PlayerStateStore::in_memory());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let grantor = Arc::new(XpGrantor::new(
            Arc::clone(&store),
            bus.clone(),
            Arc::new(rules),
            clock.clone(),
        ));
        let engine = Arc::new(XpEngine::new(
            grantor,
            Arc::clone(&store),
            bus.clone(),
            clock.clone(),
        ));
        let seen: Arc<Mutex<Vec<WorldEvent>>> = Arc::default();
        for kind in [EventKind::XpGained, EventKind::XpCapReached, EventKind::LevelUp] {
            let seen = Arc::clone(&seen);
            bus.on(kind, move |event| {
                seen.lock().unwrap().push(WorldEvent::clone(&event));
                async { Ok(()) }.boxed()
            });
        }
        let wallet = WalletAddress::parse("0xabc").unwrap();
        store.bind_wallet(&wallet);
        Harness {
            bus,
            store,
            clock,
            engine,
            wallet,
            seen,
        }
    }

    fn kinds(seen: &Mutex<Vec<WorldEvent>>) -> Vec<EventKind> {
        seen.lock().unwrap().iter().map(WorldEvent::kind).collect()
    }

    fn parcel(x: i32, first: bool) -> WorldEvent {
        WorldEvent::new(
            EventPayload::ParcelEntered(ParcelEntered {
                x,
                z: 0,
                is_first_visit: first,
            }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn first_visits_grant_and_revisits_do_not() {
        let h = harness(XpConfig::default());
        h.engine.start(h.wallet.clone());

        h.bus.emit(parcel(1, true)).await;
        h.bus.emit(parcel(1, false)).await;
        assert_eq!(h.store.total_xp(), 10);
        assert_eq!(kinds(&h.seen), vec![EventKind::XpGained]);
    }

    #[tokio::test]
    async fn stopped_engine_ignores_events() {
        let h = harness(XpConfig::default());
        h.engine.start(h.wallet.clone());
        h.engine.stop();
        assert!(!h.engine.is_running());

        h.bus.emit(parcel(1, true)).await;
        assert_eq!(h.store.total_xp(), 0);
        assert_eq!(h.bus.handler_count(EventKind::ParcelEntered), 0);
    }

    #[tokio::test]
    async fn events_for_other_wallets_are_ignored() {
        let h = harness(XpConfig::default());
        h.engine.start(h.wallet.clone());
        let other = WalletAddress::parse("0xother").unwrap();
        h.bus.emit(parcel(1, true).with_wallet(Some(other))).await;
        assert_eq!(h.store.total_xp(), 0);
    }

    #[tokio::test]
    async fn cap_grants_remaining_room_and_reports_once() {
        let rules = XpConfig {
            max_xp_per_minute: 50,
            interaction_amounts: [("a".to_owned(), 30), ("b".to_owned(), 50)].into(),
            ..XpConfig::default()
        };
        let h = harness(rules);
        h.engine.start(h.wallet.clone());

        for kind in ["a", "b"] {
            h.bus
                .emit(WorldEvent::new(
                    EventPayload::InteractionCompleted(InteractionCompleted {
                        interaction_type: kind.to_owned(),
                        target_id: None,
                    }),
                    Utc::now(),
                ))
                .await;
            h.clock.advance(chrono::Duration::seconds(3));
        }

        assert_eq!(h.store.total_xp(), 50);
        let seen = h.seen.lock().unwrap();
        let caps: Vec<&XpCapReached> = seen
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::XpCapReached(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].requested, 50);
        assert_eq!(caps[0].granted, 20);
        assert_eq!(caps[0].capped_amount, 30);
    }

    #[tokio::test]
    async fn level_up_is_emitted_when_crossing_a_boundary() {
        let rules = XpConfig {
            district_first_visit: 150,
            max_xp_per_minute: 1_000,
            ..XpConfig::default()
        };
        let h = harness(rules);
        h.engine.start(h.wallet.clone());
        h.engine
            .grantor()
            .grant(&h.wallet, 150, XpSource::DistrictDiscovery)
            .await;
        assert_eq!(h.store.level(), 2);
        assert_eq!(kinds(&h.seen), vec![EventKind::XpGained, EventKind::LevelUp]);
    }

    #[tokio::test]
    async fn session_bonuses_follow_elapsed_time() {
        let rules = XpConfig {
            session_bonus: 5,
            session_bonus_interval_minutes: 10,
            long_session_bonus: 100,
            long_session_threshold_minutes: 30,
            max_xp_per_minute: 1_000,
            ..XpConfig::default()
        };
        let h = harness(rules);
        h.store
            .start_session(SessionId::new(), h.wallet.clone(), h.clock.now());
        h.engine.start(h.wallet.clone());

        h.clock.advance(chrono::Duration::minutes(9));
        h.engine.on_minute_tick().await;
        assert_eq!(h.store.total_xp(), 0);

        h.clock.advance(chrono::Duration::minutes(1));
        h.engine.on_minute_tick().await;
        h.engine.on_minute_tick().await;
        assert_eq!(h.store.total_xp(), 5);

        h.clock.advance(chrono::Duration::minutes(20));
        h.engine.on_minute_tick().await;
        // Two more intervals plus the long-session bonus.
        assert_eq!(h.store.total_xp(), 115);

        h.clock.advance(chrono::Duration::minutes(5));
        h.engine.on_minute_tick().await;
        assert_eq!(h.store.total_xp(), 115);
    }

    #[tokio::test]
    async fn multiplier_is_applied_before_the_cap() {
        let rules = XpConfig {
            multiplier: rust_decimal::Decimal::new(25, 1),
            max_xp_per_minute: 20,
            ..XpConfig::default()
        };
        let h = harness(rules);
        let change = h
            .engine
            .grantor()
            .grant(&h.wallet, 10, XpSource::Interaction)
            .await
            .unwrap();
        assert_eq!(change.amount, 20);
        assert_eq!(kinds(&h.seen), vec![EventKind::XpGained, EventKind::XpCapReached]);
    }
}
