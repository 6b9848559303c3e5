//! The [`Progression`] facade.
//!
//! Owns one bus, one store, the bridge, every engine, and the lifecycle
//! manager, and wires them together:
//!
//! - The bridge subscribes first, so the store reflects an event before any
//!   engine reacts to it.
//! - `USER_LOGGED_IN` starts a lifecycle session and the engines for the
//!   wallet. The engines stop whenever the lifecycle ends that session,
//!   whether by `USER_LOGGED_OUT`, a tab close, or inactivity.

use std::sync::{Arc, Weak};

use questline_bus::{AnalyticsQueue, EventBus, HandlerResult};
use questline_state::{FileStorage, PlayerStateStore};
use questline_types::{
    EventKind, EventPayload, SessionEndReason, SessionId, UserLoggedIn, WorldEvent,
};
use tracing::{debug, info, warn};

use crate::achievements::AchievementEngine;
use crate::airdrop::AirdropEngine;
use crate::bridge::EventStateBridge;
use crate::clock::Clock;
use crate::config::ProgressionConfig;
use crate::error::EngineError;
use crate::lifecycle::{LifecycleManager, PageSignal, SessionObserver, SessionSummary};
use crate::wiring::{Subscriptions, subscribe};
use crate::xp::{XpEngine, XpGrantor};

/// Every progression component wired to one bus and one store.
#[derive(Debug)]
pub struct Progression {
    config: ProgressionConfig,
    bus: EventBus,
    store: Arc<PlayerStateStore>,
    clock: Arc<dyn Clock>,
    bridge: Arc<EventStateBridge>,
    xp: Arc<XpEngine>,
    achievements: Arc<AchievementEngine>,
    airdrop: Arc<AirdropEngine>,
    lifecycle: Arc<LifecycleManager>,
    subscriptions: Subscriptions,
}

impl Progression {
    /// Wire the components over an existing bus and store.
    ///
    /// The bridge and the auth handlers are subscribed immediately; the
    /// engines start on the first login.
    pub fn new(
        config: ProgressionConfig,
        bus: EventBus,
        store: Arc<PlayerStateStore>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let rules = Arc::new(config.xp.clone());
        let bridge = Arc::new(EventStateBridge::new(
            Arc::clone(&store),
            bus.clone(),
            Arc::clone(&rules),
            Arc::clone(&clock),
        ));
        bridge.start();

        let grantor = Arc::new(XpGrantor::new(
            Arc::clone(&store),
            bus.clone(),
            rules,
            Arc::clone(&clock),
        ));
        let xp = Arc::new(XpEngine::new(
            Arc::clone(&grantor),
            Arc::clone(&store),
            bus.clone(),
            Arc::clone(&clock),
        ));
        let achievements = Arc::new(AchievementEngine::new(
            Arc::clone(&store),
            bus.clone(),
            grantor,
            config.achievements.clone(),
            Arc::clone(&clock),
        ));
        let airdrop = Arc::new(AirdropEngine::new(
            config.airdrop.clone(),
            Arc::clone(&store),
            bus.clone(),
            Arc::clone(&clock),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            config.lifecycle.clone(),
            Arc::clone(&store),
            bus.clone(),
            Arc::clone(&clock),
        ));

        let progression = Arc::new(Self {
            config,
            bus,
            store,
            clock,
            bridge,
            xp,
            achievements,
            airdrop,
            lifecycle,
            subscriptions: Subscriptions::default(),
        });
        let observer: Weak<Self> = Arc::downgrade(&progression);
        progression.lifecycle.observe(observer);
        progression.subscribe_auth();
        progression
    }

    /// Build everything from configuration.
    ///
    /// The store is backed by a snapshot file when `persistence.directory`
    /// is set and lives in memory otherwise. The analytics flush timer is
    /// started, so this must be called from within a Tokio runtime.
    pub fn from_config(config: ProgressionConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let store = match &config.persistence.directory {
            Some(directory) => {
                let storage = FileStorage::in_directory(directory);
                info!(path = %storage.path().display(), "player state backed by file");
                PlayerStateStore::open(Arc::new(storage))
            }
            None => PlayerStateStore::in_memory(),
        };
        let analytics = Arc::new(AnalyticsQueue::from_config(&config.analytics));
        analytics.start_timer();
        Self::new(config, EventBus::new(analytics), Arc::new(store), clock)
    }

    fn subscribe_auth(self: &Arc<Self>) {
        self.subscriptions.push(subscribe(
            &self.bus,
            EventKind::UserLoggedIn,
            self,
            |progression, event| async move { progression.on_logged_in(&event).await },
        ));
        self.subscriptions.push(subscribe(
            &self.bus,
            EventKind::UserLoggedOut,
            self,
            |progression, _event| async move {
                progression.logout().await;
                Ok(())
            },
        ));
    }

    async fn on_logged_in(self: &Arc<Self>, event: &WorldEvent) -> HandlerResult {
        if let EventPayload::UserLoggedIn(login) = &event.payload {
            self.login(login).await?;
        }
        Ok(())
    }

    /// Start (or keep) a session for the logged-in wallet and start the
    /// engines for it.
    ///
    /// A login for the wallet that is already active leaves the running
    /// engines untouched. A different wallet ends the previous session with
    /// reason `wallet_switch` first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] if a previous session is
    /// still being torn down.
    pub async fn login(self: &Arc<Self>, login: &UserLoggedIn) -> Result<SessionId, EngineError> {
        let wallet = login.wallet.clone();
        let resumed = self.lifecycle.wallet().as_ref() == Some(&wallet);
        let session_id = self.lifecycle.on_wallet_connect(wallet.clone()).await?;
        if resumed && self.xp.wallet().as_ref() == Some(&wallet) {
            return Ok(session_id);
        }

        info!(
            wallet = %wallet,
            is_mainnet = login.is_mainnet,
            has_mainnet_profile = login.has_mainnet_profile,
            is_beta_user = login.is_beta_user,
            "starting engines"
        );
        self.xp.start(wallet.clone());
        self.airdrop
            .start(wallet.clone(), login.has_mainnet_profile, login.is_beta_user);
        self.achievements
            .start(wallet, login.is_mainnet, login.has_mainnet_profile)
            .await;
        Ok(session_id)
    }

    /// End the session with reason `logout` and stop the engines.
    pub async fn logout(&self) -> Option<SessionSummary> {
        let summary = self.lifecycle.end_session(SessionEndReason::Logout).await;
        self.stop_engines();
        summary
    }

    /// End the session because the host page is going away. The engines
    /// stop with it.
    pub async fn handle_page_signal(&self, signal: PageSignal) -> Option<SessionSummary> {
        self.lifecycle.handle_page_signal(signal).await
    }

    /// End any session, stop everything, and flush and persist what is left.
    pub async fn shutdown(&self) -> Option<SessionSummary> {
        let summary = self.lifecycle.end_session(SessionEndReason::Manual).await;
        self.stop_engines();
        self.subscriptions.release();
        self.bridge.stop();

        let analytics = self.bus.analytics();
        analytics.stop_timer();
        analytics.flush_pending().await;
        if let Err(e) = self.store.persist() {
            warn!(error = %e, "failed to persist player state on shutdown");
        }
        info!("progression shut down");
        summary
    }

    fn stop_engines(&self) {
        self.achievements.stop();
        self.airdrop.stop();
        self.xp.stop();
    }

    /// Publish an event on the shared bus.
    pub async fn emit(&self, event: WorldEvent) -> questline_bus::DeliveryReport {
        self.bus.emit(event).await
    }

    /// The loaded configuration.
    pub const fn config(&self) -> &ProgressionConfig {
        &self.config
    }

    /// The shared bus.
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The shared store.
    pub const fn store(&self) -> &Arc<PlayerStateStore> {
        &self.store
    }

    /// The injected clock.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The XP engine.
    pub const fn xp(&self) -> &Arc<XpEngine> {
        &self.xp
    }

    /// The achievement engine.
    pub const fn achievements(&self) -> &Arc<AchievementEngine> {
        &self.achievements
    }

    /// The airdrop engine.
    pub const fn airdrop(&self) -> &Arc<AirdropEngine> {
        &self.airdrop
    }

    /// The lifecycle manager.
    pub const fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }
}

impl SessionObserver for Progression {
    fn on_session_ended(&self, summary: &SessionSummary) {
        debug!(
            session_id = %summary.session_id,
            reason = ?summary.reason,
            "session over, stopping engines"
        );
        self.stop_engines();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use questline_types::{ParcelEntered, WalletAddress};

    use super::*;
    use crate::clock::ManualClock;
    use crate::lifecycle::LifecyclePhase;

    fn progression() -> Arc<Progression> {
        Progression::new(
            ProgressionConfig::default(),
            EventBus::default(),
            Arc::new(PlayerStateStore::in_memory()),
            Arc::new(ManualClock::new(Utc::now())),
        )
    }

    fn logged_in(wallet: &str) -> WorldEvent {
        let wallet = WalletAddress::parse(wallet).unwrap();
        WorldEvent::new(
            EventPayload::UserLoggedIn(UserLoggedIn {
                wallet: wallet.clone(),
                is_mainnet: false,
                has_mainnet_profile: false,
                is_beta_user: false,
            }),
            Utc::now(),
        )
        .with_wallet(Some(wallet))
    }

    #[tokio::test]
    async fn login_event_starts_session_and_engines() {
        let p = progression();
        p.emit(logged_in("0xa")).await;

        assert_eq!(p.lifecycle().phase(), LifecyclePhase::SessionActive);
        assert!(p.xp().is_running());
        assert!(p.achievements().is_running());
        assert!(p.airdrop().is_running());
        assert!(p.store().active_session().is_some());
        // The catch-up pass sees the fresh session.
        assert!(p.store().has_achievement("FIRST_STEPS"));
    }

    #[tokio::test]
    async fn logout_event_ends_session_and_stops_engines() {
        let p = progression();
        p.emit(logged_in("0xa")).await;
        p.emit(WorldEvent::new(EventPayload::UserLoggedOut, Utc::now()))
            .await;

        assert_eq!(p.lifecycle().phase(), LifecyclePhase::Idle);
        assert!(!p.xp().is_running());
        assert!(!p.achievements().is_running());
        assert!(!p.airdrop().is_running());
        assert!(p.store().active_session().is_none());
    }

    #[tokio::test]
    async fn tab_close_stops_engines_until_the_next_login() {
        let p = progression();
        p.emit(logged_in("0xa")).await;
        let xp = p.store().total_xp();

        let summary = p.handle_page_signal(PageSignal::Unload).await.unwrap();
        assert_eq!(summary.reason, SessionEndReason::TabClose);
        assert!(!p.xp().is_running());
        assert!(!p.achievements().is_running());
        assert!(!p.airdrop().is_running());

        // Movement without a session is recorded but earns nothing.
        p.emit(WorldEvent::new(
            EventPayload::ParcelEntered(ParcelEntered {
                x: 5,
                z: 5,
                is_first_visit: true,
            }),
            Utc::now(),
        ))
        .await;
        assert_eq!(p.store().parcels_visited_count(), 1);
        assert_eq!(p.store().total_xp(), xp);

        p.emit(logged_in("0xa")).await;
        assert_eq!(p.lifecycle().phase(), LifecyclePhase::SessionActive);
        assert!(p.xp().is_running());
        assert!(p.achievements().is_running());
        assert!(p.airdrop().is_running());
    }

    #[tokio::test]
    async fn repeated_login_keeps_the_session() {
        let p = progression();
        p.emit(logged_in("0xa")).await;
        let first = p.lifecycle().session_id();
        p.emit(logged_in("0xa")).await;
        assert_eq!(p.lifecycle().session_id(), first);
    }

    #[tokio::test]
    async fn shutdown_unsubscribes_everything() {
        let p = progression();
        p.emit(logged_in("0xa")).await;
        let summary = p.shutdown().await.unwrap();
        assert_eq!(summary.reason, SessionEndReason::Manual);
        assert_eq!(p.bus().handler_count(EventKind::UserLoggedIn), 0);
        assert_eq!(p.bus().handler_count(EventKind::ParcelEntered), 0);
    }
}
