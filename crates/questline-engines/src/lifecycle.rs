//! Session boundaries and the gameplay tick.
//!
//! ```text
//! Idle ──connect──▶ SessionActive ──world──▶ WorldLoaded ──start──▶ GameplayActive
//!   ▲                    │                        │                      │
//!   └──── cleanup ◀── Ended ◀──────────── end_session ───────────────────┘
//! ```
//!
//! Session summaries are derived from the store's visit records, so the
//! manager keeps no exploration bookkeeping of its own.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use questline_bus::EventBus;
use questline_state::PlayerStateStore;
use questline_types::{
    EventPayload, GameplayTick, SessionEndReason, SessionEnded, SessionId, SessionStarted,
    WalletAddress, WorldEvent,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::error::EngineError;

/// Where the manager is in the session state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    /// No session.
    #[default]
    Idle,
    /// A wallet connected and a session started.
    SessionActive,
    /// The world finished loading.
    WorldLoaded,
    /// Gameplay is running and the tick is active.
    GameplayActive,
    /// The session is being torn down.
    Ended,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::SessionActive => "session-active",
            Self::WorldLoaded => "world-loaded",
            Self::GameplayActive => "gameplay-active",
            Self::Ended => "ended",
        })
    }
}

/// Host page signals that must end the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSignal {
    /// The page is being unloaded.
    Unload,
    /// The page became hidden.
    Hidden,
}

/// What happened during a session, returned by
/// [`LifecycleManager::end_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// The session that ended.
    pub session_id: SessionId,
    /// Wallet that owned it.
    pub wallet: WalletAddress,
    /// Why it ended.
    pub reason: SessionEndReason,
    /// Session length in milliseconds.
    pub duration_ms: u64,
    /// Distinct parcels entered during the session.
    pub parcels_visited: u64,
    /// Distinct districts entered during the session.
    pub districts_visited: u64,
    /// Parcels entered for the first time during the session.
    pub new_parcels: u64,
    /// Districts entered for the first time during the session.
    pub new_districts: u64,
}

/// Callback invoked after a session has fully ended.
///
/// Observers run once `SESSION_ENDED` has been delivered, analytics have
/// been flushed, and the store has been persisted, whatever ended the
/// session: logout, tab close, inactivity, or a wallet switch.
pub trait SessionObserver: Send + Sync {
    /// Called with the summary of the session that just ended.
    fn on_session_ended(&self, summary: &SessionSummary);
}

#[derive(Debug)]
struct ActiveSession {
    id: SessionId,
    wallet: WalletAddress,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LifecycleRuntime {
    phase: LifecyclePhase,
    session: Option<ActiveSession>,
    tick: Option<JoinHandle<()>>,
}

/// Drives session start, gameplay ticks, and session end.
#[derive(Debug)]
pub struct LifecycleManager {
    config: LifecycleConfig,
    store: Arc<PlayerStateStore>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    runtime: Mutex<LifecycleRuntime>,
    observers: Mutex<Vec<Weak<dyn SessionObserver>>>,
}

impl LifecycleManager {
    /// Create an idle manager.
    pub fn new(
        config: LifecycleConfig,
        store: Arc<PlayerStateStore>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            bus,
            clock,
            runtime: Mutex::new(LifecycleRuntime::default()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer for session ends. Held weakly; dropped
    /// observers are pruned on the next session end.
    pub fn observe(&self, observer: Weak<dyn SessionObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn notify_session_ended(&self, summary: &SessionSummary) {
        let observers: Vec<Arc<dyn SessionObserver>> = {
            let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.on_session_ended(summary);
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current phase.
    pub fn phase(&self) -> LifecyclePhase {
        self.lock().phase
    }

    /// Id of the current session, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.lock().session.as_ref().map(|s| s.id)
    }

    /// Wallet of the current session, if any.
    pub fn wallet(&self) -> Option<WalletAddress> {
        self.lock().session.as_ref().map(|s| s.wallet.clone())
    }

    /// Start a session for `wallet` and emit `SESSION_STARTED`.
    ///
    /// Connecting the wallet that already owns the current session returns
    /// its id unchanged. Connecting a different wallet first ends the
    /// current session with [`SessionEndReason::WalletSwitch`], which also
    /// persists the previous wallet's state before the store is rebound.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] while a previous session
    /// is still being torn down.
    pub async fn on_wallet_connect(&self, wallet: WalletAddress) -> Result<SessionId, EngineError> {
        let (phase, current) = {
            let runtime = self.lock();
            let current = runtime.session.as_ref().map(|s| (s.id, s.wallet.clone()));
            (runtime.phase, current)
        };
        match (phase, current) {
            (LifecyclePhase::Ended, _) => {
                return Err(EngineError::InvalidTransition {
                    from: LifecyclePhase::Ended,
                    to: LifecyclePhase::SessionActive,
                });
            }
            (_, Some((id, owner))) if owner == wallet => return Ok(id),
            (_, Some(_)) => {
                self.end_session(SessionEndReason::WalletSwitch).await;
            }
            (_, None) => {}
        }

        self.store.bind_wallet(&wallet);
        let now = self.clock.now();
        let session_id = SessionId::new();
        {
            let mut runtime = self.lock();
            runtime.phase = LifecyclePhase::SessionActive;
            runtime.session = Some(ActiveSession {
                id: session_id,
                wallet: wallet.clone(),
                started_at: now,
            });
        }
        info!(wallet = %wallet, session_id = %session_id, "session started");

        self.bus
            .emit(
                WorldEvent::new(EventPayload::SessionStarted(SessionStarted { session_id }), now)
                    .with_wallet(Some(wallet))
                    .with_session(Some(session_id)),
            )
            .await;
        Ok(session_id)
    }

    /// Record that the world finished loading and emit `WORLD_LOADED`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] when no session is active.
    pub async fn on_world_loaded(&self) -> Result<(), EngineError> {
        {
            let mut runtime = self.lock();
            match runtime.phase {
                LifecyclePhase::SessionActive => runtime.phase = LifecyclePhase::WorldLoaded,
                LifecyclePhase::WorldLoaded | LifecyclePhase::GameplayActive => return Ok(()),
                from => {
                    return Err(EngineError::InvalidTransition {
                        from,
                        to: LifecyclePhase::WorldLoaded,
                    });
                }
            }
        }
        debug!("world loaded");
        self.emit_lifecycle(EventPayload::WorldLoaded).await;
        Ok(())
    }

    /// Enter gameplay, emit `GAMEPLAY_STARTED`, and start the tick.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTransition`] when no session is active.
    pub async fn on_gameplay_start(self: &Arc<Self>) -> Result<(), EngineError> {
        {
            let mut runtime = self.lock();
            match runtime.phase {
                LifecyclePhase::SessionActive | LifecyclePhase::WorldLoaded => {
                    runtime.phase = LifecyclePhase::GameplayActive;
                }
                LifecyclePhase::GameplayActive => return Ok(()),
                from => {
                    return Err(EngineError::InvalidTransition {
                        from,
                        to: LifecyclePhase::GameplayActive,
                    });
                }
            }
            if self.config.tick_interval_ms > 0 {
                if let Some(session) = &runtime.session {
                    let tick = self.spawn_tick(session.id);
                    if let Some(previous) = runtime.tick.replace(tick) {
                        previous.abort();
                    }
                }
            }
        }
        info!(session_id = ?self.session_id(), "gameplay started");
        self.emit_lifecycle(EventPayload::GameplayStarted).await;
        Ok(())
    }

    fn spawn_tick(self: &Arc<Self>, session_id: SessionId) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = Duration::from_millis(self.config.tick_interval_ms);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.on_gameplay_tick().await;
                if manager.session_id() != Some(session_id) {
                    break;
                }
            }
        })
    }

    /// One gameplay tick: emit `GAMEPLAY_TICK`, persist unsaved changes, and
    /// end the session if it has been idle longer than the timeout.
    ///
    /// Does nothing outside [`LifecyclePhase::GameplayActive`].
    pub async fn on_gameplay_tick(&self) {
        let now = self.clock.now();
        let started_at = {
            let runtime = self.lock();
            match (&runtime.phase, &runtime.session) {
                (LifecyclePhase::GameplayActive, Some(session)) => session.started_at,
                _ => return,
            }
        };
        let tick_ms = elapsed_ms(started_at, now);
        self.emit_lifecycle(EventPayload::GameplayTick(GameplayTick {
            elapsed_ms: tick_ms,
        }))
        .await;

        self.persist();

        let idle_timeout = self.config.idle_timeout_seconds;
        if idle_timeout == 0 {
            return;
        }
        let Some(session) = self.store.active_session() else {
            return;
        };
        let idle_ms = elapsed_ms(session.last_activity_time, now);
        if idle_ms >= idle_timeout.saturating_mul(1000) {
            info!(session_id = %session.session_id, idle_ms, "session idle, ending");
            self.end_session(SessionEndReason::Inactivity).await;
        }
    }

    /// End the current session.
    ///
    /// Emits `SESSION_ENDED`, flushes buffered analytics, persists the
    /// store, and returns to [`LifecyclePhase::Idle`]. Returns `None` (and
    /// does nothing) when no session is active.
    pub async fn end_session(&self, reason: SessionEndReason) -> Option<SessionSummary> {
        let (session, tick) = {
            let mut runtime = self.lock();
            if matches!(runtime.phase, LifecyclePhase::Idle | LifecyclePhase::Ended) {
                return None;
            }
            let Some(session) = runtime.session.take() else {
                runtime.phase = LifecyclePhase::Idle;
                return None;
            };
            runtime.phase = LifecyclePhase::Ended;
            (session, runtime.tick.take())
        };
        if let Some(tick) = tick {
            // The inactivity check runs inside the tick task, which then
            // exits on its own.
            if tokio::task::try_id() != Some(tick.id()) {
                tick.abort();
            }
        }

        let now = self.clock.now();
        let tally = self.store.visit_tally_since(session.started_at);
        let summary = SessionSummary {
            session_id: session.id,
            wallet: session.wallet,
            reason,
            duration_ms: elapsed_ms(session.started_at, now),
            parcels_visited: tally.parcels,
            districts_visited: tally.districts,
            new_parcels: tally.new_parcels,
            new_districts: tally.new_districts,
        };

        self.bus
            .emit(
                WorldEvent::new(
                    EventPayload::SessionEnded(SessionEnded {
                        session_id: summary.session_id,
                        reason,
                        duration_ms: summary.duration_ms,
                        parcels_visited: summary.parcels_visited,
                        districts_visited: summary.districts_visited,
                    }),
                    now,
                )
                .with_wallet(Some(summary.wallet.clone()))
                .with_session(Some(summary.session_id)),
            )
            .await;

        let flushed = self.bus.flush_analytics().await;
        debug!(outcome = ?flushed, "analytics flushed at session end");
        self.persist();

        self.lock().phase = LifecyclePhase::Idle;
        info!(
            session_id = %summary.session_id,
            wallet = %summary.wallet,
            reason = ?reason,
            duration_ms = summary.duration_ms,
            parcels = summary.parcels_visited,
            districts = summary.districts_visited,
            "session ended"
        );
        self.notify_session_ended(&summary);
        Some(summary)
    }

    /// End the session because the host page is going away.
    pub async fn handle_page_signal(&self, signal: PageSignal) -> Option<SessionSummary> {
        debug!(signal = ?signal, "page signal");
        self.end_session(SessionEndReason::TabClose).await
    }

    fn persist(&self) {
        if let Err(e) = self.store.persist() {
            warn!(error = %e, "failed to persist player state");
        }
    }

    async fn emit_lifecycle(&self, payload: EventPayload) {
        let (wallet, session_id) = {
            let runtime = self.lock();
            let session = runtime.session.as_ref();
            (session.map(|s| s.wallet.clone()), session.map(|s| s.id))
        };
        self.bus
            .emit(
                WorldEvent::new(payload, self.clock.now())
                    .with_wallet(wallet)
                    .with_session(session_id),
            )
            .await;
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if let Some(tick) = self.lock().tick.take() {
            tick.abort();
        }
    }
}

fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from(now.signed_duration_since(since).num_milliseconds()).unwrap_or(0)
}
