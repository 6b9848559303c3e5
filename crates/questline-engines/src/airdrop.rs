//! Throttled airdrop score recomputation.
//!
//! [`compute_score`] is a pure function of [`ScoreInputs`] and the config.
//! [`AirdropEngine`] gathers inputs from the store plus its own creator
//! terminal counter, recomputes at most once per throttle window when
//! progression events arrive, and publishes each new score as
//! `AIRDROP_SCORE_UPDATED`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use questline_bus::{EventBus, HandlerResult};
use questline_state::PlayerStateStore;
use questline_types::{
    AirdropScore, AppliedMultiplier, EventKind, EventPayload, ScoreBreakdown, WalletAddress,
    WorldEvent,
};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::AirdropConfig;
use crate::wiring::{Subscriptions, subscribe};

const MS_PER_MINUTE: u64 = 60_000;

/// Events that trigger a (throttled) recomputation.
const TRIGGER_KINDS: [EventKind; 5] = [
    EventKind::XpGained,
    EventKind::AchievementUnlocked,
    EventKind::AreaDiscovered,
    EventKind::CreatorTerminalUsed,
    EventKind::ProfileCreated,
];

/// Everything the score depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreInputs {
    /// Total XP.
    pub total_xp: u64,
    /// Unlocked achievements.
    pub achievements: u64,
    /// Distinct districts visited.
    pub districts_visited: u64,
    /// Distinct parcels visited.
    pub parcels_visited: u64,
    /// Whole minutes of ended sessions.
    pub session_minutes: u64,
    /// Creator terminal commands run since the engine started.
    pub creator_terminal_uses: u64,
    /// The wallet owns an on-chain profile.
    pub has_mainnet_profile: bool,
    /// The wallet is enrolled in the beta program.
    pub is_beta_user: bool,
}

fn weighted(weight: Decimal, stat: u64) -> Decimal {
    weight
        .checked_mul(Decimal::from(stat))
        .unwrap_or(Decimal::MAX)
}

/// Compute the score for `inputs`.
///
/// `base = Σ weight × stat`, then the mainnet-profile and beta-user
/// multipliers are applied in that order, then the result is clamped to
/// `max_score`. Identical inputs always produce an identical score apart
/// from `computed_at`.
pub fn compute_score(
    inputs: &ScoreInputs,
    config: &AirdropConfig,
    computed_at: DateTime<Utc>,
) -> AirdropScore {
    let weights = &config.weights;
    let breakdown = ScoreBreakdown {
        xp: weighted(weights.xp, inputs.total_xp),
        achievements: weighted(weights.achievements, inputs.achievements),
        districts: weighted(weights.districts, inputs.districts_visited),
        parcels: weighted(weights.parcels, inputs.parcels_visited),
        session_minutes: weighted(weights.session_minutes, inputs.session_minutes),
        creator_terminal_uses: weighted(
            weights.creator_terminal_uses,
            inputs.creator_terminal_uses,
        ),
    };
    let base_score = breakdown.total();

    let mut multipliers = Vec::new();
    if inputs.has_mainnet_profile {
        multipliers.push(AppliedMultiplier {
            name: "mainnet_profile".to_owned(),
            factor: config.mainnet_profile_multiplier,
        });
    }
    if inputs.is_beta_user {
        multipliers.push(AppliedMultiplier {
            name: "beta_user".to_owned(),
            factor: config.beta_user_multiplier,
        });
    }
    let multiplied = multipliers.iter().fold(base_score, |score, m| {
        score.checked_mul(m.factor).unwrap_or(Decimal::MAX)
    });

    let capped = multiplied > config.max_score;
    let total_score = if capped { config.max_score } else { multiplied };

    AirdropScore {
        breakdown,
        multipliers,
        base_score,
        total_score: total_score.normalize(),
        capped,
        computed_at,
    }
}

#[derive(Debug, Default)]
struct AirdropRuntime {
    wallet: Option<WalletAddress>,
    has_mainnet_profile: bool,
    is_beta_user: bool,
    creator_terminal_uses: u64,
    last_computed_at: Option<DateTime<Utc>>,
    current: Option<AirdropScore>,
}

/// Keeps the airdrop score of the started wallet up to date.
#[derive(Debug)]
pub struct AirdropEngine {
    config: AirdropConfig,
    store: Arc<PlayerStateStore>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    runtime: Mutex<AirdropRuntime>,
    subscriptions: Subscriptions,
}

impl AirdropEngine {
    /// Create a stopped engine.
    pub fn new(
        config: AirdropConfig,
        store: Arc<PlayerStateStore>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            bus,
            clock,
            runtime: Mutex::new(AirdropRuntime::default()),
            subscriptions: Subscriptions::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AirdropRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the engine is started.
    pub fn is_running(&self) -> bool {
        self.lock().wallet.is_some()
    }

    /// Start tracking `wallet`. The counter and current score start empty.
    pub fn start(
        self: &Arc<Self>,
        wallet: WalletAddress,
        has_mainnet_profile: bool,
        is_beta_user: bool,
    ) {
        if self.is_running() {
            self.stop();
        }
        for kind in TRIGGER_KINDS {
            self.subscriptions.push(subscribe(
                &self.bus,
                kind,
                self,
                |engine, event| async move { engine.on_event(&event).await },
            ));
        }
        info!(wallet = %wallet, has_mainnet_profile, is_beta_user, "airdrop engine started");
        *self.lock() = AirdropRuntime {
            wallet: Some(wallet),
            has_mainnet_profile,
            is_beta_user,
            ..AirdropRuntime::default()
        };
    }

    /// Stop tracking and drop the current score.
    pub fn stop(&self) {
        self.subscriptions.release();
        let previous = std::mem::take(&mut *self.lock());
        if let Some(wallet) = previous.wallet {
            info!(wallet = %wallet, "airdrop engine stopped");
        }
    }

    /// The last computed score, or `None` if nothing has been computed
    /// since the engine started.
    pub fn current_score(&self) -> Option<AirdropScore> {
        self.lock().current.clone()
    }

    /// Creator terminal commands counted since the engine started.
    pub fn creator_terminal_uses(&self) -> u64 {
        self.lock().creator_terminal_uses
    }

    /// The inputs the next computation would use.
    pub fn inputs(&self) -> ScoreInputs {
        let stats = self.store.stats();
        let achievements = self.store.achievement_count();
        let runtime = self.lock();
        ScoreInputs {
            total_xp: stats.total_xp,
            achievements,
            districts_visited: stats.total_districts_visited,
            parcels_visited: stats.total_parcels_visited,
            session_minutes: stats.total_session_time / MS_PER_MINUTE,
            creator_terminal_uses: runtime.creator_terminal_uses,
            has_mainnet_profile: runtime.has_mainnet_profile,
            is_beta_user: runtime.is_beta_user,
        }
    }

    /// Recompute now, ignoring the throttle, and publish the result.
    ///
    /// Returns `None` when the engine is not started.
    pub async fn force_update(&self) -> Option<AirdropScore> {
        let now = self.clock.now();
        let wallet = {
            let mut runtime = self.lock();
            let wallet = runtime.wallet.clone()?;
            runtime.last_computed_at = Some(now);
            wallet
        };
        Some(self.recompute(wallet, now).await)
    }

    /// Recompute unless the last computation is inside the throttle
    /// window. Returns the new score if one was computed.
    pub async fn maybe_update(&self) -> Option<AirdropScore> {
        let now = self.clock.now();
        let throttle = i64::try_from(self.config.throttle_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let wallet = {
            let mut runtime = self.lock();
            let wallet = runtime.wallet.clone()?;
            if let Some(last) = runtime.last_computed_at {
                if now.signed_duration_since(last) < throttle {
                    debug!(wallet = %wallet, "airdrop recompute throttled");
                    return None;
                }
            }
            runtime.last_computed_at = Some(now);
            wallet
        };
        Some(self.recompute(wallet, now).await)
    }

    async fn recompute(&self, wallet: WalletAddress, now: DateTime<Utc>) -> AirdropScore {
        let score = compute_score(&self.inputs(), &self.config, now);
        debug!(
            wallet = %wallet,
            total = %score.total_score,
            capped = score.capped,
            "airdrop score computed"
        );
        self.lock().current = Some(score.clone());

        let session_id = self.store.active_session().map(|s| s.session_id);
        self.bus
            .emit(
                WorldEvent::new(EventPayload::AirdropScoreUpdated(Box::new(score.clone())), now)
                    .with_wallet(Some(wallet))
                    .with_session(session_id),
            )
            .await;
        score
    }

    async fn on_event(&self, event: &WorldEvent) -> HandlerResult {
        {
            let mut runtime = self.lock();
            let Some(wallet) = &runtime.wallet else {
                return Ok(());
            };
            if event.wallet_address.as_ref().is_some_and(|w| w != wallet) {
                return Ok(());
            }
            match event.payload {
                EventPayload::CreatorTerminalUsed(_) => {
                    runtime.creator_terminal_uses = runtime.creator_terminal_uses.saturating_add(1);
                }
                EventPayload::ProfileCreated => runtime.has_mainnet_profile = true,
                _ => {}
            }
        }
        self.maybe_update().await;
        Ok(())
    }
}
