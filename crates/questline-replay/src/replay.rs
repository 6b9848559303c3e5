//! Deterministic replay of a recorded event stream.
//!
//! A recorded batch contains both upstream inputs (movement, auth,
//! interactions) and the events the engines derived from them. Only inputs
//! are re-emitted; derived events are regenerated by the engines. World
//! and gameplay markers are turned back into lifecycle calls, and the
//! minute ticker and gameplay tick are driven from the recorded timestamps
//! instead of wall-clock timers.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use questline_engines::{ManualClock, Progression};
use questline_types::{EventKind, WorldEvent};
use tracing::{debug, warn};

/// What a replay did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Upstream events re-emitted on the bus.
    pub emitted: usize,
    /// Lifecycle markers turned into lifecycle calls.
    pub lifecycle_calls: usize,
    /// Derived events skipped because the engines regenerate them.
    pub skipped: usize,
    /// Handler failures across all emits.
    pub handler_failures: usize,
}

/// How a recorded event is handled on replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Treatment {
    Emit,
    WorldLoaded,
    GameplayStarted,
    Skip,
}

const fn treatment(kind: EventKind) -> Treatment {
    match kind {
        EventKind::PlayerMoved
        | EventKind::ParcelEntered
        | EventKind::DistrictEntered
        | EventKind::UserLoggedIn
        | EventKind::UserLoggedOut
        | EventKind::InteractionCompleted
        | EventKind::CreatorTerminalUsed
        | EventKind::ProfileCreated
        | EventKind::MessageSent => Treatment::Emit,
        EventKind::WorldLoaded => Treatment::WorldLoaded,
        EventKind::GameplayStarted => Treatment::GameplayStarted,
        EventKind::AreaDiscovered
        | EventKind::SessionStarted
        | EventKind::SessionEnded
        | EventKind::XpGained
        | EventKind::XpCapReached
        | EventKind::LevelUp
        | EventKind::AchievementUnlocked
        | EventKind::AirdropScoreUpdated
        | EventKind::GameplayTick => Treatment::Skip,
    }
}

/// Timer state reconstructed from recorded timestamps.
#[derive(Debug)]
struct Timers {
    minute: Duration,
    gameplay: Option<Duration>,
    last_minute: Option<DateTime<Utc>>,
    last_gameplay: Option<DateTime<Utc>>,
}

impl Timers {
    fn new(tick_interval_ms: u64) -> Self {
        let gameplay = i64::try_from(tick_interval_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::milliseconds);
        Self {
            minute: Duration::minutes(1),
            gameplay,
            last_minute: None,
            last_gameplay: None,
        }
    }

    /// Whether a timer with `period` last fired at `last` is due at `now`.
    /// The first observation only arms the timer.
    fn due(last: &mut Option<DateTime<Utc>>, period: Duration, now: DateTime<Utc>) -> bool {
        let fire = last.is_some_and(|at| now.signed_duration_since(at) >= period);
        if fire || last.is_none() {
            *last = Some(now);
        }
        fire
    }

    async fn catch_up(&mut self, progression: &Progression, now: DateTime<Utc>) {
        if Self::due(&mut self.last_minute, self.minute, now) {
            progression.xp().on_minute_tick().await;
        }
        if let Some(period) = self.gameplay {
            if Self::due(&mut self.last_gameplay, period, now) {
                progression.lifecycle().on_gameplay_tick().await;
            }
        }
    }
}

/// Replay `events` in order, moving `clock` to each event's timestamp.
///
/// The clock never moves backwards, so out-of-order timestamps replay at
/// the latest time seen so far.
pub async fn replay(
    progression: &Arc<Progression>,
    clock: &ManualClock,
    events: Vec<WorldEvent>,
) -> ReplayReport {
    let mut report = ReplayReport::default();
    let mut timers = Timers::new(progression.config().lifecycle.tick_interval_ms);

    for event in events {
        clock.set(event.timestamp);
        timers.catch_up(progression, event.timestamp).await;

        let kind = event.kind();
        match treatment(kind) {
            Treatment::Emit => {
                let delivery = progression.emit(event).await;
                report.emitted = report.emitted.saturating_add(1);
                report.handler_failures = report.handler_failures.saturating_add(delivery.failed);
            }
            Treatment::WorldLoaded => {
                report.lifecycle_calls = report.lifecycle_calls.saturating_add(1);
                if let Err(e) = progression.lifecycle().on_world_loaded().await {
                    warn!(error = %e, "recorded world load ignored");
                }
            }
            Treatment::GameplayStarted => {
                report.lifecycle_calls = report.lifecycle_calls.saturating_add(1);
                if let Err(e) = progression.lifecycle().on_gameplay_start().await {
                    warn!(error = %e, "recorded gameplay start ignored");
                }
            }
            Treatment::Skip => {
                debug!(kind = %kind, "derived event skipped");
                report.skipped = report.skipped.saturating_add(1);
            }
        }
    }
    report
}
