//! Replay binary for the Questline progression engine.
//!
//! Feeds a recorded analytics batch (`{ "events": [...] }`) through a fresh
//! progression runtime and reports where the player ended up.
//!
//! # Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `questline-config.yaml`
//! 3. Read and validate the events file
//! 4. Build the runtime on a manual clock starting at the first event
//! 5. Replay, ending the session as a tab close on Ctrl-C
//! 6. Log stats, achievements, and the airdrop score
//! 7. Shut down, which persists the snapshot

mod error;
mod replay;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use questline_engines::{ManualClock, PageSignal, Progression, ProgressionConfig};
use questline_types::AnalyticsBatch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ReplayError;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the events file, or the final
/// snapshot write fails.
#[tokio::main]
async fn main() -> Result<(), ReplayError> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("questline-replay starting");

    // 2. Load configuration.
    let config = ProgressionConfig::load()?;
    info!(
        max_xp_per_minute = config.xp.max_xp_per_minute,
        multiplier = %config.xp.multiplier,
        tick_interval_ms = config.lifecycle.tick_interval_ms,
        persistence = ?config.persistence.directory,
        "Configuration loaded"
    );

    // 3. Read the events file.
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .ok_or(ReplayError::Usage)?;
    let raw = std::fs::read_to_string(&path).map_err(|source| ReplayError::Io {
        path: path.clone(),
        source,
    })?;
    let batch = AnalyticsBatch::from_json(&raw)?;
    info!(path = %path.display(), events = batch.events.len(), "Events loaded");

    // 4. Build the runtime.
    let start = batch.events.first().map_or_else(Utc::now, |e| e.timestamp);
    let clock = Arc::new(ManualClock::new(start));
    let progression = Progression::from_config(config, clock.clone());

    // 5. Replay.
    tokio::select! {
        report = replay::replay(&progression, &clock, batch.events) => {
            info!(
                emitted = report.emitted,
                lifecycle_calls = report.lifecycle_calls,
                skipped = report.skipped,
                handler_failures = report.handler_failures,
                "Replay complete"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, ending session");
            if let Some(summary) = progression.handle_page_signal(PageSignal::Unload).await {
                info!(session_id = %summary.session_id, reason = ?summary.reason, "Session closed");
            }
        }
    }

    // 6. Report.
    let stats = progression.store().stats();
    info!(
        total_xp = stats.total_xp,
        level = stats.level,
        parcels = stats.total_parcels_visited,
        districts = stats.total_districts_visited,
        session_ms = stats.total_session_time,
        "Final stats"
    );
    let achievements = progression.store().read(|state| {
        state.achievements.keys().cloned().collect::<Vec<_>>()
    });
    info!(count = achievements.len(), ids = ?achievements, "Achievements");
    if let Some(score) = progression.airdrop().force_update().await {
        info!(
            total = %score.total_score,
            base = %score.base_score,
            capped = score.capped,
            "Airdrop score"
        );
    }

    // 7. Shut down.
    if let Some(summary) = progression.shutdown().await {
        info!(
            session_id = %summary.session_id,
            duration_ms = summary.duration_ms,
            parcels = summary.parcels_visited,
            new_parcels = summary.new_parcels,
            "Session closed"
        );
    }
    progression.store().persist()?;
    info!("questline-replay finished");
    Ok(())
}
