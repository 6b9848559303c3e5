//! The single canonical player state.
//!
//! [`PlayerStateStore`] wraps one [`PlayerState`] behind a mutex. Every
//! mutator takes the lock once, so each call is applied atomically even when
//! engines run on different tasks. Visit recording that must update several
//! fields together (`enter_parcel`, `enter_district`) is exposed as a single
//! composite mutator rather than a sequence of calls.
//!
//! Presentation code reads through the selector methods, which return owned
//! copies; nothing outside this module can hold a reference into the state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use questline_types::{
    AchievementRecord, DistrictVisit, ParcelCoord, ParcelVisit, PlayerState, PlayerStats,
    Position, Session, SessionId, WalletAddress,
};
use tracing::{debug, info, warn};

use crate::error::StateError;
use crate::level::level_for_xp;
use crate::snapshot::{PersistedSnapshot, len_u64};
use crate::storage::SnapshotStorage;

/// Result of [`PlayerStateStore::add_xp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpChange {
    /// XP added by this call.
    pub amount: u64,
    /// Total before the call.
    pub previous_total: u64,
    /// Total after the call.
    pub total_xp: u64,
    /// Level before the call.
    pub previous_level: u32,
    /// Level after the call.
    pub level: u32,
}

impl XpChange {
    /// Whether the grant crossed at least one level boundary.
    pub const fn leveled_up(&self) -> bool {
        self.level > self.previous_level
    }
}

/// Parcels and districts touched since a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisitTally {
    /// Distinct parcels entered since the cutoff.
    pub parcels: u64,
    /// Distinct districts entered since the cutoff.
    pub districts: u64,
    /// Parcels whose first visit happened since the cutoff.
    pub new_parcels: u64,
    /// Districts whose first visit happened since the cutoff.
    pub new_districts: u64,
}

/// Canonical, optionally persisted player state.
#[derive(Debug)]
pub struct PlayerStateStore {
    state: Mutex<PlayerState>,
    dirty: AtomicBool,
    storage: Option<Arc<dyn SnapshotStorage>>,
}

impl PlayerStateStore {
    /// A store with no persistence backend.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(PlayerState::default()),
            dirty: AtomicBool::new(false),
            storage: None,
        }
    }

    /// Open a store over `storage`, restoring the last saved snapshot.
    ///
    /// A missing snapshot yields empty state. An unreadable, corrupt, or
    /// newer-schema snapshot is logged and also yields empty state; it is
    /// overwritten on the next successful persist.
    pub fn open(storage: Arc<dyn SnapshotStorage>) -> Self {
        let state = match storage.load() {
            Ok(Some(raw)) => match PersistedSnapshot::from_json(&raw) {
                Ok(snapshot) => {
                    let state = snapshot.restore();
                    info!(
                        wallet = ?state.wallet_address,
                        parcels = state.parcels_visited.len(),
                        districts = state.districts_visited.len(),
                        achievements = state.achievements.len(),
                        total_xp = state.stats.total_xp,
                        "player state restored"
                    );
                    state
                }
                Err(e) => {
                    warn!(error = %e, "persisted snapshot rejected, starting from empty state");
                    PlayerState::default()
                }
            },
            Ok(None) => {
                debug!("no persisted snapshot, starting from empty state");
                PlayerState::default()
            }
            Err(e) => {
                warn!(error = %e, "failed to read persisted snapshot, starting from empty state");
                PlayerState::default()
            }
        };
        Self {
            state: Mutex::new(state),
            dirty: AtomicBool::new(false),
            storage: Some(storage),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlayerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` under the lock and mark the state as having unsaved changes.
    fn mutate<R>(&self, f: impl FnOnce(&mut PlayerState) -> R) -> R {
        let result = f(&mut self.lock());
        self.dirty.store(true, Ordering::Release);
        result
    }

    /// Run a read-only closure against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&PlayerState) -> R) -> R {
        f(&self.lock())
    }

    // =========================================================================
    // Mutators
    // =========================================================================

    /// Associate the state with `wallet`.
    ///
    /// If the state already belongs to a different wallet it is replaced by
    /// empty state for the new one. Returns `true` when that reset happened.
    pub fn bind_wallet(&self, wallet: &WalletAddress) -> bool {
        self.mutate(|state| match &state.wallet_address {
            Some(current) if current == wallet => false,
            Some(current) => {
                info!(previous = %current, wallet = %wallet, "wallet changed, resetting player state");
                *state = PlayerState {
                    wallet_address: Some(wallet.clone()),
                    ..PlayerState::default()
                };
                true
            }
            None => {
                state.wallet_address = Some(wallet.clone());
                false
            }
        })
    }

    /// Record a new avatar position and count it as activity.
    pub fn update_position(&self, position: Position, now: DateTime<Utc>) {
        self.mutate(|state| {
            state.position = position;
            touch(state, now);
        });
    }

    /// Count `now` as activity in the active session.
    pub fn touch_activity(&self, now: DateTime<Utc>) {
        self.mutate(|state| touch(state, now));
    }

    /// Set the parcel the avatar currently stands in.
    pub fn set_current_parcel(&self, coord: Option<ParcelCoord>) {
        self.mutate(|state| state.current_parcel = coord);
    }

    /// Set the district the avatar currently stands in.
    pub fn set_current_district(&self, district_id: Option<String>) {
        self.mutate(|state| state.current_district = district_id);
    }

    /// Upsert the visit record for a parcel.
    ///
    /// Creates the record on the first call and bumps `visit_count` and
    /// `last_visit_time` afterwards. `total_parcels_visited` is recomputed
    /// from the map.
    pub fn record_parcel_visit(&self, coord: ParcelCoord, now: DateTime<Utc>) -> ParcelVisit {
        self.mutate(|state| upsert_parcel(state, coord, now))
    }

    /// Upsert the visit record for a district.
    ///
    /// A display name supplied on a later visit fills in a missing one.
    pub fn record_district_visit(
        &self,
        district_id: &str,
        district_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> DistrictVisit {
        self.mutate(|state| upsert_district(state, district_id, district_name, now))
    }

    /// Set the current parcel, record the visit, and count it as activity,
    /// all under one lock.
    pub fn enter_parcel(&self, coord: ParcelCoord, now: DateTime<Utc>) -> ParcelVisit {
        self.mutate(|state| {
            state.current_parcel = Some(coord);
            let visit = upsert_parcel(state, coord, now);
            touch(state, now);
            visit
        })
    }

    /// Set the current district, record the visit, and count it as activity,
    /// all under one lock.
    pub fn enter_district(
        &self,
        district_id: &str,
        district_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> DistrictVisit {
        self.mutate(|state| {
            state.current_district = Some(district_id.to_owned());
            let visit = upsert_district(state, district_id, district_name, now);
            touch(state, now);
            visit
        })
    }

    /// Add XP and recompute the level.
    pub fn add_xp(&self, amount: u64) -> XpChange {
        self.mutate(|state| {
            let previous_total = state.stats.total_xp;
            let previous_level = state.stats.level;
            state.stats.total_xp = previous_total.saturating_add(amount);
            state.stats.level = level_for_xp(state.stats.total_xp);
            XpChange {
                amount,
                previous_total,
                total_xp: state.stats.total_xp,
                previous_level,
                level: state.stats.level,
            }
        })
    }

    /// Mark an achievement unlocked. Returns `false` if it already was.
    pub fn unlock_achievement(&self, achievement_id: &str, now: DateTime<Utc>) -> bool {
        if self.has_achievement(achievement_id) {
            return false;
        }
        self.mutate(|state| {
            if state.achievements.contains_key(achievement_id) {
                return false;
            }
            state.achievements.insert(
                achievement_id.to_owned(),
                AchievementRecord {
                    unlocked_at: now,
                    is_new: true,
                },
            );
            true
        })
    }

    /// Clear the `is_new` flag of one achievement. Returns `true` if the
    /// flag was set.
    pub fn acknowledge_achievement(&self, achievement_id: &str) -> bool {
        self.mutate(|state| {
            state
                .achievements
                .get_mut(achievement_id)
                .is_some_and(|record| std::mem::replace(&mut record.is_new, false))
        })
    }

    /// Clear every `is_new` flag. Returns how many were cleared.
    pub fn acknowledge_all_achievements(&self) -> usize {
        self.mutate(|state| {
            state
                .achievements
                .values_mut()
                .map(|record| std::mem::replace(&mut record.is_new, false))
                .filter(|was_new| *was_new)
                .count()
        })
    }

    /// Start a new active session for `wallet`.
    ///
    /// Any session still active is ended first (its duration is added to the
    /// total) and returned, so there is never more than one active session.
    pub fn start_session(
        &self,
        session_id: SessionId,
        wallet: WalletAddress,
        now: DateTime<Utc>,
    ) -> Option<Session> {
        self.mutate(|state| {
            let previous = close_session(state, now);
            if let Some(previous) = &previous {
                warn!(session_id = %previous.session_id, "active session replaced by a new one");
            }
            state.session = Some(Session {
                session_id,
                wallet_address: wallet,
                start_time: now,
                last_activity_time: now,
                is_active: true,
                end_time: None,
                long_session_bonus_granted: false,
            });
            previous
        })
    }

    /// End the active session and add its duration to the total.
    ///
    /// Returns the ended session, or `None` (and changes nothing) if no
    /// session was active.
    pub fn end_session(&self, now: DateTime<Utc>) -> Option<Session> {
        if self.active_session().is_none() {
            return None;
        }
        self.mutate(|state| close_session(state, now))
    }

    /// Set the long-session bonus flag on the active session.
    ///
    /// Returns `true` only for the call that set it; `false` if it was
    /// already set or no session is active.
    pub fn mark_long_session_bonus(&self) -> bool {
        self.mutate(|state| match state.session.as_mut() {
            Some(session) if session.is_active && !session.long_session_bonus_granted => {
                session.long_session_bonus_granted = true;
                true
            }
            _ => false,
        })
    }

    // =========================================================================
    // Selectors
    // =========================================================================

    /// A full copy of the current state.
    pub fn snapshot(&self) -> PlayerState {
        self.lock().clone()
    }

    /// Cumulative statistics.
    pub fn stats(&self) -> PlayerStats {
        self.lock().stats.clone()
    }

    /// Total XP.
    pub fn total_xp(&self) -> u64 {
        self.lock().stats.total_xp
    }

    /// Current level.
    pub fn level(&self) -> u32 {
        self.lock().stats.level
    }

    /// The wallet the state belongs to.
    pub fn wallet(&self) -> Option<WalletAddress> {
        self.lock().wallet_address.clone()
    }

    /// Current or most recently ended session.
    pub fn session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    /// The session, only while it is active.
    pub fn active_session(&self) -> Option<Session> {
        self.lock().active_session().cloned()
    }

    /// Number of distinct parcels visited.
    pub fn parcels_visited_count(&self) -> u64 {
        self.lock().stats.total_parcels_visited
    }

    /// Number of distinct districts visited.
    pub fn districts_visited_count(&self) -> u64 {
        self.lock().stats.total_districts_visited
    }

    /// Whether the parcel has ever been visited.
    pub fn has_visited_parcel(&self, coord: ParcelCoord) -> bool {
        self.lock().parcels_visited.contains_key(&coord)
    }

    /// Whether the district has ever been visited.
    pub fn has_visited_district(&self, district_id: &str) -> bool {
        self.lock().districts_visited.contains_key(district_id)
    }

    /// How many of `district_ids` have been visited.
    pub fn count_visited_districts(&self, district_ids: &[String]) -> u64 {
        let state = self.lock();
        let visited = district_ids
            .iter()
            .filter(|id| state.districts_visited.contains_key(id.as_str()))
            .count();
        len_u64(visited)
    }

    /// Whether the achievement is unlocked.
    pub fn has_achievement(&self, achievement_id: &str) -> bool {
        self.lock().achievements.contains_key(achievement_id)
    }

    /// Number of unlocked achievements.
    pub fn achievement_count(&self) -> u64 {
        len_u64(self.lock().achievements.len())
    }

    /// Ids of unlocked achievements not yet acknowledged, in id order.
    pub fn new_achievements(&self) -> Vec<String> {
        self.lock()
            .achievements
            .iter()
            .filter(|(_, record)| record.is_new)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Parcels and districts entered at or after `since`.
    pub fn visit_tally_since(&self, since: DateTime<Utc>) -> VisitTally {
        let state = self.lock();
        let parcels = state.parcels_visited.values();
        let districts = state.districts_visited.values();
        VisitTally {
            parcels: len_u64(parcels.clone().filter(|v| v.last_visit_time >= since).count()),
            districts: len_u64(districts.clone().filter(|v| v.last_visit_time >= since).count()),
            new_parcels: len_u64(parcels.filter(|v| v.first_visit_time >= since).count()),
            new_districts: len_u64(districts.filter(|v| v.first_visit_time >= since).count()),
        }
    }

    /// Whether there are changes not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the durable subset to storage if anything changed since the last
    /// successful write. Returns whether a write happened.
    ///
    /// A store without storage never writes. On failure the state stays
    /// marked dirty so the next call retries.
    pub fn persist(&self) -> Result<bool, StateError> {
        let Some(storage) = &self.storage else {
            return Ok(false);
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let snapshot = PersistedSnapshot::capture(&self.lock());
        let written = snapshot.to_json().and_then(|json| storage.save(&json));
        if let Err(e) = written {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!(wallet = ?snapshot.wallet_address, "player state persisted");
        Ok(true)
    }
}

impl Default for PlayerStateStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn touch(state: &mut PlayerState, now: DateTime<Utc>) {
    if let Some(session) = state.session.as_mut().filter(|s| s.is_active) {
        session.last_activity_time = session.last_activity_time.max(now);
    }
}

fn upsert_parcel(state: &mut PlayerState, coord: ParcelCoord, now: DateTime<Utc>) -> ParcelVisit {
    let visit = state
        .parcels_visited
        .entry(coord)
        .and_modify(|v| {
            v.visit_count = v.visit_count.saturating_add(1);
            v.last_visit_time = now;
        })
        .or_insert_with(|| ParcelVisit {
            x: coord.x,
            z: coord.z,
            first_visit_time: now,
            last_visit_time: now,
            visit_count: 1,
        })
        .clone();
    state.stats.total_parcels_visited = len_u64(state.parcels_visited.len());
    visit
}

fn upsert_district(
    state: &mut PlayerState,
    district_id: &str,
    district_name: Option<&str>,
    now: DateTime<Utc>,
) -> DistrictVisit {
    let visit = state
        .districts_visited
        .entry(district_id.to_owned())
        .and_modify(|v| {
            v.visit_count = v.visit_count.saturating_add(1);
            v.last_visit_time = now;
            if v.district_name.is_none() {
                v.district_name = district_name.map(str::to_owned);
            }
        })
        .or_insert_with(|| DistrictVisit {
            district_id: district_id.to_owned(),
            district_name: district_name.map(str::to_owned),
            first_visit_time: now,
            last_visit_time: now,
            visit_count: 1,
        })
        .clone();
    state.stats.total_districts_visited = len_u64(state.districts_visited.len());
    visit
}

/// End the active session in place, returning a copy of it.
fn close_session(state: &mut PlayerState, now: DateTime<Utc>) -> Option<Session> {
    let session = state.session.as_mut().filter(|s| s.is_active)?;
    session.is_active = false;
    session.end_time = Some(now.max(session.start_time));
    let duration = session.elapsed_ms(now);
    state.stats.total_session_time = state.stats.total_session_time.saturating_add(duration);
    Some(session.clone())
}
