//! Sliding-window XP rate limiter.
//!
//! For every wallet the limiter keeps the grants of the last window. A
//! request is granted in full if it fits under the cap, partially if some
//! room remains, and not at all otherwise. Rejection is a value, not an
//! error: the caller decides what to emit.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use questline_types::WalletAddress;

/// Length of the limiting window.
pub const WINDOW_SECONDS: i64 = 60;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Amount asked for.
    pub requested: u64,
    /// Amount that fits in the window and was recorded.
    pub granted: u64,
    /// Amount denied (`requested - granted`).
    pub capped_amount: u64,
}

impl RateDecision {
    /// Whether any XP was granted.
    pub const fn allowed(&self) -> bool {
        self.granted > 0
    }

    /// Whether the request was reduced or denied.
    pub const fn is_capped(&self) -> bool {
        self.capped_amount > 0
    }
}

/// One recorded grant.
#[derive(Debug, Clone, Copy)]
struct Grant {
    at: DateTime<Utc>,
    amount: u64,
}

/// Per-wallet trailing-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u64,
    window: Duration,
    history: Mutex<HashMap<WalletAddress, VecDeque<Grant>>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_per_window` per 60-second window.
    pub fn new(max_per_window: u64) -> Self {
        Self {
            max_per_window,
            window: Duration::seconds(WINDOW_SECONDS),
            history: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WalletAddress, VecDeque<Grant>>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The configured cap.
    pub const fn max_per_window(&self) -> u64 {
        self.max_per_window
    }

    /// Check `requested` against the window ending at `now` and record
    /// whatever is granted.
    ///
    /// Grants at or before `now - 60s` have left the window.
    pub fn check_and_record(
        &self,
        wallet: &WalletAddress,
        requested: u64,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let cutoff = now.checked_sub_signed(self.window).unwrap_or(now);
        let mut history = self.lock();
        let grants = history.entry(wallet.clone()).or_default();
        expire(grants, cutoff);

        let used = window_sum(grants);
        let room = self.max_per_window.saturating_sub(used);
        let granted = requested.min(room);
        if granted > 0 {
            grants.push_back(Grant {
                at: now,
                amount: granted,
            });
        }
        RateDecision {
            requested,
            granted,
            capped_amount: requested.saturating_sub(granted),
        }
    }

    /// XP granted to `wallet` in the window ending at `now`.
    pub fn granted_in_window(&self, wallet: &WalletAddress, now: DateTime<Utc>) -> u64 {
        let cutoff = now.checked_sub_signed(self.window).unwrap_or(now);
        self.lock().get(wallet).map_or(0, |grants| {
            grants
                .iter()
                .filter(|g| g.at > cutoff)
                .fold(0, |sum: u64, g| sum.saturating_add(g.amount))
        })
    }

    /// Drop every grant that has left the window, and wallets left with no
    /// history. Returns the number of grants removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now.checked_sub_signed(self.window).unwrap_or(now);
        let mut history = self.lock();
        let mut removed: usize = 0;
        history.retain(|_, grants| {
            let before = grants.len();
            expire(grants, cutoff);
            removed = removed.saturating_add(before.saturating_sub(grants.len()));
            !grants.is_empty()
        });
        removed
    }

    /// Forget all history.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of wallets with history.
    pub fn tracked_wallets(&self) -> usize {
        self.lock().len()
    }
}

/// Grants are appended in time order, so expired ones are at the front.
fn expire(grants: &mut VecDeque<Grant>, cutoff: DateTime<Utc>) {
    while grants.front().is_some_and(|g| g.at <= cutoff) {
        grants.pop_front();
    }
}

fn window_sum(grants: &VecDeque<Grant>) -> u64 {
    grants.iter().fold(0, |sum, g| sum.saturating_add(g.amount))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn wallet(raw: &str) -> WalletAddress {
        WalletAddress::parse(raw).unwrap()
    }

    #[test]
    fn grants_remaining_room_then_denies() {
        let limiter = RateLimiter::new(50);
        let w = wallet("0xa");
        let t = Utc::now();

        let first = limiter.check_and_record(&w, 30, t);
        assert_eq!((first.granted, first.capped_amount), (30, 0));
        assert!(!first.is_capped());

        let second = limiter.check_and_record(&w, 50, t + Duration::seconds(5));
        assert_eq!((second.granted, second.capped_amount), (20, 30));
        assert!(second.allowed() && second.is_capped());

        let third = limiter.check_and_record(&w, 5, t + Duration::seconds(9));
        assert_eq!((third.granted, third.capped_amount), (0, 5));
        assert!(!third.allowed());

        assert_eq!(limiter.granted_in_window(&w, t + Duration::seconds(9)), 50);
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(50);
        let w = wallet("0xa");
        let t = Utc::now();
        limiter.check_and_record(&w, 50, t);

        // Still inside the window one second before expiry.
        let early = limiter.check_and_record(&w, 10, t + Duration::seconds(59));
        assert_eq!(early.granted, 0);

        // Exactly 60 seconds later the first grant has left.
        let later = limiter.check_and_record(&w, 10, t + Duration::seconds(60));
        assert_eq!(later.granted, 10);
    }

    #[test]
    fn wallets_are_independent() {
        let limiter = RateLimiter::new(10);
        let t = Utc::now();
        limiter.check_and_record(&wallet("0xa"), 10, t);
        let other = limiter.check_and_record(&wallet("0xb"), 10, t);
        assert_eq!(other.granted, 10);
    }

    #[test]
    fn prune_discards_expired_history() {
        let limiter = RateLimiter::new(100);
        let t = Utc::now();
        limiter.check_and_record(&wallet("0xa"), 10, t);
        limiter.check_and_record(&wallet("0xb"), 10, t + Duration::seconds(90));

        assert_eq!(limiter.prune(t + Duration::seconds(120)), 1);
        assert_eq!(limiter.tracked_wallets(), 1);
        assert_eq!(limiter.prune(t + Duration::seconds(300)), 1);
        assert_eq!(limiter.tracked_wallets(), 0);
    }
}
