//! Level derivation.
//!
//! `level = floor(sqrt(total_xp / 100)) + 1`. This function is the only
//! place the formula exists; everything else reads `PlayerStats::level`.

/// Level reached with `total_xp` experience.
///
/// `floor(sqrt(xp / 100))` equals `floor(isqrt(xp) / 10)`, which keeps the
/// computation in integers.
pub const fn level_for_xp(total_xp: u64) -> u32 {
    let steps = total_xp.isqrt() / 10;
    // isqrt(u64::MAX) / 10 fits comfortably in a u32.
    #[allow(clippy::cast_possible_truncation)]
    let steps = steps as u32;
    steps.saturating_add(1)
}

/// Total XP at which `level` is first reached.
pub const fn xp_for_level(level: u32) -> u64 {
    let steps = level.saturating_sub(1) as u64;
    steps.saturating_mul(steps).saturating_mul(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_boundaries() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(399), 2);
        assert_eq!(level_for_xp(400), 3);
        assert_eq!(level_for_xp(10_000), 11);
    }

    #[test]
    fn xp_for_level_is_the_inverse_boundary() {
        for level in 1..50 {
            let xp = xp_for_level(level);
            assert_eq!(level_for_xp(xp), level);
            if xp > 0 {
                assert_eq!(level_for_xp(xp - 1), level - 1);
            }
        }
    }

    #[test]
    fn huge_totals_do_not_overflow() {
        assert!(level_for_xp(u64::MAX) > 1);
    }
}
