//! Reconnect delay policy.
//!
//! Linear growth with a hard cap: attempt `n` waits `base * n`, never more
//! than `cap`. Attempt counts below one are treated as one, so the first
//! retry after a failure waits `base` rather than zero.

use std::time::Duration;

/// Default delay unit (1 s).
pub const DEFAULT_BASE: Duration = Duration::from_millis(1000);
/// Default upper bound (30 s).
pub const DEFAULT_CAP: Duration = Duration::from_millis(30_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            cap: DEFAULT_CAP,
        }
    }
}

impl ReconnectPolicy {
    /// A policy with a custom unit and cap. A cap below the unit is raised
    /// to the unit.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before reconnect attempt number `attempt`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        self.base
            .checked_mul(attempt)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_then_capped() {
        let p = ReconnectPolicy::default();
        for n in 1..=60u32 {
            let expected = (1000 * u64::from(n)).min(30_000);
            assert_eq!(p.next_delay(n), Duration::from_millis(expected), "attempt {n}");
        }
    }

    #[test]
    fn zero_attempts_waits_one_unit() {
        assert_eq!(ReconnectPolicy::default().next_delay(0), Duration::from_secs(1));
    }

    #[test]
    fn never_decreases() {
        let p = ReconnectPolicy::new(Duration::from_millis(700), Duration::from_secs(10));
        let mut last = Duration::ZERO;
        for n in [0, 1, 2, 5, 14, 15, 100, u32::MAX] {
            let d = p.next_delay(n);
            assert!(d >= last, "delay dropped at attempt {n}");
            last = d;
        }
        assert_eq!(last, Duration::from_secs(10));
    }

    #[test]
    fn cap_is_never_below_base() {
        let p = ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(p.cap(), Duration::from_secs(5));
        assert_eq!(p.next_delay(3), Duration::from_secs(5));
    }
}
