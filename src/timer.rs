//! Monotonic clock seam and interval timers
//!
//! Each periodic obligation (sensor publish, heartbeat, link reattach) is a
//! single "last fired + period" pair compared against the clock every tick.

use embassy_time::{Duration, Instant};

/// Source of monotonic time, injected so waits are test-controllable
pub trait Clock {
    fn now(&self) -> Instant;
}

/// A last-fired timestamp plus a period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTimer {
    last_fired: Option<Instant>,
    period: Duration,
}

impl IntervalTimer {
    /// Timer that is due on the first check
    pub fn new(period: Duration) -> Self {
        Self {
            last_fired: None,
            period,
        }
    }

    /// Timer whose first period starts at `start`
    pub fn starting_at(start: Instant, period: Duration) -> Self {
        Self {
            last_fired: Some(start),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn last_fired(&self) -> Option<Instant> {
        self.last_fired
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.period,
        }
    }

    /// Record a firing at `now`; the next period is relative to this call
    pub fn mark(&mut self, now: Instant) {
        self.last_fired = Some(now);
    }

    /// Forget the last firing so the next check is due immediately
    pub fn reset(&mut self) {
        self.last_fired = None;
    }

    /// Check and mark in one step
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.mark(now);
            true
        } else {
            false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_timer_is_due_immediately() {
        let mut timer = IntervalTimer::new(Duration::from_secs(5));
        assert!(timer.fire_if_due(Instant::from_secs(0)));
        assert!(!timer.fire_if_due(Instant::from_secs(4)));
        assert!(timer.fire_if_due(Instant::from_secs(5)));
    }

    #[test]
    fn period_is_measured_from_last_firing() {
        let mut timer = IntervalTimer::starting_at(Instant::from_secs(0), Duration::from_secs(10));
        assert!(!timer.is_due(Instant::from_millis(9_999)));
        // late firing pushes the next deadline out
        timer.mark(Instant::from_secs(13));
        assert!(!timer.is_due(Instant::from_secs(20)));
        assert!(timer.is_due(Instant::from_secs(23)));
    }

    #[test]
    fn clock_going_backwards_is_not_due() {
        let timer = IntervalTimer::starting_at(Instant::from_secs(30), Duration::from_secs(1));
        assert!(!timer.is_due(Instant::from_secs(10)));
    }

    #[test]
    fn reset_makes_timer_due() {
        let mut timer = IntervalTimer::starting_at(Instant::from_secs(0), Duration::from_secs(60));
        timer.reset();
        assert!(timer.is_due(Instant::from_secs(1)));
    }
}
