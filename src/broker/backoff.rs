//! Reconnect backoff
//!
//! The delay starts at `base` and doubles after every failed attempt. A
//! random jitter in `[0, jitter)` is added to each wait but never fed back
//! into the next delay. Once the undelayed value would exceed `ceiling` the
//! escalation is over: [`BackoffStep::Exhausted`] is reported once and the
//! state resets, so whoever owns it can give up or start a fresh cycle.

use rand::Rng;
use std::time::Duration;

/// What to do after a failed connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Wait this long, then try again
    Wait(Duration),
    /// The ceiling was exceeded; stop retrying
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct BackoffState {
    base: Duration,
    ceiling: Duration,
    jitter: Duration,
    current: Duration,
    active: bool,
}

impl BackoffState {
    pub fn new(base: Duration, ceiling: Duration, jitter: Duration) -> Self {
        Self {
            base,
            ceiling,
            jitter,
            current: base,
            active: false,
        }
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Undelayed value of the next wait
    #[cfg(test)]
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Record a failed attempt and decide what happens next
    pub fn on_failure(&mut self) -> BackoffStep {
        if self.active {
            self.current = self.current.saturating_mul(2);
        } else {
            self.active = true;
            self.current = self.base;
        }

        if self.current > self.ceiling {
            self.reset();
            return BackoffStep::Exhausted;
        }

        BackoffStep::Wait(self.current + self.sample_jitter())
    }

    /// A connect succeeded; start over from the base delay
    pub fn reset(&mut self) {
        self.active = false;
        self.current = self.base;
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        use light_edge_shared::defaults::*;
        Self::new(
            Duration::from_secs(BACKOFF_BASE_SECS),
            Duration::from_secs(BACKOFF_CEILING_SECS),
            Duration::from_millis(BACKOFF_JITTER_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_ceiling() {
        let mut backoff = BackoffState::new(
            Duration::from_secs(1),
            Duration::from_secs(32),
            Duration::ZERO,
        );

        let expected = [1, 2, 4, 8, 16, 32];
        for secs in expected {
            assert_eq!(backoff.on_failure(), BackoffStep::Wait(Duration::from_secs(secs)));
        }
        assert_eq!(backoff.on_failure(), BackoffStep::Exhausted);
    }

    #[test]
    fn test_exhausted_reported_once_per_escalation() {
        let mut backoff = BackoffState::new(
            Duration::from_secs(1),
            Duration::from_secs(4),
            Duration::ZERO,
        );

        let steps: Vec<_> = (0..4).map(|_| backoff.on_failure()).collect();
        let exhausted = steps
            .iter()
            .filter(|s| **s == BackoffStep::Exhausted)
            .count();
        assert_eq!(exhausted, 1);
        assert_eq!(steps[3], BackoffStep::Exhausted);
        assert!(!backoff.is_active());

        // A new escalation starts from the base again
        assert_eq!(backoff.on_failure(), BackoffStep::Wait(Duration::from_secs(1)));
    }

    #[test]
    fn test_jitter_stays_below_one_second() {
        let mut backoff = BackoffState::default();

        for n in 1..=6u32 {
            let base = Duration::from_secs(1 << (n - 1));
            match backoff.on_failure() {
                BackoffStep::Wait(delay) => {
                    assert!(delay >= base, "attempt {}: {:?} < {:?}", n, delay, base);
                    assert!(
                        delay < base + Duration::from_secs(1),
                        "attempt {}: {:?} too large",
                        n,
                        delay
                    );
                }
                BackoffStep::Exhausted => panic!("exhausted too early at attempt {}", n),
            }
        }
        assert_eq!(backoff.on_failure(), BackoffStep::Exhausted);
    }

    #[test]
    fn test_reset_on_success() {
        let mut backoff = BackoffState::default();
        backoff.on_failure();
        backoff.on_failure();
        assert_eq!(backoff.current_delay(), Duration::from_secs(2));

        backoff.reset();
        assert!(!backoff.is_active());
        assert_eq!(backoff.current_delay(), Duration::from_secs(1));
    }
}
