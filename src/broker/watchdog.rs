//! Acknowledgment watchdog
//!
//! Some transports keep reporting "connected" long after the link has died.
//! The watchdog presumes the session stale once nothing has been
//! acknowledged for longer than `max_silence`. The clock starts when the
//! session connects.

use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct AckWatchdog {
    max_silence: Duration,
    last_ack: Instant,
    unacked: u32,
}

impl AckWatchdog {
    pub fn new(max_silence: Duration) -> Self {
        Self {
            max_silence,
            last_ack: Instant::now(),
            unacked: 0,
        }
    }

    /// Restart the clock for a fresh connection
    pub fn reset(&mut self, now: Instant) {
        self.last_ack = now;
        self.unacked = 0;
    }

    pub fn on_publish(&mut self) {
        self.unacked = self.unacked.saturating_add(1);
    }

    pub fn on_ack(&mut self, now: Instant) {
        self.last_ack = now;
        self.unacked = self.unacked.saturating_sub(1);
    }

    /// Publishes still waiting for an acknowledgment
    pub fn unacked(&self) -> u32 {
        self.unacked
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_ack)
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.silence(now) > self.max_silence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_watchdog_not_stale() {
        let now = Instant::now();
        let mut watchdog = AckWatchdog::new(Duration::from_secs(60));
        watchdog.reset(now);
        assert!(!watchdog.is_stale(now + Duration::from_secs(60)));
        assert!(watchdog.is_stale(now + Duration::from_secs(61)));
    }

    #[test]
    fn test_acks_keep_session_alive() {
        let start = Instant::now();
        let mut watchdog = AckWatchdog::new(Duration::from_secs(60));
        watchdog.reset(start);

        for minute in 1..=5u64 {
            watchdog.on_publish();
            watchdog.on_ack(start + Duration::from_secs(minute * 50));
        }
        assert!(!watchdog.is_stale(start + Duration::from_secs(300)));
        assert_eq!(watchdog.unacked(), 0);
    }

    #[test]
    fn test_unacked_publishes_counted() {
        let now = Instant::now();
        let mut watchdog = AckWatchdog::new(Duration::from_secs(60));
        watchdog.reset(now);
        watchdog.on_publish();
        watchdog.on_publish();
        watchdog.on_ack(now);
        assert_eq!(watchdog.unacked(), 1);

        watchdog.reset(now);
        assert_eq!(watchdog.unacked(), 0);
    }
}
