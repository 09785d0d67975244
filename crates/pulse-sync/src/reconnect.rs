//! # Reconnect Strategy
//!
//! Exponential backoff with jitter and a hard attempt limit.
//!
//! ```text
//! attempt   delay window (base = 1s)
//! ───────   ─────────────────────────
//!    0      [1s, 2s]
//!    1      [2s, 3s]
//!    2      [4s, 5s]
//!    ...    capped at 30s
//!  max      None (give up)
//! ```

use std::time::Duration;

use backoff::backoff::Backoff;
use pulse_core::backoff::{reconnect_delay, MAX_JITTER};
use rand::Rng;

#[derive(Debug, Clone)]
pub struct ReconnectStrategy {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectStrategy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        ReconnectStrategy {
            base,
            max_attempts,
            attempt: 0,
        }
    }

    /// Retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

impl Backoff for ReconnectStrategy {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if !self.has_attempts_left() {
            return None;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
        let delay = reconnect_delay(self.base, self.attempt, Duration::from_millis(jitter_ms));
        self.attempt += 1;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::backoff::delay_window;

    #[test]
    fn test_delays_stay_inside_windows() {
        for _ in 0..50 {
            let mut strategy = ReconnectStrategy::new(Duration::from_secs(1), 3);
            for attempt in 0..3 {
                let delay = strategy.next_backoff().unwrap();
                let (min, max) = delay_window(Duration::from_secs(1), attempt);
                assert!(delay >= min && delay <= max, "attempt {attempt}: {delay:?}");
            }
            assert_eq!(strategy.next_backoff(), None);
            assert_eq!(strategy.attempts(), 3);
        }
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut strategy = ReconnectStrategy::new(Duration::from_secs(1), 1);
        assert!(strategy.next_backoff().is_some());
        assert!(strategy.next_backoff().is_none());

        strategy.reset();
        let delay = strategy.next_backoff().unwrap();
        assert!(delay <= Duration::from_secs(2));
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let mut strategy = ReconnectStrategy::new(Duration::from_secs(1), 0);
        assert_eq!(strategy.next_backoff(), None);
    }

    #[test]
    fn test_delay_is_capped() {
        let mut strategy = ReconnectStrategy::new(Duration::from_secs(5), 20);
        let last = (0..20).filter_map(|_| strategy.next_backoff()).last().unwrap();
        assert_eq!(last, Duration::from_secs(30));
    }
}
