//! # Reconnect Delay Arithmetic
//!
//! ```text
//! delay(attempt) = min(base * 2^attempt + jitter, 30s)      jitter ∈ [0, 1s]
//!
//! base = 1s:   attempt 0 → [1s, 2s]
//!              attempt 1 → [2s, 3s]
//!              attempt 2 → [4s, 5s]
//!              attempt 5 → 30s (capped)
//! ```
//!
//! The random part lives with the caller (pulse-sync) so this stays pure.

use std::time::Duration;

/// Upper bound on any reconnect delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(30_000);

/// Upper bound on the random jitter added to each delay.
pub const MAX_JITTER: Duration = Duration::from_millis(1_000);

/// Computes the delay before retry number `attempt` (0-based).
///
/// `jitter` is clamped to [`MAX_JITTER`]. All arithmetic saturates, so very
/// large attempts simply hit the cap.
pub fn reconnect_delay(base: Duration, attempt: u32, jitter: Duration) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let jitter_ms = u64::try_from(jitter.min(MAX_JITTER).as_millis()).unwrap_or(0);

    let delay_ms = base_ms.saturating_mul(factor).saturating_add(jitter_ms);
    Duration::from_millis(delay_ms).min(MAX_RECONNECT_DELAY)
}

/// Returns the inclusive `[min, max]` window a delay can fall in.
pub fn delay_window(base: Duration, attempt: u32) -> (Duration, Duration) {
    (
        reconnect_delay(base, attempt, Duration::ZERO),
        reconnect_delay(base, attempt, MAX_JITTER),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_windows_for_one_second_base() {
        assert_eq!(delay_window(ms(1000), 0), (ms(1000), ms(2000)));
        assert_eq!(delay_window(ms(1000), 1), (ms(2000), ms(3000)));
        assert_eq!(delay_window(ms(1000), 2), (ms(4000), ms(5000)));
    }

    #[test]
    fn test_delay_is_capped() {
        assert_eq!(reconnect_delay(ms(5000), 3, ms(999)), ms(30_000));
        assert_eq!(reconnect_delay(ms(5000), 63, MAX_JITTER), ms(30_000));
        assert_eq!(reconnect_delay(ms(5000), 200, MAX_JITTER), ms(30_000));
    }

    #[test]
    fn test_jitter_is_clamped() {
        assert_eq!(reconnect_delay(ms(100), 0, ms(60_000)), ms(1100));
    }
}
