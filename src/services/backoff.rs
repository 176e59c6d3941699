//! Shared exponential backoff policy for transient failures.
//!
//! Base 1 s, factor 2, jitter ±20%, per-caller cap. A `Retry-After`
//! hint always wins over the computed delay.

use rand::Rng;
use std::time::Duration;

const BASE_MS: u64 = 1_000;
const JITTER_LOW: f64 = 0.8;
const JITTER_HIGH: f64 = 1.2;

/// Delay before retry number `attempt` (0-based).
pub fn delay(attempt: u32, retry_after: Option<Duration>, cap: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(JITTER_LOW..=JITTER_HIGH);
    delay_with_jitter(attempt, retry_after, cap, jitter)
}

fn delay_with_jitter(
    attempt: u32,
    retry_after: Option<Duration>,
    cap: Duration,
    jitter: f64,
) -> Duration {
    let exp = BASE_MS.saturating_mul(1u64 << attempt.min(16));
    let jittered = Duration::from_millis((exp as f64 * jitter) as u64).min(cap);
    match retry_after {
        Some(hint) => jittered.max(hint),
        None => jittered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_per_attempt() {
        let cap = Duration::from_secs(30);
        assert_eq!(
            delay_with_jitter(0, None, cap, 1.0),
            Duration::from_secs(1)
        );
        assert_eq!(
            delay_with_jitter(1, None, cap, 1.0),
            Duration::from_secs(2)
        );
        assert_eq!(
            delay_with_jitter(3, None, cap, 1.0),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn caps_at_limit() {
        let cap = Duration::from_secs(30);
        assert_eq!(delay_with_jitter(10, None, cap, 1.2), cap);
    }

    #[test]
    fn retry_after_takes_precedence() {
        let cap = Duration::from_secs(30);
        let hint = Some(Duration::from_secs(10));
        // First retry would only wait ~1s; the header stretches it to 10s.
        assert_eq!(delay_with_jitter(0, hint, cap, 1.0), Duration::from_secs(10));
        // A large computed backoff is not shrunk by a smaller hint.
        assert_eq!(
            delay_with_jitter(4, Some(Duration::from_secs(2)), cap, 1.0),
            Duration::from_secs(16)
        );
    }

    #[test]
    fn jitter_bounds_hold() {
        let cap = Duration::from_secs(30);
        for _ in 0..100 {
            let d = delay(1, None, cap);
            assert!(d >= Duration::from_millis(1_600));
            assert!(d <= Duration::from_millis(2_400));
        }
    }
}
