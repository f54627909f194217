//! Delay arithmetic shared by the retry and poll loops.
//!
//! Everything except [`sleep`] is pure so schedules can be checked without
//! waiting on a timer.

use std::time::Duration;

/// Upper bound of the random jitter, as a fraction of the delay it is added to.
pub const JITTER_RATIO: f64 = 0.2;

/// Exponential backoff: `base * 2^attempt`, capped at `cap`.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(31));
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

/// Jitter for `delay` given a uniform sample in `[0, 1)`.
pub fn jitter_from_sample(delay: Duration, sample: f64) -> Duration {
    let sample = sample.clamp(0.0, 1.0);
    delay.mul_f64(JITTER_RATIO * sample)
}

/// Uniform sample in `[0, 1)` for [`jitter_from_sample`].
pub fn jitter_sample() -> f64 {
    rand::random::<f64>()
}

/// Grows a poll interval by `multiplier`, never past `cap`.
pub fn next_interval(current: Duration, multiplier: f64, cap: Duration) -> Duration {
    if !multiplier.is_finite() || multiplier <= 1.0 {
        return current.min(cap);
    }
    let grown = current.as_secs_f64() * multiplier;
    if grown >= cap.as_secs_f64() {
        cap
    } else {
        Duration::from_secs_f64(grown)
    }
}

/// Cooperative sleep; zero-length delays return immediately.
pub async fn sleep(delay: Duration) {
    if delay.is_zero() {
        return;
    }
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let base = Duration::from_millis(1_000);
        let cap = Duration::from_millis(10_000);
        let delays: Vec<u128> = (0..6)
            .map(|attempt| backoff_delay(base, attempt, cap).as_millis())
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
    }

    #[test]
    fn backoff_survives_huge_attempts() {
        let cap = Duration::from_secs(10);
        assert_eq!(backoff_delay(Duration::from_secs(1), u32::MAX, cap), cap);
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let delay = Duration::from_millis(5_000);
        assert_eq!(jitter_from_sample(delay, 0.0), Duration::ZERO);
        assert_eq!(jitter_from_sample(delay, 1.0), Duration::from_millis(1_000));
        for _ in 0..100 {
            let jittered = delay + jitter_from_sample(delay, jitter_sample());
            assert!(jittered >= delay);
            assert!(jittered <= Duration::from_millis(6_000));
        }
    }

    #[test]
    fn poll_interval_grows_to_cap() {
        let cap = Duration::from_millis(5_000);
        let mut interval = Duration::from_millis(1_000);
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(interval.as_millis());
            interval = next_interval(interval, 1.5, cap);
        }
        assert_eq!(seen, vec![1_000, 1_500, 2_250, 3_375, 5_000, 5_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_waits_requested_duration() {
        let started = tokio::time::Instant::now();
        sleep(Duration::from_millis(750)).await;
        assert!(started.elapsed() >= Duration::from_millis(750));
    }
}
