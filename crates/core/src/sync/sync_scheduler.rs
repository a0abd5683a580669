//! Scheduler constants/helpers for the background sweep.

use std::time::Duration;

use chrono::Utc;

/// Default cadence of the periodic sweep in seconds.
pub const AUTO_SYNC_INTERVAL_SECS: u64 = 45;

/// Maximum jitter (milliseconds) added to each sweep delay.
pub const AUTO_SYNC_JITTER_MS: u64 = 5_000;

/// Lower bound on the sweep delay so a tiny interval cannot spin.
pub const AUTO_SYNC_MIN_DELAY_MS: u64 = 1_000;

/// Delay before the next periodic sweep: the interval plus clock-derived jitter.
pub fn next_sweep_delay(interval: Duration) -> Duration {
    let jitter_ms = if AUTO_SYNC_JITTER_MS > 0 {
        Utc::now().timestamp_millis().unsigned_abs() % AUTO_SYNC_JITTER_MS
    } else {
        0
    };
    let base_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(
        base_ms
            .saturating_add(jitter_ms)
            .max(AUTO_SYNC_MIN_DELAY_MS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_delay_is_bounded_by_interval_and_jitter() {
        let interval = Duration::from_secs(AUTO_SYNC_INTERVAL_SECS);
        let delay = next_sweep_delay(interval);
        assert!(delay >= interval);
        assert!(delay < interval + Duration::from_millis(AUTO_SYNC_JITTER_MS));
    }

    #[test]
    fn sweep_delay_has_a_floor() {
        assert!(next_sweep_delay(Duration::ZERO) >= Duration::from_millis(AUTO_SYNC_MIN_DELAY_MS));
    }
}
