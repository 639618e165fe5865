//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Pre-jitter delay for a 0-indexed attempt: `base * 2^attempt`.
pub fn exponential_delay(attempt: u32, base: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor)
}

/// Calculate exponential backoff delay with jitter.
///
/// Jitter is drawn uniformly from `[0, jitter_ceiling)`.
pub fn calculate_backoff(attempt: u32, base: Duration, jitter_ceiling: Duration) -> Duration {
    let delay = exponential_delay(attempt, base);

    let ceiling_ms = jitter_ceiling.as_millis() as u64;
    let jitter = if ceiling_ms > 0 {
        rand::thread_rng().gen_range(0..ceiling_ms)
    } else {
        0
    };

    delay.saturating_add(Duration::from_millis(jitter))
}
