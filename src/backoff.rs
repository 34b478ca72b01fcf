//! Delay between loop iterations.

use std::time::Duration;

use rand::Rng;

/// Delay before the next iteration after `failures` consecutive failed ones.
///
/// Zero failures gives the base interval. Each failure doubles it up to `max`,
/// then up to 10% jitter is added.
pub fn calculate_backoff(failures: u32, base: Duration, max: Duration) -> Duration {
    if failures == 0 {
        return base;
    }

    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis().max(base.as_millis()) as u64;

    let exponential_base = 2u64.saturating_pow(failures);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
