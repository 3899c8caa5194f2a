use rand::Rng;
use std::time::Duration;

use crate::config::FeedConfig;

/// Delay before reconnect attempt `attempt` (1-based).
///
/// Doubles from `reconnect_initial_ms` up to `reconnect_max_ms`, then picks a
/// random point in the upper half of that ceiling.
pub fn reconnect_delay(attempt: u32, config: &FeedConfig) -> Duration {
    let doublings = attempt.saturating_sub(1).min(20);
    let ceiling = config
        .reconnect_initial_ms
        .saturating_mul(1u64 << doublings)
        .min(config.reconnect_max_ms);

    let mut rng = rand::thread_rng();
    let delay_ms = rng.gen_range(ceiling / 2..=ceiling);
    Duration::from_millis(delay_ms)
}
