//! Retry policy for failed transfers.

use capsync_core::{QueueConfig, TransferError};
use rand::Rng;

/// What happens to an intent after a failed transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePlan {
    /// Back to `pending`, eligible again after `delay_ms`.
    Retry { attempt_count: u32, delay_ms: u64 },
    /// Parked as `failed` until a manual retry.
    Park { attempt_count: u32 },
}

/// Delay before attempt `attempt_count + 1`:
/// `min(max, initial * 2^(attempt_count - 1))` plus up to `backoff_jitter` of
/// that value, scaled by `jitter_sample` in `[0, 1)`.
pub fn compute_backoff_delay_ms(attempt_count: u32, config: &QueueConfig, jitter_sample: f64) -> u64 {
    let exponent = attempt_count.saturating_sub(1).min(32);
    let base = config
        .initial_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_backoff_ms);
    let jitter = (base as f64 * config.backoff_jitter * jitter_sample.clamp(0.0, 1.0)).round() as u64;
    base + jitter
}

/// Classify a failure for an intent that has already failed `attempt_count` times.
///
/// Terminal errors park immediately without counting. Retryable errors count,
/// and park once the count reaches `max_attempts`.
pub fn plan_failure(
    attempt_count: u32,
    error: &TransferError,
    config: &QueueConfig,
    jitter_sample: f64,
) -> FailurePlan {
    if !error.is_retryable() {
        return FailurePlan::Park { attempt_count };
    }

    let attempt_count = attempt_count + 1;
    if attempt_count >= config.max_attempts {
        FailurePlan::Park { attempt_count }
    } else {
        FailurePlan::Retry {
            attempt_count,
            delay_ms: compute_backoff_delay_ms(attempt_count, config, jitter_sample),
        }
    }
}

pub(crate) fn jitter_sample() -> f64 {
    rand::rng().random::<f64>()
}
