use rand::Rng;
use std::time::Duration;

/// Fraction of the base delay used as the upper bound of the random jitter.
const JITTER_FRACTION: f64 = 0.3;

/// Largest exponent applied to the base delay.
const MAX_EXPONENT: u32 = 16;

/// Delay before retry number `attempt + 1`:
/// `base × 2^attempt + uniform(0, 0.3 × base)`.
pub fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    retry_delay_with(base_ms, attempt, &mut rand::thread_rng())
}

pub fn retry_delay_with<R: Rng + ?Sized>(base_ms: u64, attempt: u32, rng: &mut R) -> Duration {
    if base_ms == 0 {
        return Duration::ZERO;
    }
    let exponential = base_ms.saturating_mul(1u64 << attempt.min(MAX_EXPONENT));
    let jitter_ms = rng.gen_range(0.0..base_ms as f64 * JITTER_FRACTION);
    Duration::from_millis(exponential) + Duration::from_secs_f64(jitter_ms / 1_000.0)
}
