//! Exponential backoff.
//!
//! Deterministic: the Resubmitter evaluates eligibility against an explicit
//! clock, so the same record state and time must always yield the same
//! decision.

use std::time::Duration;

/// Delay before attempt `attempt + 1` is considered: `base * 2^attempt`,
/// capped at `max`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.checked_mul(factor).unwrap_or(max).min(max)
}
