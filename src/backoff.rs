//! Bounded exponential backoff for transient collaborator failures

use std::time::Duration;

/// Longest delay a single retry will ever wait.
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Delay before retry `attempt` (0-based): `base * 2^attempt`, capped.
pub fn delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(MAX_DELAY).min(MAX_DELAY)
}
