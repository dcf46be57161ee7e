//! Retry policy
//!
//! Exponential backoff with a hard cap, no jitter, strictly sequential:
//! a retry never starts before the previous attempt's task is fully torn
//! down (the lifecycle guarantees teardown before returning its error).
//!
//! An error can veto retries by carrying `retry: false` in its details.

use std::time::Duration;

use crate::error::ExecError;

/// Retry iff budget remains and the error does not veto it.
pub fn should_retry(error: &ExecError, attempt: u32, max_retries: u32) -> bool {
    attempt < max_retries && error.retry_allowed()
}

/// Delay before attempt `attempt + 1`: `min(base * 2^attempt, cap)`.
pub fn backoff_delay(base_ms: u64, attempt: u32, cap_ms: u64) -> Duration {
    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(exponential.min(cap_ms))
}

/// Sleep out the backoff for `attempt`, then return so the caller can
/// re-invoke its continuation.
pub async fn wait_backoff(base_ms: u64, attempt: u32, cap_ms: u64) {
    tokio::time::sleep(backoff_delay(base_ms, attempt, cap_ms)).await;
}
