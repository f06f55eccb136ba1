//! Retry delay computation and per-class attempt budgets.
//!
//! ## Why two budgets?
//!
//! "Not ready yet" means the inference service accepted the work and is
//! still chewing on it — patience is cheap and usually pays off, so that
//! class gets a long budget. "Unavailable" and "timeout" mean the service
//! itself is struggling; hammering it makes things worse, so those get a
//! short budget. A model error is deterministic — resubmitting the same
//! image yields the same failure — and is never retried.

use std::time::Duration;

use crate::pipeline::infer::FailureClass;

/// Retry configuration: exponential delay parameters plus the per-class
/// attempt budgets. All values are tunable configuration, not constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Initial delay before the first retry. Doubles on each attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub cap_delay: Duration,
    /// Attempt budget for [`FailureClass::NotReadyYet`].
    pub not_ready_attempts: u32,
    /// Attempt budget for [`FailureClass::ServiceUnavailable`] and
    /// [`FailureClass::Timeout`].
    pub transient_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            cap_delay: Duration::from_secs(10),
            not_ready_attempts: 8,
            transient_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Maximum number of attempts (initial call + retries) for a failure
    /// class. A class with budget 1 is tried once and never retried.
    pub fn budget(&self, class: FailureClass) -> u32 {
        match class {
            FailureClass::NotReadyYet => self.not_ready_attempts,
            FailureClass::ServiceUnavailable | FailureClass::Timeout => self.transient_attempts,
            // Deterministic failure: straight to the fallback gate.
            FailureClass::ModelError => 1,
        }
    }

    /// Delay to wait before retry number `attempt` (0-based: the delay
    /// after the first failed call is `next_delay(0, ..)`).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        next_delay(attempt, self.base_delay, self.cap_delay)
    }
}

/// `min(base * 2^attempt, cap)`, saturating on overflow.
pub fn next_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}
