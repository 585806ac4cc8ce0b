//! Error-aware retry backoff.
//!
//! Computes the delay before a failed job becomes claimable again. The delay
//! grows exponentially with the attempt count and is scaled per error
//! category: rate-limited upstreams get pushed back hardest, failing servers
//! somewhat, everything else follows the plain curve. Pure arithmetic, no
//! clock reads and no jitter; the caller decides what to do with the result.

use crate::classify::ErrorCategory;

/// Cap on the exponent so the shift cannot overflow.
const MAX_EXPONENT: u32 = 16;

/// Clamped exponential backoff, scaled by error category.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay for the first retry, in seconds.
    base_seconds: u64,
    /// Upper bound on any computed delay, in seconds.
    max_seconds: u64,
}

impl BackoffPolicy {
    /// Creates a policy.
    ///
    /// A zero base is bumped to one second so computed delays are always
    /// strictly positive and `not_before` always lands in the future.
    pub fn new(base_seconds: u64, max_seconds: u64) -> Self {
        let base_seconds = base_seconds.max(1);
        Self {
            base_seconds,
            max_seconds: max_seconds.max(base_seconds),
        }
    }

    /// Computes the delay in seconds before the given attempt.
    ///
    /// `attempt` is 1-based: attempt 1 waits the base delay, each further
    /// attempt doubles it. The result is clamped to `[1, max_seconds]`.
    pub fn delay_seconds(&self, attempt: u32, category: ErrorCategory) -> u64 {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let raw = self.base_seconds.saturating_mul(1u64 << exponent);
        let scaled = raw.saturating_mul(Self::category_multiplier(category));
        scaled.clamp(1, self.max_seconds)
    }

    /// Per-category scale factor.
    ///
    /// Rate limiting is the one case where retrying early actively makes
    /// things worse, so it gets the largest factor.
    fn category_multiplier(category: ErrorCategory) -> u64 {
        match category {
            ErrorCategory::RateLimited => 4,
            ErrorCategory::ServerError => 2,
            _ => 1,
        }
    }
}
