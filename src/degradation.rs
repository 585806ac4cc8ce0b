//! Per-run patch fetch degradation (circuit breaker).
//!
//! Patch fetches are the expensive part of a sync run, and when an upstream
//! starts timing out or rejecting oversized diffs it tends to keep doing so
//! for the rest of the batch. The controller watches for consecutive failures
//! of the same category and, once a threshold is crossed, tells the worker to
//! stop fetching patches and substitute a cheaper degraded artifact for the
//! remainder of the run.
//!
//! One controller is created per sync run and owned exclusively by the worker
//! executing it; nothing here is shared or persisted.
//!
//! Counters are *consecutive per category*: a timeout followed by a
//! content-too-large failure resets the timeout streak, because alternating
//! failure kinds do not indicate the sustained pressure the breaker exists to
//! catch.

use serde::{Deserialize, Serialize};

use crate::classify::ErrorCategory;

/// Observable snapshot of a controller's counters and breaker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationState {
    /// Consecutive timeout failures since the last reset point.
    pub consecutive_timeouts: u32,
    /// Consecutive content-too-large failures since the last reset point.
    pub consecutive_content_too_large: u32,
    /// Whether patch fetches are currently suspended.
    pub should_skip_patches: bool,
    /// Why patches are suspended, when they are.
    pub skip_reason: Option<String>,
}

/// Tracks consecutive same-category fetch failures for one sync run.
#[derive(Debug, Clone)]
pub struct DegradationController {
    timeout_threshold: u32,
    content_too_large_threshold: u32,
    consecutive_timeouts: u32,
    consecutive_content_too_large: u32,
    degraded: bool,
    skip_reason: Option<String>,
    sticky: bool,
}

impl DegradationController {
    /// Creates a controller with one independent threshold per tracked
    /// category.
    ///
    /// Thresholds below 1 are treated as 1; a threshold of 1 means the very
    /// first error of that category trips the breaker.
    pub fn new(timeout_threshold: u32, content_too_large_threshold: u32) -> Self {
        Self {
            timeout_threshold: timeout_threshold.max(1),
            content_too_large_threshold: content_too_large_threshold.max(1),
            consecutive_timeouts: 0,
            consecutive_content_too_large: 0,
            degraded: false,
            skip_reason: None,
            sticky: false,
        }
    }

    /// Keeps the breaker tripped for the remainder of the run even after a
    /// success.
    ///
    /// The default is reset-on-success: one successful fetch re-arms patch
    /// fetching and counters reaccumulate from zero. Whether a single
    /// interleaved success should really mask a systemic problem is an open
    /// policy question, so the stickier variant is available behind this
    /// switch.
    pub fn with_sticky_degradation(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    /// Records a fetch failure.
    ///
    /// Increments the counter for `category` if it is tracked and zeroes the
    /// other tracked counter; untracked categories zero every counter and
    /// never trip the breaker. Returns true iff this call just reached the
    /// category's threshold.
    pub fn record_error(&mut self, category: ErrorCategory) -> bool {
        match category {
            ErrorCategory::Timeout => {
                self.consecutive_content_too_large = 0;
                self.consecutive_timeouts += 1;
                if self.consecutive_timeouts == self.timeout_threshold {
                    self.trip(format!(
                        "patch fetch suspended after {} consecutive timeout failures",
                        self.consecutive_timeouts
                    ));
                    return true;
                }
                false
            }
            ErrorCategory::ContentTooLarge => {
                self.consecutive_timeouts = 0;
                self.consecutive_content_too_large += 1;
                if self.consecutive_content_too_large == self.content_too_large_threshold {
                    self.trip(format!(
                        "patch fetch suspended after {} consecutive content_too_large failures",
                        self.consecutive_content_too_large
                    ));
                    return true;
                }
                false
            }
            _ => {
                // A different failure kind breaks every streak.
                self.consecutive_timeouts = 0;
                self.consecutive_content_too_large = 0;
                false
            }
        }
    }

    /// Records a successful fetch.
    ///
    /// Zeroes every counter. In the default mode this also re-arms the
    /// breaker; in sticky mode the degraded flag survives until [`reset`].
    ///
    /// [`reset`]: DegradationController::reset
    pub fn record_success(&mut self) {
        self.consecutive_timeouts = 0;
        self.consecutive_content_too_large = 0;
        if !self.sticky {
            self.degraded = false;
            self.skip_reason = None;
        }
    }

    /// Unconditionally clears counters and the breaker; used between
    /// independent batches.
    pub fn reset(&mut self) {
        self.consecutive_timeouts = 0;
        self.consecutive_content_too_large = 0;
        self.degraded = false;
        self.skip_reason = None;
    }

    /// Returns true when patch fetches should be skipped.
    pub fn should_skip_patches(&self) -> bool {
        self.degraded
    }

    /// Returns why patches are being skipped, when they are.
    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    /// Returns an observable snapshot for logging and tests.
    pub fn state(&self) -> DegradationState {
        DegradationState {
            consecutive_timeouts: self.consecutive_timeouts,
            consecutive_content_too_large: self.consecutive_content_too_large,
            should_skip_patches: self.degraded,
            skip_reason: self.skip_reason.clone(),
        }
    }

    fn trip(&mut self, reason: String) {
        self.degraded = true;
        self.skip_reason = Some(reason);
    }
}
