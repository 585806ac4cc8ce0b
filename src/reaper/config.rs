//! Reaper configuration.

use serde::{Deserialize, Serialize};

/// What to do with an expired job whose error classifies as unknown and whose
/// attempts are not exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Mark the job failed with a generic lock-expired message and the
    /// configured retry delay. The safe default.
    ToFailed,
    /// Clear the lease and return the job to pending, immediately claimable
    /// with no backoff and no error recorded. Use when lock loss is suspected
    /// rather than application failure.
    ToPending,
}

impl RecoveryPolicy {
    /// Returns the flag-style string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryPolicy::ToFailed => "to_failed",
            RecoveryPolicy::ToPending => "to_pending",
        }
    }
}

impl std::fmt::Display for RecoveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecoveryPolicy {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "to_failed" => Ok(RecoveryPolicy::ToFailed),
            "to_pending" => Ok(RecoveryPolicy::ToPending),
            other => Err(format!(
                "unknown recovery policy '{other}' (expected to_failed or to_pending)"
            )),
        }
    }
}

/// Configuration for one reaper instance.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Age a running job's lease must exceed before it is reaped.
    pub job_grace_seconds: i64,
    /// Wall-clock budget a run may execute before it is reaped, independent
    /// of its job's lease.
    pub run_max_duration_seconds: i64,
    /// Age a lock must exceed before it is force-released.
    pub lock_grace_seconds: i64,
    /// Recovery policy for unknown-classification jobs with attempts left.
    pub policy: RecoveryPolicy,
    /// Retry delay applied by the `to_failed` policy branch.
    pub retry_delay_seconds: i64,
    /// Scale factor applied on top of computed backoff for transient errors.
    pub transient_retry_multiplier: f64,
    /// Base delay fed into the backoff curve for transient errors.
    pub backoff_base_seconds: u64,
    /// Cap on computed backoff for transient errors.
    pub max_backoff_seconds: u64,
    /// Discover and count, but mutate nothing.
    pub dry_run: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            job_grace_seconds: 900,
            run_max_duration_seconds: 3600,
            lock_grace_seconds: 1800,
            policy: RecoveryPolicy::ToFailed,
            retry_delay_seconds: 300,
            transient_retry_multiplier: 1.0,
            backoff_base_seconds: 60,
            max_backoff_seconds: 3600,
            dry_run: false,
        }
    }
}

impl ReaperConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the job lease grace window.
    pub fn with_job_grace_seconds(mut self, seconds: i64) -> Self {
        self.job_grace_seconds = seconds;
        self
    }

    /// Sets the run wall-clock budget.
    pub fn with_run_max_duration_seconds(mut self, seconds: i64) -> Self {
        self.run_max_duration_seconds = seconds;
        self
    }

    /// Sets the lock grace window.
    pub fn with_lock_grace_seconds(mut self, seconds: i64) -> Self {
        self.lock_grace_seconds = seconds;
        self
    }

    /// Sets the recovery policy.
    pub fn with_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the `to_failed` retry delay.
    pub fn with_retry_delay_seconds(mut self, seconds: i64) -> Self {
        self.retry_delay_seconds = seconds;
        self
    }

    /// Sets the transient backoff multiplier.
    pub fn with_transient_retry_multiplier(mut self, multiplier: f64) -> Self {
        self.transient_retry_multiplier = multiplier;
        self
    }

    /// Sets the transient backoff curve parameters.
    pub fn with_backoff_seconds(mut self, base: u64, max: u64) -> Self {
        self.backoff_base_seconds = base;
        self.max_backoff_seconds = max;
        self
    }

    /// Enables or disables dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse() {
        assert_eq!("to_failed".parse(), Ok(RecoveryPolicy::ToFailed));
        assert_eq!(" TO_PENDING ".parse(), Ok(RecoveryPolicy::ToPending));
        assert!("to_dead".parse::<RecoveryPolicy>().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = ReaperConfig::new()
            .with_job_grace_seconds(60)
            .with_run_max_duration_seconds(120)
            .with_lock_grace_seconds(90)
            .with_policy(RecoveryPolicy::ToPending)
            .with_retry_delay_seconds(30)
            .with_transient_retry_multiplier(2.0)
            .with_backoff_seconds(10, 600)
            .with_dry_run(true);

        assert_eq!(config.job_grace_seconds, 60);
        assert_eq!(config.run_max_duration_seconds, 120);
        assert_eq!(config.lock_grace_seconds, 90);
        assert_eq!(config.policy, RecoveryPolicy::ToPending);
        assert_eq!(config.retry_delay_seconds, 30);
        assert!((config.transient_retry_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.backoff_base_seconds, 10);
        assert_eq!(config.max_backoff_seconds, 600);
        assert!(config.dry_run);
    }

    #[test]
    fn test_default_policy_is_to_failed() {
        assert_eq!(ReaperConfig::default().policy, RecoveryPolicy::ToFailed);
    }
}
