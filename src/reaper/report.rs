//! Structured results of a reaper invocation.
//!
//! Reports are always produced, partial failure included: a job that errors
//! mid-recovery stays in `processed` and is counted under `errors`, never
//! silently excluded.

use serde::{Deserialize, Serialize};

/// Outcome counts for the job recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPassReport {
    /// Expired jobs discovered.
    pub processed: u64,
    /// Jobs transitioned to `failed` (retriable).
    pub to_failed: u64,
    /// Jobs transitioned to `dead` (terminal).
    pub to_dead: u64,
    /// Jobs returned to `pending`.
    pub to_pending: u64,
    /// Jobs whose recovery errored.
    pub errors: u64,
}

/// Outcome counts for the run recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPassReport {
    /// Expired runs discovered.
    pub processed: u64,
    /// Runs marked failed.
    pub failed: u64,
    /// Runs whose recovery errored.
    pub errors: u64,
}

/// Outcome counts for the lock recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPassReport {
    /// Expired locks discovered.
    pub processed: u64,
    /// Locks force-released.
    pub released: u64,
    /// Locks whose release errored.
    pub errors: u64,
}

/// Combined result of one reaper invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaperReport {
    /// Job pass counts.
    pub jobs: JobPassReport,
    /// Run pass counts.
    pub runs: RunPassReport,
    /// Lock pass counts.
    pub locks: LockPassReport,
    /// Whether this invocation ran in dry-run mode.
    pub dry_run: bool,
}

impl ReaperReport {
    /// Total per-row errors across all passes.
    pub fn total_errors(&self) -> u64 {
        self.jobs.errors + self.runs.errors + self.locks.errors
    }

    /// Total expired resources discovered across all passes.
    pub fn total_processed(&self) -> u64 {
        self.jobs.processed + self.runs.processed + self.locks.processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_totals() {
        let report = ReaperReport {
            jobs: JobPassReport {
                processed: 5,
                to_failed: 2,
                to_dead: 1,
                to_pending: 1,
                errors: 1,
            },
            runs: RunPassReport {
                processed: 2,
                failed: 2,
                errors: 0,
            },
            locks: LockPassReport {
                processed: 1,
                released: 0,
                errors: 1,
            },
            dry_run: false,
        };

        assert_eq!(report.total_processed(), 8);
        assert_eq!(report.total_errors(), 2);
    }

    #[test]
    fn test_report_serializes_with_pass_nesting() {
        let report = ReaperReport {
            dry_run: true,
            ..Default::default()
        };

        let json = serde_json::to_value(&report).expect("report should serialize");
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["jobs"]["processed"], 0);
        assert_eq!(json["runs"]["failed"], 0);
        assert_eq!(json["locks"]["released"], 0);
    }
}
