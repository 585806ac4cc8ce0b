//! Queue row models: jobs, runs, and locks.
//!
//! Three resource classes share the lease-based recovery story:
//!
//! - `SyncJob`: a unit of queued sync work, claimed under a `(locked_by,
//!   locked_at)` lease
//! - `SyncRun`: one execution attempt, with its own wall-clock budget
//!   independent of the job lease
//! - `SyncLock`: an advisory per-resource lock (e.g. per-repo serialization)
//!
//! All three are owned by the database; this module only models the rows and
//! the expiry predicates the reaper evaluates over them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job_type::{LogicalJobType, PhysicalJobType};

/// Default maximum number of attempts before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker; lease fields are set.
    Running,
    /// Failed but retriable once `not_before` passes.
    Failed,
    /// Terminal; no further retries.
    Dead,
}

impl JobStatus {
    /// Returns the string form stored on job rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }

    /// Parses a stored status string.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "failed" => Some(JobStatus::Failed),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error (including reaped timeouts).
    Failed,
}

impl RunStatus {
    /// Returns the string form stored on run rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Parses a stored status string.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of queued sync work.
///
/// Invariant: `status == Running` if and only if `locked_by` and `locked_at`
/// are both set. The store's claim operation establishes the lease and every
/// recovery transition clears or replaces it; nothing mutates the fields
/// independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    /// Unique identifier.
    pub job_id: Uuid,
    /// Repository this job syncs.
    pub repo_id: i64,
    /// Physical queue key; the logical intent is derived, never stored.
    pub physical_job_type: PhysicalJobType,
    /// Scheduling priority; lower values are claimed first.
    pub priority: i32,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Number of executions started so far.
    pub attempts: u32,
    /// Attempt ceiling; 0 means unlimited.
    pub max_attempts: u32,
    /// Worker currently holding the lease.
    pub locked_by: Option<String>,
    /// When the lease was taken.
    pub locked_at: Option<DateTime<Utc>>,
    /// Message from the most recent failure.
    pub last_error: Option<String>,
    /// Backoff gate; the job is not claimable before this instant.
    pub not_before: Option<DateTime<Utc>>,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
}

impl SyncJob {
    /// Returns the logical intent behind this job's queue key.
    pub fn logical_job_type(&self) -> LogicalJobType {
        self.physical_job_type.logical()
    }

    /// Returns true when both lease fields are set.
    pub fn has_lease(&self) -> bool {
        self.locked_by.is_some() && self.locked_at.is_some()
    }

    /// Returns true when the job is running on a lease older than the grace
    /// window, making it eligible for reaping.
    pub fn lease_expired(&self, now: DateTime<Utc>, grace_seconds: i64) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        match self.locked_at {
            Some(locked_at) => now - locked_at > Duration::seconds(grace_seconds),
            // Running without a lease violates the row invariant; treat it as
            // expired so the reaper repairs it rather than skipping it.
            None => true,
        }
    }

    /// Returns true when the attempt ceiling is set and reached.
    pub fn attempts_exhausted(&self) -> bool {
        self.max_attempts > 0 && self.attempts >= self.max_attempts
    }

    /// Returns true when a worker may claim this job right now.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        match self.not_before {
            Some(gate) => now >= gate,
            None => true,
        }
    }
}

/// Request to enqueue a new sync job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Repository to sync.
    pub repo_id: i64,
    /// Physical queue key.
    pub physical_job_type: PhysicalJobType,
    /// Attempt ceiling; 0 means unlimited.
    pub max_attempts: u32,
    /// Explicit priority override; the registry default applies when unset.
    pub priority: Option<i32>,
}

impl NewJob {
    /// Creates an enqueue request with the default attempt ceiling.
    pub fn new(repo_id: i64, physical_job_type: PhysicalJobType) -> Self {
        Self {
            repo_id,
            physical_job_type,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            priority: None,
        }
    }

    /// Sets the attempt ceiling (0 = unlimited).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Overrides the registry's default priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// One execution attempt against a job.
///
/// Runs carry their own wall-clock budget: a worker can keep a fresh job
/// lease while its run is stuck in a slow network call, so run expiry is
/// checked against `started_at` regardless of lease staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    /// Unique identifier.
    pub run_id: Uuid,
    /// Job this run executes.
    pub job_id: Uuid,
    /// Worker executing the run.
    pub worker_id: String,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// Lifecycle state.
    pub status: RunStatus,
    /// Failure record, set when the run ends in `Failed`.
    pub failure: Option<RunFailureSummary>,
}

impl SyncRun {
    /// Returns true when the run has been executing longer than its budget.
    pub fn expired(&self, now: DateTime<Utc>, max_duration_seconds: i64) -> bool {
        self.status == RunStatus::Running
            && now - self.started_at > Duration::seconds(max_duration_seconds)
    }
}

/// An advisory resource lock, independent of job leases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLock {
    /// Unique identifier.
    pub lock_id: Uuid,
    /// Resource key, e.g. a repo identifier for per-repo serialization.
    pub resource: String,
    /// Process holding the lock.
    pub holder: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

impl SyncLock {
    /// Returns true when the lock is older than the grace window and must be
    /// force-released to avoid starving future work on the resource.
    pub fn expired(&self, now: DateTime<Utc>, grace_seconds: i64) -> bool {
        now - self.acquired_at > Duration::seconds(grace_seconds)
    }
}

/// Structured failure record written onto a reaped run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailureSummary {
    /// Machine-readable failure kind.
    pub error_type: String,
    /// Failure category for downstream aggregation.
    pub error_category: String,
    /// Human-readable message.
    pub message: String,
}

impl RunFailureSummary {
    /// Summary for a run whose worker lost its lease or blew its time budget.
    ///
    /// Run timeouts are always infrastructure-level; no classification of
    /// business errors applies here.
    pub fn lease_lost() -> Self {
        Self {
            error_type: "lease_lost".to_string(),
            error_category: "timeout".to_string(),
            message: "Reaped: sync run timed out".to_string(),
        }
    }
}
