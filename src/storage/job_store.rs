//! Store abstraction the reaper recovers through.
//!
//! The reaper never talks to a database driver directly; it is handed a
//! [`JobStore`] at construction. Production wires in
//! [`PgJobStore`](super::PgJobStore), tests wire in
//! [`MemoryJobStore`](super::MemoryJobStore); both satisfy the same trait,
//! selected by constructor injection rather than any runtime swapping.
//!
//! Mark operations return whether the row existed and was in a state the
//! transition applies to. A `false` is not an error: it usually means a
//! racing worker finished or another reaper got there first.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::queue::{RunFailureSummary, SyncJob, SyncLock, SyncRun};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the backing database.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A row held a value the models cannot represent.
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

/// Queue depth by job status.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    /// Jobs waiting to be claimed.
    pub pending: u64,
    /// Jobs currently leased.
    pub running: u64,
    /// Jobs awaiting retry.
    pub failed: u64,
    /// Terminal jobs kept for inspection.
    pub dead: u64,
}

impl QueueStats {
    /// Total rows across all states.
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.failed + self.dead
    }
}

/// Transactional access to jobs, runs, and locks.
///
/// Every method is one short transaction on the store side; callers must not
/// assume any cross-call atomicity. The expired-listing queries are read-only
/// and evaluate their grace windows against the store's clock.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Jobs with `status = running` whose lease is older than the grace
    /// window.
    async fn list_expired_running_jobs(
        &self,
        grace_seconds: i64,
    ) -> Result<Vec<SyncJob>, StoreError>;

    /// Runs with `status = running` that have exceeded their wall-clock
    /// budget, independent of job lease staleness.
    async fn list_expired_running_runs(
        &self,
        max_duration_seconds: i64,
    ) -> Result<Vec<SyncRun>, StoreError>;

    /// Locks older than the grace window.
    async fn list_expired_locks(&self, grace_seconds: i64) -> Result<Vec<SyncLock>, StoreError>;

    /// Terminal transition: `running → dead`, recording the error. No
    /// further retries will happen.
    async fn mark_job_dead(&self, job_id: Uuid, error: &str) -> Result<bool, StoreError>;

    /// Retriable transition: `running → failed`, recording the error and
    /// gating the next claim behind `now + retry_delay_seconds`.
    async fn mark_job_failed(
        &self,
        job_id: Uuid,
        error: &str,
        retry_delay_seconds: i64,
    ) -> Result<bool, StoreError>;

    /// Lease-release transition: `running → pending` with the lease and
    /// backoff gate cleared; the job becomes immediately claimable.
    async fn mark_job_pending(&self, job_id: Uuid) -> Result<bool, StoreError>;

    /// Marks a run failed with the given summary.
    async fn mark_run_failed(
        &self,
        run_id: Uuid,
        summary: &RunFailureSummary,
    ) -> Result<bool, StoreError>;

    /// Force-releases a lock regardless of holder.
    async fn force_release_lock(&self, lock_id: Uuid) -> Result<bool, StoreError>;
}
