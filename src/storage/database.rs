//! PostgreSQL-backed job store.
//!
//! Owns the `sync_jobs`, `sync_runs`, and `sync_locks` tables (schema managed
//! externally) and implements both the recovery surface the reaper needs
//! ([`JobStore`]) and the queue surface the scheduler and workers use
//! (enqueue, claim, complete).
//!
//! Every mutation is a single short UPDATE/DELETE guarded by the expected
//! current status, so a racing worker and the reaper can never clobber each
//! other: whichever statement runs second simply affects zero rows. Claiming
//! uses `FOR UPDATE SKIP LOCKED` so concurrent claimants select disjoint
//! rows.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::queue::{
    JobStatus, JobTypeRegistry, NewJob, PhysicalJobType, RunFailureSummary, RunStatus, SyncJob,
    SyncLock, SyncRun,
};

use super::job_store::{JobStore, QueueStats, StoreError};

/// PostgreSQL job store.
pub struct PgJobStore {
    pool: PgPool,
    registry: JobTypeRegistry,
}

impl PgJobStore {
    /// Connects to the database and returns a new store.
    ///
    /// # Arguments
    ///
    /// * `database_url` - PostgreSQL connection string
    /// * `registry` - job type registry used to resolve enqueue priorities
    pub async fn connect(
        database_url: &str,
        registry: JobTypeRegistry,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool, registry })
    }

    /// Creates a store from an existing pool.
    pub fn from_pool(pool: PgPool, registry: JobTypeRegistry) -> Self {
        Self { pool, registry }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // =========================================================================
    // Queue Operations
    // =========================================================================

    /// Enqueues a new pending job.
    ///
    /// The scheduling priority comes from the request override when present,
    /// otherwise from the registry's default for the physical type.
    pub async fn enqueue_job(&self, request: NewJob) -> Result<SyncJob, StoreError> {
        let priority = request.priority.unwrap_or_else(|| {
            self.registry
                .default_priority(request.physical_job_type.as_str())
        });

        let job = SyncJob {
            job_id: Uuid::new_v4(),
            repo_id: request.repo_id,
            physical_job_type: request.physical_job_type,
            priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: request.max_attempts,
            locked_by: None,
            locked_at: None,
            last_error: None,
            not_before: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                job_id, repo_id, physical_job_type, priority, status,
                attempts, max_attempts, created_at
            ) VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6)
            "#,
        )
        .bind(job.job_id)
        .bind(job.repo_id)
        .bind(job.physical_job_type.as_str())
        .bind(job.priority)
        .bind(job.max_attempts as i32)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    /// Atomically claims the next claimable job for a worker.
    ///
    /// `pending → running` plus lease assignment happens in one statement;
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent claimants off the same row.
    /// An empty `kinds` slice claims any physical type.
    pub async fn claim_next_job(
        &self,
        worker_id: &str,
        kinds: &[PhysicalJobType],
    ) -> Result<Option<SyncJob>, StoreError> {
        let kind_strings: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();

        let row = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'running', locked_by = $1, locked_at = now(),
                attempts = attempts + 1
            WHERE job_id = (
                SELECT job_id FROM sync_jobs
                WHERE status = 'pending'
                  AND (not_before IS NULL OR not_before <= now())
                  AND (cardinality($2::text[]) = 0 OR physical_job_type = ANY($2))
                ORDER BY priority ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING job_id, repo_id, physical_job_type, priority, status,
                      attempts, max_attempts, locked_by, locked_at,
                      last_error, not_before, created_at
            "#,
        )
        .bind(worker_id)
        .bind(&kind_strings)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    /// Removes a completed job, but only if `worker_id` still holds its lease.
    ///
    /// A `false` return means the reaper reclaimed the job mid-run; the
    /// worker must discard its result.
    pub async fn complete_job(&self, job_id: Uuid, worker_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_jobs
            WHERE job_id = $1 AND status = 'running' AND locked_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns queue depth by status.
    pub async fn queue_stats(&self) -> Result<QueueStats, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM sync_jobs
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            let count = count.max(0) as u64;
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::Running) => stats.running = count,
                Some(JobStatus::Failed) => stats.failed = count,
                Some(JobStatus::Dead) => stats.dead = count,
                None => {
                    return Err(StoreError::InvalidRow(format!(
                        "unknown job status '{status}'"
                    )))
                }
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn list_expired_running_jobs(
        &self,
        grace_seconds: i64,
    ) -> Result<Vec<SyncJob>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, repo_id, physical_job_type, priority, status,
                   attempts, max_attempts, locked_by, locked_at,
                   last_error, not_before, created_at
            FROM sync_jobs
            WHERE status = 'running'
              AND locked_at < now() - make_interval(secs => $1)
            ORDER BY locked_at ASC
            "#,
        )
        .bind(grace_seconds as f64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn list_expired_running_runs(
        &self,
        max_duration_seconds: i64,
    ) -> Result<Vec<SyncRun>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, job_id, worker_id, started_at, status,
                   error_type, error_category, error_message
            FROM sync_runs
            WHERE status = 'running'
              AND started_at < now() - make_interval(secs => $1)
            ORDER BY started_at ASC
            "#,
        )
        .bind(max_duration_seconds as f64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(run_from_row).collect()
    }

    async fn list_expired_locks(&self, grace_seconds: i64) -> Result<Vec<SyncLock>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT lock_id, resource, holder, acquired_at
            FROM sync_locks
            WHERE acquired_at < now() - make_interval(secs => $1)
            ORDER BY acquired_at ASC
            "#,
        )
        .bind(grace_seconds as f64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(lock_from_row).collect())
    }

    async fn mark_job_dead(&self, job_id: Uuid, error: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'dead', last_error = $2,
                locked_by = NULL, locked_at = NULL, not_before = NULL
            WHERE job_id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_job_failed(
        &self,
        job_id: Uuid,
        error: &str,
        retry_delay_seconds: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'failed', last_error = $2,
                not_before = now() + make_interval(secs => $3),
                locked_by = NULL, locked_at = NULL
            WHERE job_id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(retry_delay_seconds as f64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_job_pending(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'pending',
                locked_by = NULL, locked_at = NULL, not_before = NULL
            WHERE job_id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_run_failed(
        &self,
        run_id: Uuid,
        summary: &RunFailureSummary,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = 'failed', error_type = $2,
                error_category = $3, error_message = $4
            WHERE run_id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id)
        .bind(&summary.error_type)
        .bind(&summary.error_category)
        .bind(&summary.message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn force_release_lock(&self, lock_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sync_locks WHERE lock_id = $1")
            .bind(lock_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Maps a `sync_jobs` row into the model.
fn job_from_row(row: &PgRow) -> Result<SyncJob, StoreError> {
    let type_str: String = row.get("physical_job_type");
    let physical_job_type = PhysicalJobType::parse(&type_str).ok_or_else(|| {
        StoreError::InvalidRow(format!("unknown physical job type '{type_str}'"))
    })?;

    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| StoreError::InvalidRow(format!("unknown job status '{status_str}'")))?;

    let attempts: i32 = row.get("attempts");
    let max_attempts: i32 = row.get("max_attempts");

    Ok(SyncJob {
        job_id: row.get("job_id"),
        repo_id: row.get("repo_id"),
        physical_job_type,
        priority: row.get("priority"),
        status,
        attempts: attempts.max(0) as u32,
        max_attempts: max_attempts.max(0) as u32,
        locked_by: row.get("locked_by"),
        locked_at: row.get("locked_at"),
        last_error: row.get("last_error"),
        not_before: row.get("not_before"),
        created_at: row.get("created_at"),
    })
}

/// Maps a `sync_runs` row into the model.
fn run_from_row(row: &PgRow) -> Result<SyncRun, StoreError> {
    let status_str: String = row.get("status");
    let status = RunStatus::parse(&status_str)
        .ok_or_else(|| StoreError::InvalidRow(format!("unknown run status '{status_str}'")))?;

    let error_type: Option<String> = row.get("error_type");
    let failure = error_type.map(|error_type| RunFailureSummary {
        error_type,
        error_category: row
            .get::<Option<String>, _>("error_category")
            .unwrap_or_default(),
        message: row
            .get::<Option<String>, _>("error_message")
            .unwrap_or_default(),
    });

    Ok(SyncRun {
        run_id: row.get("run_id"),
        job_id: row.get("job_id"),
        worker_id: row.get("worker_id"),
        started_at: row.get("started_at"),
        status,
        failure,
    })
}

/// Maps a `sync_locks` row into the model.
fn lock_from_row(row: &PgRow) -> SyncLock {
    SyncLock {
        lock_id: row.get("lock_id"),
        resource: row.get("resource"),
        holder: row.get("holder"),
        acquired_at: row.get("acquired_at"),
    }
}
