//! The reaper itself.
//!
//! Without the reaper, a crashed worker leaves its jobs, runs, and locks
//! permanently stuck and that repo's sync silently halts forever. Each
//! invocation performs three independent recovery passes:
//!
//! 1. **Jobs**: running jobs whose lease exceeded the grace window are
//!    classified by their `last_error` and transitioned to `dead`, `failed`
//!    with backoff, or back to `pending`.
//! 2. **Runs**: running runs past their wall-clock budget are marked failed
//!    with a fixed lease-lost summary; run timeouts are infrastructure-level,
//!    so no classification applies.
//! 3. **Locks**: locks past their grace window are force-released.
//!
//! Per-row failures are caught and counted so a single bad row never blocks
//! recovery of the rest; a discovery failure aborts the invocation, leaving
//! the passes that already completed intact.
//!
//! The reaper provides no ordering guarantee relative to live workers: a
//! worker may still be executing a job whose lease the reaper judges expired
//! (GC pause, network partition). That race is inherent to lease-based
//! queues; the guarantee is at-least-once processing, never silent loss, and
//! the store's status-guarded transitions are where the losing side of the
//! race finds out.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::classify::{classify, redact};
use crate::queue::{BackoffPolicy, RunFailureSummary, SyncJob};
use crate::storage::{JobStore, StoreError};

use super::config::{ReaperConfig, RecoveryPolicy};
use super::report::{JobPassReport, LockPassReport, ReaperReport, RunPassReport};

/// Errors that abort a reaper invocation.
#[derive(Debug, Error)]
pub enum ReaperError {
    /// A pass-level store failure, e.g. the connection dropped during
    /// discovery.
    #[error("{pass} pass failed: {source}")]
    PassFailed {
        pass: &'static str,
        #[source]
        source: StoreError,
    },
}

/// How one expired job was recovered.
enum JobOutcome {
    Dead,
    Failed,
    Pending,
    /// The row was no longer in a reapable state; a racing worker or another
    /// reaper got there first. Not an error.
    Skipped,
}

/// Recovers jobs, runs, and locks abandoned by crashed or hung workers.
pub struct Reaper {
    store: Arc<dyn JobStore>,
    config: ReaperConfig,
    backoff: BackoffPolicy,
}

impl Reaper {
    /// Creates a reaper over the given store.
    pub fn new(store: Arc<dyn JobStore>, config: ReaperConfig) -> Self {
        let backoff = BackoffPolicy::new(config.backoff_base_seconds, config.max_backoff_seconds);
        Self {
            store,
            config,
            backoff,
        }
    }

    /// Performs one full invocation: jobs, then runs, then locks.
    ///
    /// Each pass commits independently on the store side; an error here means
    /// the remaining passes were not attempted, not that completed ones were
    /// rolled back.
    pub async fn run_once(&self) -> Result<ReaperReport, ReaperError> {
        let jobs = self.reap_jobs().await?;
        let runs = self.reap_runs().await?;
        let locks = self.reap_locks().await?;

        let report = ReaperReport {
            jobs,
            runs,
            locks,
            dry_run: self.config.dry_run,
        };

        info!(
            jobs_processed = report.jobs.processed,
            runs_processed = report.runs.processed,
            locks_processed = report.locks.processed,
            errors = report.total_errors(),
            dry_run = report.dry_run,
            "Reaper invocation complete"
        );

        Ok(report)
    }

    /// Runs forever at the given interval.
    ///
    /// A failed invocation is logged and the loop continues at the next tick
    /// rather than crashing the process; callers own shutdown (ctrl-c etc.).
    pub async fn run_loop(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(report) => {
                    debug!(
                        processed = report.total_processed(),
                        "Reaper tick complete"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reaper invocation failed; continuing at next interval");
                }
            }
        }
    }

    // =========================================================================
    // Job pass
    // =========================================================================

    async fn reap_jobs(&self) -> Result<JobPassReport, ReaperError> {
        let expired = self
            .store
            .list_expired_running_jobs(self.config.job_grace_seconds)
            .await
            .map_err(|source| ReaperError::PassFailed {
                pass: "jobs",
                source,
            })?;

        let mut report = JobPassReport::default();

        for job in expired {
            report.processed += 1;

            if self.config.dry_run {
                info!(
                    job_id = %job.job_id,
                    repo_id = job.repo_id,
                    "Dry run: job lease expired, would recover"
                );
                continue;
            }

            match self.recover_job(&job).await {
                Ok(JobOutcome::Dead) => report.to_dead += 1,
                Ok(JobOutcome::Failed) => report.to_failed += 1,
                Ok(JobOutcome::Pending) => report.to_pending += 1,
                Ok(JobOutcome::Skipped) => {
                    debug!(
                        job_id = %job.job_id,
                        "Job no longer reapable; a racing process already handled it"
                    );
                }
                Err(e) => {
                    warn!(job_id = %job.job_id, error = %e, "Failed to recover job");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Applies the recovery policy to a single expired job.
    ///
    /// Strict priority order: permanent classification, then transient, then
    /// attempts exhaustion (unknown only), then the configured policy.
    async fn recover_job(&self, job: &SyncJob) -> Result<JobOutcome, StoreError> {
        let last_error = job.last_error.as_deref().unwrap_or("");
        let classification = classify(last_error);

        if classification.is_permanent() {
            let message = format!(
                "Reaped: permanent error ({}): {}",
                classification.category,
                redact(last_error)
            );
            let affected = self.store.mark_job_dead(job.job_id, &message).await?;
            if affected {
                info!(
                    job_id = %job.job_id,
                    category = %classification.category,
                    "Reaped job as dead: permanent error"
                );
            }
            return Ok(if affected {
                JobOutcome::Dead
            } else {
                JobOutcome::Skipped
            });
        }

        if classification.is_transient() {
            let delay = self
                .backoff
                .delay_seconds(job.attempts + 1, classification.category);
            let delay = ((delay as f64 * self.config.transient_retry_multiplier).round() as i64)
                .max(1);
            let message = format!(
                "Reaped: transient error ({}): {}",
                classification.category,
                redact(last_error)
            );
            let affected = self
                .store
                .mark_job_failed(job.job_id, &message, delay)
                .await?;
            if affected {
                info!(
                    job_id = %job.job_id,
                    category = %classification.category,
                    retry_delay_seconds = delay,
                    "Reaped job as failed: transient error, retry after backoff"
                );
            }
            return Ok(if affected {
                JobOutcome::Failed
            } else {
                JobOutcome::Skipped
            });
        }

        // Unknown classification from here on.
        if job.attempts_exhausted() {
            let message = format!(
                "Reaped: expired after max attempts ({}/{})",
                job.attempts, job.max_attempts
            );
            let affected = self.store.mark_job_dead(job.job_id, &message).await?;
            if affected {
                info!(
                    job_id = %job.job_id,
                    attempts = job.attempts,
                    "Reaped job as dead: max attempts exhausted"
                );
            }
            return Ok(if affected {
                JobOutcome::Dead
            } else {
                JobOutcome::Skipped
            });
        }

        match self.config.policy {
            RecoveryPolicy::ToPending => {
                let affected = self.store.mark_job_pending(job.job_id).await?;
                if affected {
                    info!(job_id = %job.job_id, "Reaped job back to pending");
                }
                Ok(if affected {
                    JobOutcome::Pending
                } else {
                    JobOutcome::Skipped
                })
            }
            RecoveryPolicy::ToFailed => {
                let affected = self
                    .store
                    .mark_job_failed(
                        job.job_id,
                        "Reaped: job lock expired",
                        self.config.retry_delay_seconds,
                    )
                    .await?;
                if affected {
                    info!(
                        job_id = %job.job_id,
                        retry_delay_seconds = self.config.retry_delay_seconds,
                        "Reaped job as failed: lock expired"
                    );
                }
                Ok(if affected {
                    JobOutcome::Failed
                } else {
                    JobOutcome::Skipped
                })
            }
        }
    }

    // =========================================================================
    // Run pass
    // =========================================================================

    async fn reap_runs(&self) -> Result<RunPassReport, ReaperError> {
        let expired = self
            .store
            .list_expired_running_runs(self.config.run_max_duration_seconds)
            .await
            .map_err(|source| ReaperError::PassFailed {
                pass: "runs",
                source,
            })?;

        let mut report = RunPassReport::default();
        let summary = RunFailureSummary::lease_lost();

        for run in expired {
            report.processed += 1;

            if self.config.dry_run {
                info!(run_id = %run.run_id, "Dry run: sync run timed out, would fail");
                continue;
            }

            match self.store.mark_run_failed(run.run_id, &summary).await {
                Ok(true) => {
                    info!(
                        run_id = %run.run_id,
                        job_id = %run.job_id,
                        "Reaped run as failed: timed out"
                    );
                    report.failed += 1;
                }
                Ok(false) => {
                    debug!(run_id = %run.run_id, "Run already finished; nothing to reap");
                }
                Err(e) => {
                    warn!(run_id = %run.run_id, error = %e, "Failed to reap run");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    // =========================================================================
    // Lock pass
    // =========================================================================

    async fn reap_locks(&self) -> Result<LockPassReport, ReaperError> {
        let expired = self
            .store
            .list_expired_locks(self.config.lock_grace_seconds)
            .await
            .map_err(|source| ReaperError::PassFailed {
                pass: "locks",
                source,
            })?;

        let mut report = LockPassReport::default();

        for lock in expired {
            report.processed += 1;

            if self.config.dry_run {
                info!(
                    lock_id = %lock.lock_id,
                    resource = %lock.resource,
                    "Dry run: lock expired, would release"
                );
                continue;
            }

            match self.store.force_release_lock(lock.lock_id).await {
                Ok(true) => {
                    info!(
                        lock_id = %lock.lock_id,
                        resource = %lock.resource,
                        holder = %lock.holder,
                        "Force-released expired lock"
                    );
                    report.released += 1;
                }
                Ok(false) => {
                    debug!(lock_id = %lock.lock_id, "Lock already released");
                }
                Err(e) => {
                    warn!(lock_id = %lock.lock_id, error = %e, "Failed to release lock");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    use crate::queue::{
        JobStatus, JobTypeRegistry, PhysicalJobType, RunStatus, SyncLock, SyncRun,
    };
    use crate::storage::MemoryJobStore;

    use super::*;

    fn expired_job(last_error: Option<&str>, attempts: u32, max_attempts: u32) -> SyncJob {
        let now = Utc::now();
        SyncJob {
            job_id: Uuid::new_v4(),
            repo_id: 1,
            physical_job_type: PhysicalJobType::GitlabCommits,
            priority: 100,
            status: JobStatus::Running,
            attempts,
            max_attempts,
            locked_by: Some("worker-1".to_string()),
            locked_at: Some(now - ChronoDuration::seconds(600)),
            last_error: last_error.map(str::to_string),
            not_before: None,
            created_at: now - ChronoDuration::seconds(700),
        }
    }

    fn reaper_over(store: Arc<MemoryJobStore>, config: ReaperConfig) -> Reaper {
        Reaper::new(store, config)
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_mutating() {
        let store = Arc::new(MemoryJobStore::new(JobTypeRegistry::new()));
        let job = expired_job(Some("connection timeout"), 1, 5);
        store.insert_job(job.clone());
        store.insert_run(SyncRun {
            run_id: Uuid::new_v4(),
            job_id: job.job_id,
            worker_id: "worker-1".to_string(),
            started_at: Utc::now() - ChronoDuration::seconds(7200),
            status: RunStatus::Running,
            failure: None,
        });
        store.insert_lock(SyncLock {
            lock_id: Uuid::new_v4(),
            resource: "repo:1".to_string(),
            holder: "worker-1".to_string(),
            acquired_at: Utc::now() - ChronoDuration::seconds(7200),
        });

        let config = ReaperConfig::new()
            .with_job_grace_seconds(60)
            .with_run_max_duration_seconds(3600)
            .with_lock_grace_seconds(3600)
            .with_dry_run(true);
        let report = reaper_over(Arc::clone(&store), config)
            .run_once()
            .await
            .expect("dry run succeeds");

        assert!(report.dry_run);
        assert_eq!(report.jobs.processed, 1);
        assert_eq!(report.runs.processed, 1);
        assert_eq!(report.locks.processed, 1);
        assert_eq!(report.jobs.to_failed + report.jobs.to_dead + report.jobs.to_pending, 0);
        assert_eq!(report.runs.failed, 0);
        assert_eq!(report.locks.released, 0);

        // Nothing moved.
        let untouched = store.get_job(job.job_id).expect("job still present");
        assert_eq!(untouched.status, JobStatus::Running);
        assert!(untouched.has_lease());
    }

    #[tokio::test]
    async fn test_expired_run_gets_lease_lost_summary() {
        let store = Arc::new(MemoryJobStore::new(JobTypeRegistry::new()));
        let run_id = Uuid::new_v4();
        store.insert_run(SyncRun {
            run_id,
            job_id: Uuid::new_v4(),
            worker_id: "worker-1".to_string(),
            started_at: Utc::now() - ChronoDuration::seconds(7200),
            status: RunStatus::Running,
            failure: None,
        });

        let config = ReaperConfig::new().with_run_max_duration_seconds(3600);
        let report = reaper_over(Arc::clone(&store), config)
            .run_once()
            .await
            .expect("invocation succeeds");

        assert_eq!(report.runs.processed, 1);
        assert_eq!(report.runs.failed, 1);

        let run = store.get_run(run_id).expect("run present");
        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.failure.expect("summary recorded");
        assert_eq!(failure.error_type, "lease_lost");
        assert_eq!(failure.error_category, "timeout");
        assert_eq!(failure.message, "Reaped: sync run timed out");
    }

    #[tokio::test]
    async fn test_fresh_resources_are_left_alone() {
        let store = Arc::new(MemoryJobStore::new(JobTypeRegistry::new()));
        let now = Utc::now();
        let mut job = expired_job(None, 1, 5);
        job.locked_at = Some(now - ChronoDuration::seconds(10));
        store.insert_job(job);
        store.insert_lock(SyncLock {
            lock_id: Uuid::new_v4(),
            resource: "repo:1".to_string(),
            holder: "worker-1".to_string(),
            acquired_at: now - ChronoDuration::seconds(10),
        });

        let config = ReaperConfig::new()
            .with_job_grace_seconds(900)
            .with_lock_grace_seconds(900);
        let report = reaper_over(store, config)
            .run_once()
            .await
            .expect("invocation succeeds");

        assert_eq!(report.total_processed(), 0);
    }

    #[tokio::test]
    async fn test_expired_lock_is_released() {
        let store = Arc::new(MemoryJobStore::new(JobTypeRegistry::new()));
        let lock_id = Uuid::new_v4();
        store.insert_lock(SyncLock {
            lock_id,
            resource: "repo:7".to_string(),
            holder: "worker-3".to_string(),
            acquired_at: Utc::now() - ChronoDuration::seconds(7200),
        });

        let config = ReaperConfig::new().with_lock_grace_seconds(1800);
        let report = reaper_over(Arc::clone(&store), config)
            .run_once()
            .await
            .expect("invocation succeeds");

        assert_eq!(report.locks.processed, 1);
        assert_eq!(report.locks.released, 1);
        assert!(!store.lock_exists(lock_id));
    }

    #[tokio::test]
    async fn test_transient_backoff_uses_multiplier() {
        let store = Arc::new(MemoryJobStore::new(JobTypeRegistry::new()));
        // attempts+1 = 2 on the backoff curve: base 10 doubles to 20, then
        // the multiplier triples it.
        let job = expired_job(Some("connection timeout"), 1, 5);
        store.insert_job(job.clone());

        let config = ReaperConfig::new()
            .with_job_grace_seconds(60)
            .with_backoff_seconds(10, 3600)
            .with_transient_retry_multiplier(3.0);
        reaper_over(Arc::clone(&store), config)
            .run_once()
            .await
            .expect("invocation succeeds");

        let failed = store.get_job(job.job_id).expect("row kept");
        let gate = failed.not_before.expect("backoff gate set");
        let delta = (gate - Utc::now()).num_seconds();
        assert!((55..=60).contains(&delta), "expected ~60s gate, got {delta}s");
    }
}
