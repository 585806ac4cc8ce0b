//! In-memory [`JobStore`] implementation.
//!
//! Backs tests and local development with the same trait surface as
//! [`PgJobStore`](super::PgJobStore). A single mutex around the maps stands
//! in for the database's row locking: claim and mark operations are atomic
//! because nothing else can observe the maps mid-mutation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::queue::{
    JobStatus, JobTypeRegistry, NewJob, PhysicalJobType, RunFailureSummary, RunStatus, SyncJob,
    SyncLock, SyncRun,
};

use super::job_store::{JobStore, QueueStats, StoreError};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, SyncJob>,
    runs: HashMap<Uuid, SyncRun>,
    locks: HashMap<Uuid, SyncLock>,
}

/// Mutex-backed job store for tests and local development.
pub struct MemoryJobStore {
    registry: JobTypeRegistry,
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    pub fn new(registry: JobTypeRegistry) -> Self {
        Self {
            registry,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }

    /// Seeds a job row directly, bypassing enqueue. Test setup helper.
    pub fn insert_job(&self, job: SyncJob) {
        self.lock_inner().jobs.insert(job.job_id, job);
    }

    /// Seeds a run row directly. Test setup helper.
    pub fn insert_run(&self, run: SyncRun) {
        self.lock_inner().runs.insert(run.run_id, run);
    }

    /// Seeds a lock row directly. Test setup helper.
    pub fn insert_lock(&self, lock: SyncLock) {
        self.lock_inner().locks.insert(lock.lock_id, lock);
    }

    /// Returns a snapshot of a job row.
    pub fn get_job(&self, job_id: Uuid) -> Option<SyncJob> {
        self.lock_inner().jobs.get(&job_id).cloned()
    }

    /// Returns a snapshot of a run row.
    pub fn get_run(&self, run_id: Uuid) -> Option<SyncRun> {
        self.lock_inner().runs.get(&run_id).cloned()
    }

    /// Returns whether a lock row still exists.
    pub fn lock_exists(&self, lock_id: Uuid) -> bool {
        self.lock_inner().locks.contains_key(&lock_id)
    }

    /// Enqueues a new pending job, resolving the default priority through the
    /// registry when the request carries no override.
    pub fn enqueue_job(&self, request: NewJob) -> SyncJob {
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

        self.lock_inner().jobs.insert(job.job_id, job.clone());
        job
    }

    /// Atomically claims the next claimable job for a worker.
    ///
    /// Selection is priority ascending, then enqueue order. The mutation
    /// (`pending → running`, lease set, attempts incremented) happens under
    /// the same lock as the selection, so two concurrent claimants can never
    /// both succeed on one job.
    pub fn claim_next_job(
        &self,
        worker_id: &str,
        kinds: &[PhysicalJobType],
    ) -> Option<SyncJob> {
        let now = Utc::now();
        let mut inner = self.lock_inner();

        let job_id = inner
            .jobs
            .values()
            .filter(|job| job.is_claimable(now))
            .filter(|job| kinds.is_empty() || kinds.contains(&job.physical_job_type))
            .min_by_key(|job| (job.priority, job.created_at))
            .map(|job| job.job_id)?;

        let job = inner.jobs.get_mut(&job_id)?;
        job.status = JobStatus::Running;
        job.locked_by = Some(worker_id.to_string());
        job.locked_at = Some(now);
        job.attempts += 1;
        Some(job.clone())
    }

    /// Removes a completed job, but only if `worker_id` still holds its lease.
    ///
    /// Returns false when the reaper (or another claimant) got there first;
    /// the worker must then discard its result.
    pub fn complete_job(&self, job_id: Uuid, worker_id: &str) -> bool {
        let mut inner = self.lock_inner();
        let owned = matches!(
            inner.jobs.get(&job_id),
            Some(job)
                if job.status == JobStatus::Running
                    && job.locked_by.as_deref() == Some(worker_id)
        );
        if owned {
            inner.jobs.remove(&job_id);
        }
        owned
    }

    /// Returns queue depth by status.
    pub fn queue_stats(&self) -> QueueStats {
        let inner = self.lock_inner();
        let mut stats = QueueStats::default();
        for job in inner.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Dead => stats.dead += 1,
            }
        }
        stats
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn list_expired_running_jobs(
        &self,
        grace_seconds: i64,
    ) -> Result<Vec<SyncJob>, StoreError> {
        let now = Utc::now();
        let inner = self.lock_inner();
        let mut expired: Vec<SyncJob> = inner
            .jobs
            .values()
            .filter(|job| job.lease_expired(now, grace_seconds))
            .cloned()
            .collect();
        // Oldest lease first, for deterministic processing order.
        expired.sort_by_key(|job| job.locked_at);
        Ok(expired)
    }

    async fn list_expired_running_runs(
        &self,
        max_duration_seconds: i64,
    ) -> Result<Vec<SyncRun>, StoreError> {
        let now = Utc::now();
        let inner = self.lock_inner();
        let mut expired: Vec<SyncRun> = inner
            .runs
            .values()
            .filter(|run| run.expired(now, max_duration_seconds))
            .cloned()
            .collect();
        expired.sort_by_key(|run| run.started_at);
        Ok(expired)
    }

    async fn list_expired_locks(&self, grace_seconds: i64) -> Result<Vec<SyncLock>, StoreError> {
        let now = Utc::now();
        let inner = self.lock_inner();
        let mut expired: Vec<SyncLock> = inner
            .locks
            .values()
            .filter(|lock| lock.expired(now, grace_seconds))
            .cloned()
            .collect();
        expired.sort_by_key(|lock| lock.acquired_at);
        Ok(expired)
    }

    async fn mark_job_dead(&self, job_id: Uuid, error: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock_inner();
        match inner.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Dead;
                job.last_error = Some(error.to_string());
                job.locked_by = None;
                job.locked_at = None;
                job.not_before = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_job_failed(
        &self,
        job_id: Uuid,
        error: &str,
        retry_delay_seconds: i64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock_inner();
        match inner.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Failed;
                job.last_error = Some(error.to_string());
                job.not_before = Some(Utc::now() + Duration::seconds(retry_delay_seconds));
                job.locked_by = None;
                job.locked_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_job_pending(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock_inner();
        match inner.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Pending;
                job.locked_by = None;
                job.locked_at = None;
                job.not_before = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_run_failed(
        &self,
        run_id: Uuid,
        summary: &RunFailureSummary,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock_inner();
        match inner.runs.get_mut(&run_id) {
            Some(run) if run.status == RunStatus::Running => {
                run.status = RunStatus::Failed;
                run.failure = Some(summary.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_release_lock(&self, lock_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock_inner();
        Ok(inner.locks.remove(&lock_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn store() -> MemoryJobStore {
        MemoryJobStore::new(JobTypeRegistry::new())
    }

    #[test]
    fn test_enqueue_uses_registry_priority() {
        let store = store();

        let commits = store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabCommits));
        let reviews = store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabReviews));

        assert_eq!(commits.status, JobStatus::Pending);
        assert!(commits.priority < reviews.priority);
        assert_eq!(commits.attempts, 0);
    }

    #[test]
    fn test_enqueue_priority_override() {
        let store = store();
        let job = store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabReviews).with_priority(5));
        assert_eq!(job.priority, 5);
    }

    #[test]
    fn test_claim_sets_lease_and_increments_attempts() {
        let store = store();
        store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabCommits));

        let claimed = store
            .claim_next_job("worker-1", &[])
            .expect("one claimable job");

        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.locked_by.as_deref(), Some("worker-1"));
        assert!(claimed.locked_at.is_some());
        assert_eq!(claimed.attempts, 1);
    }

    #[test]
    fn test_claim_prefers_lower_priority_value() {
        let store = store();
        store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabReviews));
        let commits = store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabCommits));

        let claimed = store.claim_next_job("worker-1", &[]).expect("claimable");
        assert_eq!(claimed.job_id, commits.job_id);
    }

    #[test]
    fn test_claim_filters_by_physical_type() {
        let store = store();
        store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabCommits));

        assert!(store
            .claim_next_job("worker-1", &[PhysicalJobType::Svn])
            .is_none());
        assert!(store
            .claim_next_job("worker-1", &[PhysicalJobType::GitlabCommits])
            .is_some());
    }

    #[test]
    fn test_claim_respects_not_before() {
        let store = store();
        let job = store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabCommits));

        {
            let mut inner = store.lock_inner();
            inner.jobs.get_mut(&job.job_id).unwrap().not_before =
                Some(Utc::now() + Duration::seconds(60));
        }

        assert!(store.claim_next_job("worker-1", &[]).is_none());
    }

    #[test]
    fn test_concurrent_claimants_never_share_a_job() {
        let store = Arc::new(store());
        store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabCommits));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.claim_next_job(&format!("worker-{i}"), &[]))
            })
            .collect();

        let claims: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().expect("claimant thread"))
            .collect();

        assert_eq!(claims.len(), 1, "exactly one claimant may win");
    }

    #[test]
    fn test_complete_requires_lease_ownership() {
        let store = store();
        store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabCommits));
        let claimed = store.claim_next_job("worker-1", &[]).expect("claimable");

        // A worker whose lease was reassigned must detect the conflict.
        assert!(!store.complete_job(claimed.job_id, "worker-2"));
        assert!(store.complete_job(claimed.job_id, "worker-1"));
        assert!(store.get_job(claimed.job_id).is_none());
    }

    #[tokio::test]
    async fn test_mark_operations_guard_on_running_status() {
        let store = store();
        let job = store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabCommits));

        // Still pending: no transition applies.
        assert!(!store.mark_job_dead(job.job_id, "boom").await.unwrap());
        assert!(!store.mark_job_failed(job.job_id, "boom", 10).await.unwrap());
        assert!(!store.mark_job_pending(job.job_id).await.unwrap());

        store.claim_next_job("worker-1", &[]).expect("claimable");
        assert!(store.mark_job_failed(job.job_id, "boom", 10).await.unwrap());

        let failed = store.get_job(job.job_id).expect("row kept");
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("boom"));
        assert!(failed.not_before.expect("backoff gate set") > Utc::now());
        assert!(!failed.has_lease());
    }

    #[tokio::test]
    async fn test_mark_job_pending_clears_gate_and_lease() {
        let store = store();
        let job = store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabCommits));
        store.claim_next_job("worker-1", &[]).expect("claimable");

        assert!(store.mark_job_pending(job.job_id).await.unwrap());

        let row = store.get_job(job.job_id).expect("row kept");
        assert_eq!(row.status, JobStatus::Pending);
        assert!(!row.has_lease());
        assert_eq!(row.not_before, None);
        assert!(row.is_claimable(Utc::now()));
    }

    #[tokio::test]
    async fn test_expired_listings_sorted_oldest_first() {
        let store = store();
        let now = Utc::now();

        for age in [300, 600, 150] {
            store.insert_job(SyncJob {
                job_id: Uuid::new_v4(),
                repo_id: 1,
                physical_job_type: PhysicalJobType::GitlabCommits,
                priority: 100,
                status: JobStatus::Running,
                attempts: 1,
                max_attempts: 5,
                locked_by: Some("worker-1".to_string()),
                locked_at: Some(now - Duration::seconds(age)),
                last_error: None,
                not_before: None,
                created_at: now,
            });
        }

        let expired = store.list_expired_running_jobs(60).await.unwrap();
        assert_eq!(expired.len(), 3);
        assert!(expired.windows(2).all(|w| w[0].locked_at <= w[1].locked_at));
    }

    #[tokio::test]
    async fn test_force_release_lock() {
        let store = store();
        let lock = SyncLock {
            lock_id: Uuid::new_v4(),
            resource: "repo:1".to_string(),
            holder: "worker-1".to_string(),
            acquired_at: Utc::now(),
        };
        store.insert_lock(lock.clone());

        assert!(store.force_release_lock(lock.lock_id).await.unwrap());
        assert!(!store.lock_exists(lock.lock_id));
        // Already released: affected = false, not an error.
        assert!(!store.force_release_lock(lock.lock_id).await.unwrap());
    }

    #[test]
    fn test_queue_stats_counts_by_status() {
        let store = store();
        store.enqueue_job(NewJob::new(1, PhysicalJobType::GitlabCommits));
        store.enqueue_job(NewJob::new(2, PhysicalJobType::GitlabCommits));
        store.claim_next_job("worker-1", &[]).expect("claimable");

        let stats = store.queue_stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.total(), 2);
    }
}
