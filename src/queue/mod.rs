//! Durable sync queue primitives.
//!
//! This module defines the queue's vocabulary rather than its storage:
//!
//! - **job**: the `SyncJob`/`SyncRun`/`SyncLock` row models and their expiry
//!   predicates
//! - **job_type**: logical↔physical job type normalization and default
//!   scheduling priorities
//! - **backoff**: error-aware retry delay computation
//!
//! The rows themselves live in the database and are manipulated through the
//! [`crate::storage`] layer; workers and the scheduler are separate processes
//! that meet only at those rows.

pub mod backoff;
pub mod job;
pub mod job_type;

// Re-export main types for convenience
pub use backoff::BackoffPolicy;
pub use job::{
    JobStatus, NewJob, RunFailureSummary, RunStatus, SyncJob, SyncLock, SyncRun,
    DEFAULT_MAX_ATTEMPTS,
};
pub use job_type::{JobTypeError, JobTypeRegistry, LogicalJobType, PhysicalJobType, RepoKind};
