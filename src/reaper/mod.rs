//! Crash recovery for jobs, runs, and locks.
//!
//! The reaper is the system's self-healing mechanism. Workers take leases on
//! jobs, runs carry their own wall-clock budgets, and per-resource locks
//! serialize repo access; when a worker crashes or hangs, all three can be
//! left stranded. The reaper runs periodically (or once, via single-pass
//! mode) and recovers each class with an independent pass, deciding between
//! requeue with backoff, terminal failure, and plain lease release based on
//! error classification.
//!
//! # Example
//!
//! ```rust,ignore
//! use scmsync::reaper::{Reaper, ReaperConfig, RecoveryPolicy};
//! use scmsync::storage::PgJobStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(PgJobStore::connect(&url, registry).await?);
//! let config = ReaperConfig::new()
//!     .with_job_grace_seconds(900)
//!     .with_policy(RecoveryPolicy::ToFailed);
//!
//! let report = Reaper::new(store, config).run_once().await?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```

pub mod config;
pub mod report;
pub mod runner;

// Re-export main types for convenience
pub use config::{ReaperConfig, RecoveryPolicy};
pub use report::{JobPassReport, LockPassReport, ReaperReport, RunPassReport};
pub use runner::{Reaper, ReaperError};
