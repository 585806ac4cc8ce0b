//! Job type normalization between logical sync intents and physical queue keys.
//!
//! Two code paths look at job types: the scheduler when it enqueues work and
//! the workers when they claim and filter it. If those paths ever compute
//! different queue keys for the same semantic job, the "one active job per
//! (repo, intent)" uniqueness quietly fragments. This module is the single
//! place that translation lives:
//!
//! - **Logical** types (`commits`, `mrs`, `reviews`, `svn`) are repo-kind
//!   agnostic and appear in policy and configuration.
//! - **Physical** types (`gitlab_commits`, `gitlab_mrs`, `gitlab_reviews`,
//!   `svn`) are the concrete queue keys stored on job rows.
//!
//! All lookups are pure and stateless; the registry is constructed explicitly
//! and passed where needed rather than living in a global.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default priority for commit sync jobs (claimed first).
const PRIORITY_COMMITS: i32 = 100;

/// Default priority for merge request sync jobs.
const PRIORITY_MRS: i32 = 200;

/// Default priority for review sync jobs.
const PRIORITY_REVIEWS: i32 = 300;

/// Default priority for SVN revision sync jobs.
const PRIORITY_SVN: i32 = 100;

/// Priority assigned to job types the registry does not recognize.
///
/// Priority is advisory, so an unknown type sorts to the back of the queue
/// instead of failing the enqueue.
const PRIORITY_UNKNOWN: i32 = 1000;

/// Errors produced by job type resolution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobTypeError {
    /// The logical type cannot be scheduled against this repository kind.
    #[error("job type '{logical}' is not valid for '{kind}' repositories")]
    InvalidCombination { logical: String, kind: String },

    /// The input string matched neither a logical nor a physical type.
    #[error("unknown job type '{0}'")]
    UnknownJobType(String),

    /// A logical type was given without the repository kind needed to resolve it.
    #[error("logical job type '{0}' requires a repository kind to resolve")]
    MissingRepoKind(String),
}

/// The SCM backend a repository lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    /// GitLab-hosted git repository.
    Git,
    /// Subversion repository.
    Svn,
}

impl RepoKind {
    /// Returns the canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoKind::Git => "git",
            RepoKind::Svn => "svn",
        }
    }

    /// Parses a repo kind, tolerating surrounding whitespace and case.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "git" => Some(RepoKind::Git),
            "svn" => Some(RepoKind::Svn),
            _ => None,
        }
    }
}

impl std::fmt::Display for RepoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An abstract sync intent, independent of SCM backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalJobType {
    /// Sync commits / revisions.
    Commits,
    /// Sync merge requests.
    Mrs,
    /// Sync MR review activity.
    Reviews,
    /// Explicit SVN intent; only meaningful for SVN repositories.
    Svn,
}

impl LogicalJobType {
    /// Returns the canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalJobType::Commits => "commits",
            LogicalJobType::Mrs => "mrs",
            LogicalJobType::Reviews => "reviews",
            LogicalJobType::Svn => "svn",
        }
    }

    /// Parses a logical type, tolerating surrounding whitespace and case.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "commits" => Some(LogicalJobType::Commits),
            "mrs" => Some(LogicalJobType::Mrs),
            "reviews" => Some(LogicalJobType::Reviews),
            "svn" => Some(LogicalJobType::Svn),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogicalJobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete, backend-specific queue key.
///
/// This is the value stored on `sync_jobs.physical_job_type` and the key
/// workers filter on when claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalJobType {
    /// GitLab commit sync.
    GitlabCommits,
    /// GitLab merge request sync.
    GitlabMrs,
    /// GitLab review sync.
    GitlabReviews,
    /// SVN revision sync.
    Svn,
}

impl PhysicalJobType {
    /// Returns the canonical string form, as stored on job rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            PhysicalJobType::GitlabCommits => "gitlab_commits",
            PhysicalJobType::GitlabMrs => "gitlab_mrs",
            PhysicalJobType::GitlabReviews => "gitlab_reviews",
            PhysicalJobType::Svn => "svn",
        }
    }

    /// Parses a physical type, tolerating surrounding whitespace and case.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "gitlab_commits" => Some(PhysicalJobType::GitlabCommits),
            "gitlab_mrs" => Some(PhysicalJobType::GitlabMrs),
            "gitlab_reviews" => Some(PhysicalJobType::GitlabReviews),
            "svn" => Some(PhysicalJobType::Svn),
            _ => None,
        }
    }

    /// Returns the logical intent behind this queue key.
    ///
    /// Total: every physical type has a logical counterpart. SVN collapses to
    /// `commits` because SVN exposes no separate MR/review surface.
    pub fn logical(&self) -> LogicalJobType {
        match self {
            PhysicalJobType::GitlabCommits => LogicalJobType::Commits,
            PhysicalJobType::GitlabMrs => LogicalJobType::Mrs,
            PhysicalJobType::GitlabReviews => LogicalJobType::Reviews,
            PhysicalJobType::Svn => LogicalJobType::Commits,
        }
    }
}

impl std::fmt::Display for PhysicalJobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bidirectional mapping between logical intents and physical queue keys.
///
/// Stateless; exists as a value so call sites receive it by injection instead
/// of reaching for a global.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobTypeRegistry;

impl JobTypeRegistry {
    /// Creates a registry.
    pub fn new() -> Self {
        Self
    }

    /// Resolves a logical intent to the physical queue key for a repo kind.
    ///
    /// # Errors
    ///
    /// Returns [`JobTypeError::InvalidCombination`] naming the offending pair
    /// when the intent does not exist on that backend, e.g. `mrs` on SVN or
    /// the explicit `svn` intent on a git repository.
    pub fn logical_to_physical(
        &self,
        logical: LogicalJobType,
        kind: RepoKind,
    ) -> Result<PhysicalJobType, JobTypeError> {
        match (kind, logical) {
            (RepoKind::Git, LogicalJobType::Commits) => Ok(PhysicalJobType::GitlabCommits),
            (RepoKind::Git, LogicalJobType::Mrs) => Ok(PhysicalJobType::GitlabMrs),
            (RepoKind::Git, LogicalJobType::Reviews) => Ok(PhysicalJobType::GitlabReviews),
            (RepoKind::Svn, LogicalJobType::Commits) | (RepoKind::Svn, LogicalJobType::Svn) => {
                Ok(PhysicalJobType::Svn)
            }
            (kind, logical) => Err(JobTypeError::InvalidCombination {
                logical: logical.to_string(),
                kind: kind.to_string(),
            }),
        }
    }

    /// Returns the logical intent behind a physical queue key.
    ///
    /// Total and deterministic. The SVN collapse (`svn` → `commits`) is
    /// intentionally lossy; see [`PhysicalJobType::logical`].
    pub fn physical_to_logical(&self, physical: PhysicalJobType) -> LogicalJobType {
        physical.logical()
    }

    /// Normalizes a job type string to its physical form.
    ///
    /// Idempotent on already-physical input. Logical input needs `kind` to
    /// resolve; passing `None` for a logical string is an error rather than a
    /// guess.
    pub fn normalize(
        &self,
        input: &str,
        kind: Option<RepoKind>,
    ) -> Result<PhysicalJobType, JobTypeError> {
        if let Some(physical) = PhysicalJobType::parse(input) {
            return Ok(physical);
        }

        match LogicalJobType::parse(input) {
            Some(logical) => match kind {
                Some(kind) => self.logical_to_physical(logical, kind),
                None => Err(JobTypeError::MissingRepoKind(logical.to_string())),
            },
            None => Err(JobTypeError::UnknownJobType(input.trim().to_string())),
        }
    }

    /// Physical queue keys that exist for a repo kind.
    pub fn supported_physical_types(&self, kind: RepoKind) -> &'static [PhysicalJobType] {
        match kind {
            RepoKind::Git => &[
                PhysicalJobType::GitlabCommits,
                PhysicalJobType::GitlabMrs,
                PhysicalJobType::GitlabReviews,
            ],
            RepoKind::Svn => &[PhysicalJobType::Svn],
        }
    }

    /// Logical intents that can be scheduled for a repo kind.
    pub fn supported_logical_types(&self, kind: RepoKind) -> &'static [LogicalJobType] {
        match kind {
            RepoKind::Git => &[
                LogicalJobType::Commits,
                LogicalJobType::Mrs,
                LogicalJobType::Reviews,
            ],
            RepoKind::Svn => &[LogicalJobType::Commits],
        }
    }

    /// Default scheduling priority for a physical type string.
    ///
    /// Lower values are claimed first. Priority is advisory, so unrecognized
    /// strings return a back-of-queue sentinel instead of an error.
    pub fn default_priority(&self, physical: &str) -> i32 {
        match PhysicalJobType::parse(physical) {
            Some(PhysicalJobType::GitlabCommits) => PRIORITY_COMMITS,
            Some(PhysicalJobType::GitlabMrs) => PRIORITY_MRS,
            Some(PhysicalJobType::GitlabReviews) => PRIORITY_REVIEWS,
            Some(PhysicalJobType::Svn) => PRIORITY_SVN,
            None => PRIORITY_UNKNOWN,
        }
    }

    /// Returns the repo kind a physical queue key belongs to.
    pub fn infer_repo_kind(&self, physical: PhysicalJobType) -> RepoKind {
        match physical {
            PhysicalJobType::GitlabCommits
            | PhysicalJobType::GitlabMrs
            | PhysicalJobType::GitlabReviews => RepoKind::Git,
            PhysicalJobType::Svn => RepoKind::Svn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_to_physical_git() {
        let registry = JobTypeRegistry::new();

        assert_eq!(
            registry.logical_to_physical(LogicalJobType::Commits, RepoKind::Git),
            Ok(PhysicalJobType::GitlabCommits)
        );
        assert_eq!(
            registry.logical_to_physical(LogicalJobType::Mrs, RepoKind::Git),
            Ok(PhysicalJobType::GitlabMrs)
        );
        assert_eq!(
            registry.logical_to_physical(LogicalJobType::Reviews, RepoKind::Git),
            Ok(PhysicalJobType::GitlabReviews)
        );
    }

    #[test]
    fn test_logical_to_physical_svn() {
        let registry = JobTypeRegistry::new();

        assert_eq!(
            registry.logical_to_physical(LogicalJobType::Commits, RepoKind::Svn),
            Ok(PhysicalJobType::Svn)
        );
        assert_eq!(
            registry.logical_to_physical(LogicalJobType::Svn, RepoKind::Svn),
            Ok(PhysicalJobType::Svn)
        );
    }

    #[test]
    fn test_invalid_combinations_rejected() {
        let registry = JobTypeRegistry::new();

        let err = registry
            .logical_to_physical(LogicalJobType::Mrs, RepoKind::Svn)
            .unwrap_err();
        assert_eq!(
            err,
            JobTypeError::InvalidCombination {
                logical: "mrs".to_string(),
                kind: "svn".to_string(),
            }
        );
        assert!(err.to_string().contains("mrs"));
        assert!(err.to_string().contains("svn"));

        assert!(registry
            .logical_to_physical(LogicalJobType::Reviews, RepoKind::Svn)
            .is_err());
        assert!(registry
            .logical_to_physical(LogicalJobType::Svn, RepoKind::Git)
            .is_err());
    }

    #[test]
    fn test_round_trip_for_git_types() {
        let registry = JobTypeRegistry::new();

        for logical in [
            LogicalJobType::Commits,
            LogicalJobType::Mrs,
            LogicalJobType::Reviews,
        ] {
            let physical = registry
                .logical_to_physical(logical, RepoKind::Git)
                .expect("valid git mapping");
            assert_eq!(registry.physical_to_logical(physical), logical);
        }
    }

    #[test]
    fn test_svn_collapse_is_lossy() {
        let registry = JobTypeRegistry::new();

        // Both commits and the explicit svn intent land on the same physical
        // type, and the inverse always answers commits.
        let physical = registry
            .logical_to_physical(LogicalJobType::Svn, RepoKind::Svn)
            .unwrap();
        assert_eq!(physical, PhysicalJobType::Svn);
        assert_eq!(registry.physical_to_logical(physical), LogicalJobType::Commits);
    }

    #[test]
    fn test_normalize_is_idempotent_on_physical() {
        let registry = JobTypeRegistry::new();

        assert_eq!(
            registry.normalize("gitlab_commits", None),
            Ok(PhysicalJobType::GitlabCommits)
        );
        assert_eq!(registry.normalize("svn", None), Ok(PhysicalJobType::Svn));
    }

    #[test]
    fn test_normalize_logical_requires_kind() {
        let registry = JobTypeRegistry::new();

        assert_eq!(
            registry.normalize("mrs", Some(RepoKind::Git)),
            Ok(PhysicalJobType::GitlabMrs)
        );
        assert_eq!(
            registry.normalize("mrs", None),
            Err(JobTypeError::MissingRepoKind("mrs".to_string()))
        );
    }

    #[test]
    fn test_normalize_unknown_input() {
        let registry = JobTypeRegistry::new();

        assert_eq!(
            registry.normalize("branches", Some(RepoKind::Git)),
            Err(JobTypeError::UnknownJobType("branches".to_string()))
        );
    }

    #[test]
    fn test_normalize_trims_and_lowercases() {
        let registry = JobTypeRegistry::new();

        assert_eq!(
            registry.normalize("  GitLab_Commits ", None),
            Ok(PhysicalJobType::GitlabCommits)
        );
        assert_eq!(
            registry.normalize(" Reviews\n", Some(RepoKind::Git)),
            Ok(PhysicalJobType::GitlabReviews)
        );
    }

    #[test]
    fn test_priority_ordering() {
        let registry = JobTypeRegistry::new();

        let commits = registry.default_priority("gitlab_commits");
        let mrs = registry.default_priority("gitlab_mrs");
        let reviews = registry.default_priority("gitlab_reviews");

        assert!(commits < mrs);
        assert!(mrs < reviews);
        assert_eq!(registry.default_priority("svn"), commits);
    }

    #[test]
    fn test_priority_unknown_is_sentinel_not_error() {
        let registry = JobTypeRegistry::new();

        let sentinel = registry.default_priority("no_such_type");
        assert!(sentinel > registry.default_priority("gitlab_reviews"));
    }

    #[test]
    fn test_supported_type_counts() {
        let registry = JobTypeRegistry::new();

        assert_eq!(registry.supported_physical_types(RepoKind::Git).len(), 3);
        assert_eq!(registry.supported_logical_types(RepoKind::Git).len(), 3);
        assert_eq!(registry.supported_physical_types(RepoKind::Svn).len(), 1);
        assert_eq!(registry.supported_logical_types(RepoKind::Svn).len(), 1);
    }

    #[test]
    fn test_infer_repo_kind() {
        let registry = JobTypeRegistry::new();

        assert_eq!(
            registry.infer_repo_kind(PhysicalJobType::GitlabCommits),
            RepoKind::Git
        );
        assert_eq!(
            registry.infer_repo_kind(PhysicalJobType::GitlabReviews),
            RepoKind::Git
        );
        assert_eq!(registry.infer_repo_kind(PhysicalJobType::Svn), RepoKind::Svn);
    }
}
