//! Seams to the source control host.
//!
//! The engine never talks to an API directly. Snapshots come in through a
//! [`SnapshotProvider`] and mutations go out through a [`MutationSink`], so
//! the rule and reconciliation logic can be driven by in-memory fakes.

use async_trait::async_trait;

use crate::error::ComplianceError;
use crate::snapshot::RepositorySnapshot;
use crate::violation::ComplianceLabel;

/// Source of repository snapshots for one organization.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Names of every repository to scan.
    async fn list_repositories(&self) -> Result<Vec<String>, ComplianceError>;

    /// Snapshot of a single repository.
    async fn fetch_snapshot(&self, repository: &str) -> Result<RepositorySnapshot, ComplianceError>;
}

/// Destination for label and tracking issue mutations.
///
/// Errors should be reported as [`ComplianceError::MutationApply`].
#[async_trait]
pub trait MutationSink: Send + Sync {
    /// Create compliance labels on a repository.
    async fn add_labels(
        &self,
        repository: &str,
        labels: &[ComplianceLabel],
    ) -> Result<(), ComplianceError>;

    /// Delete labels from a repository. Already-missing labels are not an error.
    async fn remove_labels(&self, repository: &str, labels: &[String])
        -> Result<(), ComplianceError>;

    /// Open a tracking issue, returning its number.
    async fn open_issue(
        &self,
        repository: &str,
        title: &str,
        body: &str,
    ) -> Result<u64, ComplianceError>;

    /// Replace the body of an open tracking issue.
    async fn update_issue(
        &self,
        repository: &str,
        issue_id: u64,
        body: &str,
    ) -> Result<(), ComplianceError>;

    /// Comment on and close a tracking issue.
    async fn close_issue(
        &self,
        repository: &str,
        issue_id: u64,
        comment: &str,
    ) -> Result<(), ComplianceError>;
}
