//! Point-in-time view of one repository's compliance-relevant attributes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Files every repository is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredFile {
    Readme,
    Gitignore,
    Codeowners,
    License,
}

impl RequiredFile {
    /// All tracked files.
    pub const ALL: [Self; 4] = [Self::Readme, Self::Gitignore, Self::Codeowners, Self::License];
}

impl std::fmt::Display for RequiredFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Readme => write!(f, "README"),
            Self::Gitignore => write!(f, ".gitignore"),
            Self::Codeowners => write!(f, "CODEOWNERS"),
            Self::License => write!(f, "LICENSE"),
        }
    }
}

/// The tracking issue currently open for a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingIssueRef {
    /// Issue number in the tracking repository.
    pub id: u64,
    /// Current issue body, when known.
    pub body: Option<String>,
}

/// Read-only snapshot of one repository, taken once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    /// Repository name, without the owner.
    pub name: String,
    /// Repository description.
    pub description: Option<String>,
    /// Public visibility.
    pub is_public: bool,
    /// Default branch name.
    pub default_branch: String,
    /// Whether the default branch has protection rules.
    pub has_branch_protection: bool,
    /// Required files found in the repository.
    pub file_presence: BTreeSet<RequiredFile>,
    /// Last push, `None` if the repository was never pushed to.
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Labels currently defined on the repository.
    pub current_labels: BTreeSet<String>,
    /// Open tracking issue, if one exists.
    pub open_tracking_issue: Option<TrackingIssueRef>,
}

impl RepositorySnapshot {
    /// A snapshot with nothing present: private, unprotected, no files,
    /// no activity. Tests and providers fill in what they know.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_public: false,
            default_branch: "main".to_string(),
            has_branch_protection: false,
            file_presence: BTreeSet::new(),
            last_activity_at: None,
            current_labels: BTreeSet::new(),
            open_tracking_issue: None,
        }
    }

    #[must_use]
    pub fn has_file(&self, file: RequiredFile) -> bool {
        self.file_presence.contains(&file)
    }

    #[must_use]
    pub fn open_tracking_issue_id(&self) -> Option<u64> {
        self.open_tracking_issue.as_ref().map(|issue| issue.id)
    }
}
