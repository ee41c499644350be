//! Rule evaluation: one snapshot in, a set of violations out.
//!
//! Evaluation is pure and total. Missing data is a violation, never an
//! error, so a repository can always be classified.

use chrono::{DateTime, Datelike, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::{RepositorySnapshot, RequiredFile};
use crate::violation::{ViolationKind, ViolationSet};

/// Default required repository name prefix.
pub const DEFAULT_PREFIX: &str = "FD-";

/// Months of inactivity before a repository is stale.
pub const STALE_AFTER_MONTHS: u32 = 6;

/// Months of inactivity before a repository is an archival candidate.
pub const ARCHIVE_AFTER_MONTHS: u32 = 12;

/// Repository naming policy.
///
/// Only the prefix is checked. The `FD-{type}-{name}` structure used by
/// convention is not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingPolicy {
    /// Accepted prefixes, matched case-sensitively. A name passes if it
    /// starts with any of them.
    pub required_prefixes: Vec<String>,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            required_prefixes: vec![DEFAULT_PREFIX.to_string()],
        }
    }
}

impl NamingPolicy {
    #[must_use]
    pub fn accepts(&self, name: &str) -> bool {
        self.required_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

/// Evaluates snapshots against the compliance rules.
#[derive(Debug, Clone, Default)]
pub struct RuleEvaluator {
    naming: NamingPolicy,
}

impl RuleEvaluator {
    #[must_use]
    pub fn new(naming: NamingPolicy) -> Self {
        Self { naming }
    }

    /// Evaluate one snapshot at instant `now`.
    #[must_use]
    pub fn evaluate(&self, snapshot: &RepositorySnapshot, now: DateTime<Utc>) -> ViolationSet {
        let mut violations = ViolationSet::new();

        // 1. Naming
        if !self.naming.accepts(&snapshot.name) {
            violations.insert(ViolationKind::NamingPrefixMissing);
        }

        // 2. Required files
        if !snapshot.has_file(RequiredFile::Readme) {
            violations.insert(ViolationKind::MissingReadme);
        }
        if !snapshot.has_file(RequiredFile::Gitignore) {
            violations.insert(ViolationKind::MissingGitignore);
        }
        if !snapshot.has_file(RequiredFile::Codeowners) {
            violations.insert(ViolationKind::MissingCodeowners);
        }
        if snapshot.is_public && !snapshot.has_file(RequiredFile::License) {
            violations.insert(ViolationKind::MissingLicense);
        }

        // 3. Security
        if !snapshot.has_branch_protection {
            violations.insert(ViolationKind::NoBranchProtection);
        }
        let has_description = snapshot
            .description
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty());
        if !has_description {
            violations.insert(ViolationKind::NoDescription);
        }

        // 4. Activity
        if let Some(kind) = activity_violation(snapshot.last_activity_at, now) {
            violations.insert(kind);
        }

        violations
    }
}

/// Classify inactivity. Never returns both stale and archival.
#[must_use]
pub fn activity_violation(
    last_activity_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<ViolationKind> {
    let Some(last_activity_at) = last_activity_at else {
        return Some(ViolationKind::ArchivalCandidate);
    };

    let age_months = months_since(last_activity_at, now);
    if age_months >= ARCHIVE_AFTER_MONTHS {
        Some(ViolationKind::ArchivalCandidate)
    } else if age_months >= STALE_AFTER_MONTHS {
        Some(ViolationKind::Stale)
    } else {
        None
    }
}

/// Whole calendar months elapsed between `then` and `now`.
///
/// A month counts once the same day-of-month and time is reached, clamped
/// to the end of shorter months. Future timestamps yield 0.
#[must_use]
pub fn months_since(then: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    if then >= now {
        return 0;
    }

    let year_diff = i64::from(now.year()) - i64::from(then.year());
    let month_diff = i64::from(now.month()) - i64::from(then.month());
    let mut months = (year_diff * 12 + month_diff).max(0);

    while months > 0 {
        let anniversary = u32::try_from(months)
            .ok()
            .and_then(|m| then.checked_add_months(Months::new(m)));
        match anniversary {
            Some(anniversary) if anniversary <= now => break,
            _ => months -= 1,
        }
    }

    u32::try_from(months).unwrap_or(u32::MAX)
}
