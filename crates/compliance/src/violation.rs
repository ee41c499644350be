//! Violation kinds and the static label table.
//!
//! The label strings are part of the external contract: repositories that
//! were labelled by earlier runs are reconciled against these exact names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A compliance rule breach. Variants are ordered by rule evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    NamingPrefixMissing,
    MissingReadme,
    MissingGitignore,
    MissingCodeowners,
    /// Only raised for public repositories.
    MissingLicense,
    NoBranchProtection,
    NoDescription,
    /// Inactive for at least 6 months but less than 12.
    Stale,
    /// Inactive for at least 12 months, or never active.
    ArchivalCandidate,
}

/// Violations found for one repository in one run.
pub type ViolationSet = BTreeSet<ViolationKind>;

/// A label owned by the compliance engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplianceLabel {
    pub kind: ViolationKind,
    pub name: &'static str,
    /// Hex color without the leading `#`.
    pub color: &'static str,
}

impl ComplianceLabel {
    /// Description attached to the label when it is created.
    #[must_use]
    pub fn description(&self) -> String {
        format!("Compliance: {}", self.name)
    }
}

/// Every label the engine manages. Labels not listed here are never touched.
pub const LABEL_TABLE: [ComplianceLabel; 9] = [
    ComplianceLabel {
        kind: ViolationKind::NamingPrefixMissing,
        name: "naming:missing-prefix",
        color: "f66a0a",
    },
    ComplianceLabel {
        kind: ViolationKind::MissingReadme,
        name: "missing:readme",
        color: "d73a49",
    },
    ComplianceLabel {
        kind: ViolationKind::MissingGitignore,
        name: "missing:gitignore",
        color: "d73a49",
    },
    ComplianceLabel {
        kind: ViolationKind::MissingCodeowners,
        name: "missing:codeowners",
        color: "fbca04",
    },
    ComplianceLabel {
        kind: ViolationKind::MissingLicense,
        name: "missing:license",
        color: "fbca04",
    },
    ComplianceLabel {
        kind: ViolationKind::NoBranchProtection,
        name: "security:no-branch-protection",
        color: "d73a49",
    },
    ComplianceLabel {
        kind: ViolationKind::NoDescription,
        name: "missing:description",
        color: "fbca04",
    },
    ComplianceLabel {
        kind: ViolationKind::Stale,
        name: "activity:stale",
        color: "f66a0a",
    },
    ComplianceLabel {
        kind: ViolationKind::ArchivalCandidate,
        name: "activity:archived",
        color: "24292e",
    },
];

impl ViolationKind {
    /// All kinds in evaluation order.
    pub const ALL: [Self; 9] = [
        Self::NamingPrefixMissing,
        Self::MissingReadme,
        Self::MissingGitignore,
        Self::MissingCodeowners,
        Self::MissingLicense,
        Self::NoBranchProtection,
        Self::NoDescription,
        Self::Stale,
        Self::ArchivalCandidate,
    ];

    /// Entry of the label table for this kind.
    #[must_use]
    pub fn label(self) -> ComplianceLabel {
        // LABEL_TABLE is indexed in the same order as ALL.
        LABEL_TABLE[self as usize]
    }

    #[must_use]
    pub fn label_name(self) -> &'static str {
        self.label().name
    }

    /// Reverse lookup from a label name.
    #[must_use]
    pub fn from_label(name: &str) -> Option<Self> {
        LABEL_TABLE
            .iter()
            .find(|label| label.name == name)
            .map(|label| label.kind)
    }

    /// Sentence used in tracking issue bodies and text reports.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::NamingPrefixMissing => "Repository name is missing the required prefix",
            Self::MissingReadme => "No README file found",
            Self::MissingGitignore => "No .gitignore file found",
            Self::MissingCodeowners => "No CODEOWNERS file found",
            Self::MissingLicense => "No LICENSE file found (required for public repositories)",
            Self::NoBranchProtection => "Default branch has no protection rules",
            Self::NoDescription => "Repository description is missing",
            Self::Stale => "Repository stale for 6+ months",
            Self::ArchivalCandidate => "Repository inactive for 1+ years, candidate for archival",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NamingPrefixMissing => "naming_prefix_missing",
            Self::MissingReadme => "missing_readme",
            Self::MissingGitignore => "missing_gitignore",
            Self::MissingCodeowners => "missing_codeowners",
            Self::MissingLicense => "missing_license",
            Self::NoBranchProtection => "no_branch_protection",
            Self::NoDescription => "no_description",
            Self::Stale => "stale",
            Self::ArchivalCandidate => "archival_candidate",
        };
        f.write_str(name)
    }
}
