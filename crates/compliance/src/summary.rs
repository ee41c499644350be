//! Run summary and report output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::error::RepositoryError;
use crate::issues::TrackingIssueDecision;
use crate::labels::LabelMutation;
use crate::violation::{ViolationKind, ViolationSet};

/// What happened to a repository's mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    /// At least one API call was made and all succeeded.
    Applied,
    /// Mutations were computed but application is disabled.
    Reported,
    /// Nothing needed to change.
    Unchanged,
    /// An API call failed; see `RunSummary::errors`.
    Failed,
    /// The run was cancelled before this repository was processed.
    Cancelled,
}

impl std::fmt::Display for MutationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Reported => write!(f, "reported"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result for one evaluated repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryReport {
    pub repository: String,
    pub violations: ViolationSet,
    pub label_mutation: LabelMutation,
    pub issue_decision: TrackingIssueDecision,
    pub outcome: MutationOutcome,
}

impl RepositoryReport {
    #[must_use]
    pub fn is_compliant(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Aggregated result of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub organization: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Whether mutations were sent to the API.
    pub mutations_enabled: bool,
    pub cancelled: bool,
    /// Repositories whose snapshot was evaluated.
    pub repositories_scanned: usize,
    pub violation_counts: BTreeMap<ViolationKind, usize>,
    pub repositories: Vec<RepositoryReport>,
    pub errors: Vec<RepositoryError>,
    /// Repositories never fetched because the run was cancelled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_repositories: Vec<String>,
}

impl RunSummary {
    #[must_use]
    pub fn new(
        organization: impl Into<String>,
        started_at: DateTime<Utc>,
        dry_run: bool,
        mutations_enabled: bool,
    ) -> Self {
        Self {
            organization: organization.into(),
            started_at,
            finished_at: started_at,
            dry_run,
            mutations_enabled,
            cancelled: false,
            repositories_scanned: 0,
            violation_counts: ViolationKind::ALL.into_iter().map(|k| (k, 0)).collect(),
            repositories: Vec::new(),
            errors: Vec::new(),
            skipped_repositories: Vec::new(),
        }
    }

    /// Add an evaluated repository and count its violations.
    pub fn record(&mut self, report: RepositoryReport) {
        self.repositories_scanned += 1;
        for kind in &report.violations {
            *self.violation_counts.entry(*kind).or_insert(0) += 1;
        }
        self.repositories.push(report);
    }

    pub fn record_error(&mut self, error: RepositoryError) {
        self.errors.push(error);
    }

    #[must_use]
    pub fn non_compliant_count(&self) -> usize {
        self.repositories.iter().filter(|r| !r.is_compliant()).count()
    }

    #[must_use]
    pub fn total_violations(&self) -> usize {
        self.violation_counts.values().sum()
    }

    /// Percentage of scanned repositories without violations.
    #[must_use]
    pub fn compliance_rate(&self) -> f64 {
        if self.repositories_scanned == 0 {
            return 100.0;
        }
        let compliant = self.repositories_scanned - self.non_compliant_count();
        compliant as f64 / self.repositories_scanned as f64 * 100.0
    }

    #[must_use]
    pub fn count_outcome(&self, outcome: MutationOutcome) -> usize {
        self.repositories
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }

    /// Write the summary as pretty JSON.
    pub fn write_report(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Format a run summary as text.
#[must_use]
pub fn format_summary_text(summary: &RunSummary) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "=== Repository Compliance Summary ===");
    let _ = writeln!(output, "Organization: {}", summary.organization);
    let _ = writeln!(output, "Started: {}", summary.started_at);
    let mode = if summary.mutations_enabled {
        "apply"
    } else if summary.dry_run {
        "dry run"
    } else {
        "report only"
    };
    let _ = writeln!(output, "Mode: {mode}");
    if summary.cancelled {
        let _ = writeln!(output, "Run was cancelled before completion");
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "Total repos: {}", summary.repositories_scanned);
    let _ = writeln!(output, "Non-compliant: {}", summary.non_compliant_count());
    let _ = writeln!(output, "Compliance rate: {:.1}%", summary.compliance_rate());
    let _ = writeln!(output, "Errors: {}", summary.errors.len());

    if summary.total_violations() > 0 {
        let _ = writeln!(output);
        let _ = writeln!(output, "Violations:");
        for (kind, count) in summary.violation_counts.iter().filter(|(_, c)| **c > 0) {
            let _ = writeln!(output, "  {:<32} {count}", kind.label_name());
        }
    }

    let non_compliant: Vec<&RepositoryReport> = summary
        .repositories
        .iter()
        .filter(|r| !r.is_compliant())
        .collect();
    if !non_compliant.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Non-compliant repositories:");
        for report in non_compliant {
            let _ = writeln!(
                output,
                "  - {} [{}] issue: {}",
                report.repository, report.outcome, report.issue_decision
            );
            for kind in &report.violations {
                let _ = writeln!(output, "      {}", kind.description());
            }
        }
    }

    if !summary.errors.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "Errors:");
        for error in &summary.errors {
            let _ = writeln!(
                output,
                "  - {} ({}): {}",
                error.repository, error.kind, error.message
            );
        }
    }

    if !summary.skipped_repositories.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "Skipped (cancelled): {}",
            summary.skipped_repositories.join(", ")
        );
    }

    output
}
