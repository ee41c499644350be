//! Tracking issue reconciliation.
//!
//! Each non-compliant repository gets one tracking issue in the tracking
//! repository. The decision depends only on whether violations exist and
//! whether an issue is already open:
//!
//! | violations | open issue | decision     |
//! |------------|------------|--------------|
//! | non-empty  | no         | `Open`       |
//! | non-empty  | yes        | `UpdateBody` |
//! | empty      | yes        | `Close`      |
//! | empty      | no         | `NoAction`   |

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::violation::ViolationSet;

/// Label attached to every tracking issue.
pub const TRACKING_LABEL: &str = "compliance-report";

/// Secondary label marking issues as bot-managed.
pub const AUTOMATED_LABEL: &str = "automated";

/// Prefix of tracking issue titles. Used to find existing issues.
pub const TITLE_PREFIX: &str = "[Compliance] ";

/// Comment posted before a tracking issue is closed.
pub const CLOSE_COMMENT: &str = "🤖 **Auto-closed by Repository Compliance Checker**\n\n\
    All compliance violations for this repository have been resolved.\n\n\
    If this issue was closed in error, please reopen it.";

/// What to do with a repository's tracking issue this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "violations", rename_all = "snake_case")]
pub enum TrackingIssueDecision {
    NoAction,
    Open(ViolationSet),
    UpdateBody(ViolationSet),
    Close,
}

impl TrackingIssueDecision {
    #[must_use]
    pub fn is_no_action(&self) -> bool {
        matches!(self, Self::NoAction)
    }
}

impl std::fmt::Display for TrackingIssueDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAction => write!(f, "no_action"),
            Self::Open(v) => write!(f, "open ({} violations)", v.len()),
            Self::UpdateBody(v) => write!(f, "update_body ({} violations)", v.len()),
            Self::Close => write!(f, "close"),
        }
    }
}

/// Per-repository issue state across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    NoIssue,
    IssueOpen,
}

impl IssueState {
    /// State after `decision` is applied.
    ///
    /// Decisions produced by [`IssueReconciler::reconcile`] only ever take
    /// reachable transitions; an impossible pairing leaves the state as is.
    #[must_use]
    pub fn transition(self, decision: &TrackingIssueDecision) -> Self {
        match (self, decision) {
            (Self::NoIssue, TrackingIssueDecision::Open(_))
            | (Self::IssueOpen, TrackingIssueDecision::UpdateBody(_)) => Self::IssueOpen,
            (Self::IssueOpen, TrackingIssueDecision::Close) => Self::NoIssue,
            (state, _) => state,
        }
    }
}

/// Decides and renders tracking issues.
#[derive(Debug, Clone, Copy, Default)]
pub struct IssueReconciler;

impl IssueReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Decide what to do given the open issue (if any) and current violations.
    #[must_use]
    pub fn reconcile(
        &self,
        open_tracking_issue_id: Option<u64>,
        violations: &ViolationSet,
    ) -> TrackingIssueDecision {
        match (violations.is_empty(), open_tracking_issue_id) {
            (false, None) => TrackingIssueDecision::Open(violations.clone()),
            (false, Some(_)) => TrackingIssueDecision::UpdateBody(violations.clone()),
            (true, Some(_)) => TrackingIssueDecision::Close,
            (true, None) => TrackingIssueDecision::NoAction,
        }
    }

    /// Title of the tracking issue for `repository`.
    #[must_use]
    pub fn title(repository: &str) -> String {
        format!("{TITLE_PREFIX}{repository}")
    }

    /// Repository name encoded in a tracking issue title.
    #[must_use]
    pub fn repository_from_title(title: &str) -> Option<&str> {
        title
            .strip_prefix(TITLE_PREFIX)
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Markdown body for a tracking issue.
    ///
    /// The body carries no timestamps, so the same violations always render
    /// the same text and unchanged issues can be skipped.
    #[must_use]
    pub fn render_body(organization: &str, repository: &str, violations: &ViolationSet) -> String {
        let mut body = String::new();

        let _ = writeln!(body, "# Repository Compliance: {repository}");
        let _ = writeln!(body);
        let _ = writeln!(body, "**Organization:** {organization}");
        let _ = writeln!(
            body,
            "**Repository:** [{organization}/{repository}](https://github.com/{organization}/{repository})"
        );
        let _ = writeln!(body, "**Violations:** {}", violations.len());
        let _ = writeln!(body);
        let _ = writeln!(body, "## 🚨 Issues Found");
        let _ = writeln!(body);
        for kind in violations {
            let _ = writeln!(body, "- ❌ {} (`{}`)", kind.description(), kind.label_name());
        }
        let _ = writeln!(body);
        let _ = writeln!(body, "---");
        let _ = write!(
            body,
            "*This issue is maintained automatically by the Repository Compliance Checker and \
             closes itself once all violations are resolved.*"
        );

        body
    }

    /// Whether an `UpdateBody` decision requires an API call.
    #[must_use]
    pub fn needs_update(current_body: Option<&str>, new_body: &str) -> bool {
        match current_body {
            Some(current) => current.trim() != new_body.trim(),
            None => true,
        }
    }
}
