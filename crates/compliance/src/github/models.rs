//! GitHub REST API request and response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Repository as returned by `/orgs/{org}/repos` and `/repos/{owner}/{repo}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryResource {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived: bool,
}

/// Branch as returned by `/repos/{owner}/{repo}/branches/{branch}`.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchResource {
    pub name: String,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelResource {
    pub name: String,
}

/// Issue as returned by the issues endpoints. Pull requests are listed by
/// the same endpoint and carry a `pull_request` key.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueResource {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CreateLabelBody<'a> {
    pub name: &'a str,
    pub color: &'a str,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct CreateIssueBody<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub labels: Vec<&'a str>,
}

#[derive(Debug, Default, Serialize)]
pub struct UpdateIssueBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_reason: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct CommentBody<'a> {
    pub body: &'a str,
}
