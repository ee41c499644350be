//! # GitHub REST client
//!
//! Implements [`SnapshotProvider`] and [`MutationSink`] on top of the GitHub
//! REST API. Tracks the primary rate limit from response headers and refuses
//! to send requests while it is exhausted.

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use super::models::{
    ApiErrorBody, BranchResource, CommentBody, CreateIssueBody, CreateLabelBody, IssueResource,
    LabelResource, RepositoryResource, UpdateIssueBody,
};
use crate::config::RunConfig;
use crate::error::ComplianceError;
use crate::issues::{IssueReconciler, AUTOMATED_LABEL, TRACKING_LABEL};
use crate::provider::{MutationSink, SnapshotProvider};
use crate::snapshot::{RepositorySnapshot, RequiredFile, TrackingIssueRef};
use crate::violation::ComplianceLabel;

const USER_AGENT: &str = "repo-compliance/0.1";
const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;

/// Errors from the HTTP layer.
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded, reset in {reset_in:?}")]
    RateLimitExceeded { reset_in: Duration },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GitHubError {
    /// Throttling, server errors and network failures are worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::RateLimitExceeded { .. } => true,
            Self::NotFound(_) | Self::Serialization(_) => false,
        }
    }

    /// Classify as a fetch error for `repository`.
    #[must_use]
    pub fn into_fetch_error(self, repository: &str) -> ComplianceError {
        let repository = repository.to_string();
        let message = self.to_string();
        if self.is_transient() {
            ComplianceError::TransientFetch {
                repository,
                message,
            }
        } else {
            ComplianceError::PermanentFetch {
                repository,
                message,
            }
        }
    }

    #[must_use]
    pub fn into_mutation_error(self, repository: &str) -> ComplianceError {
        ComplianceError::MutationApply {
            repository: repository.to_string(),
            message: self.to_string(),
        }
    }
}

fn is_secondary_rate_limit(message: &str) -> bool {
    message.to_ascii_lowercase().contains("secondary rate limit")
}

#[derive(Debug, Default)]
struct RateLimitState {
    remaining: Option<u32>,
    reset_at: Option<Instant>,
}

/// GitHub API client scoped to one organization.
pub struct GitHubClient {
    http_client: Client,
    base_url: String,
    token: Option<String>,
    organization: String,
    tracking_repository: String,
    rate_limit: Mutex<RateLimitState>,
    tracking_index: OnceCell<HashMap<String, TrackingIssueRef>>,
}

impl GitHubClient {
    /// Build a client from a validated run configuration.
    pub fn new(config: &RunConfig) -> Result<Self, GitHubError> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            organization: config.target_organization.trim().to_string(),
            tracking_repository: config.tracking_repository.clone(),
            rate_limit: Mutex::new(RateLimitState::default()),
            tracking_index: OnceCell::new(),
        })
    }

    fn repo_path(&self, repository: &str) -> String {
        format!("/repos/{}/{}", self.organization, repository)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .http_client
            .request(method, url)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);

        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        request
    }

    /// Send with rate limit bookkeeping.
    async fn send(&self, request: RequestBuilder) -> Result<Response, GitHubError> {
        self.check_rate_limit()?;

        let response = request.send().await?;
        self.update_rate_limit(&response);

        if response.status() == StatusCode::FORBIDDEN {
            let exhausted = response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|h| h.to_str().ok())
                .is_some_and(|v| v == "0");
            if exhausted {
                return Err(GitHubError::RateLimitExceeded {
                    reset_in: Self::get_rate_limit_reset(&response)
                        .unwrap_or(Duration::from_secs(60)),
                });
            }

            // Secondary rate limits keep a non-zero primary budget.
            if let Some(retry_after) = Self::get_retry_after(&response) {
                warn!(retry_after_secs = retry_after.as_secs(), "Secondary rate limit hit");
                return Err(GitHubError::RateLimitExceeded {
                    reset_in: retry_after,
                });
            }
            return match Self::error_from_response(response).await {
                GitHubError::Api { message, .. } if is_secondary_rate_limit(&message) => {
                    warn!(message = %message, "Secondary rate limit hit");
                    Err(GitHubError::RateLimitExceeded {
                        reset_in: Duration::from_secs(60),
                    })
                }
                error => Err(error),
            };
        }

        Ok(response)
    }

    fn get_retry_after(response: &Response) -> Option<Duration> {
        response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    fn check_rate_limit(&self) -> Result<(), GitHubError> {
        let Ok(mut state) = self.rate_limit.lock() else {
            return Ok(());
        };

        if state.remaining == Some(0) {
            match state.reset_at {
                Some(reset_at) if Instant::now() < reset_at => {
                    return Err(GitHubError::RateLimitExceeded {
                        reset_in: reset_at - Instant::now(),
                    });
                }
                _ => {
                    // Window has rolled over.
                    state.remaining = None;
                    state.reset_at = None;
                }
            }
        }
        Ok(())
    }

    fn update_rate_limit(&self, response: &Response) {
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok());
        let reset_in = Self::get_rate_limit_reset(response);

        if let Ok(mut state) = self.rate_limit.lock() {
            if let Some(remaining) = remaining {
                state.remaining = Some(remaining);
            }
            if let Some(reset_in) = reset_in {
                state.reset_at = Some(Instant::now() + reset_in);
            }
        }
    }

    fn get_rate_limit_reset(response: &Response) -> Option<Duration> {
        response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok())
            .map(|reset_timestamp| {
                let now = chrono::Utc::now().timestamp();
                let seconds_until_reset = (reset_timestamp - now).max(0) as u64;
                Duration::from_secs(seconds_until_reset)
            })
    }

    async fn error_from_response(response: Response) -> GitHubError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);

        if status == StatusCode::NOT_FOUND {
            GitHubError::NotFound(message)
        } else {
            GitHubError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GitHubError> {
        debug!(path = %path, "GET request");
        let response = self.send(self.request(Method::GET, path)).await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, path = %path, "Failed to parse response");
            GitHubError::Serialization(e)
        })
    }

    /// GET every page of a list endpoint.
    async fn get_paginated<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, GitHubError> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            let page_path = format!("{path}{separator}per_page={PAGE_SIZE}&page={page}");
            let batch: Vec<T> = self.get_json(&page_path).await?;
            let done = batch.len() < PAGE_SIZE;
            items.extend(batch);
            if done {
                return Ok(items);
            }
            page += 1;
        }
    }

    /// `true` on 2xx, `false` on 404.
    async fn exists(&self, path: &str) -> Result<bool, GitHubError> {
        let response = self.send(self.request(Method::GET, path)).await?;
        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn send_json<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Response, GitHubError> {
        debug!(method = %method, path = %path, "Write request");
        self.send(self.request(method, path).json(body)).await
    }

    #[instrument(skip(self), fields(org = %self.organization))]
    async fn get_repository(&self, repository: &str) -> Result<RepositoryResource, GitHubError> {
        self.get_json(&self.repo_path(repository)).await
    }

    async fn branch_protected(&self, repository: &str, branch: &str) -> Result<bool, GitHubError> {
        let path = format!(
            "{}/branches/{}",
            self.repo_path(repository),
            urlencoding::encode(branch)
        );
        match self.get_json::<BranchResource>(&path).await {
            Ok(branch) => {
                debug!(repository, branch = %branch.name, protected = branch.protected, "Branch status");
                Ok(branch.protected)
            }
            // Empty repositories have no default branch yet.
            Err(GitHubError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn file_presence(&self, repository: &str) -> Result<BTreeSet<RequiredFile>, GitHubError> {
        let base = self.repo_path(repository);
        let mut present = BTreeSet::new();

        if self.exists(&format!("{base}/readme")).await? {
            present.insert(RequiredFile::Readme);
        }
        if self.exists(&format!("{base}/contents/.gitignore")).await? {
            present.insert(RequiredFile::Gitignore);
        }
        if self.exists(&format!("{base}/contents/LICENSE")).await? {
            present.insert(RequiredFile::License);
        }
        for location in ["CODEOWNERS", ".github/CODEOWNERS"] {
            if self.exists(&format!("{base}/contents/{location}")).await? {
                present.insert(RequiredFile::Codeowners);
                break;
            }
        }

        Ok(present)
    }

    async fn list_labels(&self, repository: &str) -> Result<BTreeSet<String>, GitHubError> {
        let labels: Vec<LabelResource> = self
            .get_paginated(&format!("{}/labels", self.repo_path(repository)))
            .await?;
        Ok(labels.into_iter().map(|label| label.name).collect())
    }

    /// Open tracking issues keyed by repository name. Loaded once per client.
    async fn tracking_index(&self) -> Result<&HashMap<String, TrackingIssueRef>, GitHubError> {
        self.tracking_index
            .get_or_try_init(|| async {
                let path = format!(
                    "{}/issues?state=open&labels={}",
                    self.repo_path(&self.tracking_repository),
                    urlencoding::encode(TRACKING_LABEL)
                );
                let issues: Vec<IssueResource> = match self.get_paginated(&path).await {
                    Ok(issues) => issues,
                    Err(GitHubError::NotFound(_)) => {
                        warn!(
                            repository = %self.tracking_repository,
                            "Tracking repository not found, assuming no open tracking issues"
                        );
                        Vec::new()
                    }
                    Err(e) => return Err(e),
                };

                let index: HashMap<String, TrackingIssueRef> = issues
                    .into_iter()
                    .filter(|issue| issue.pull_request.is_none())
                    .filter_map(|issue| {
                        let repository = IssueReconciler::repository_from_title(&issue.title)?;
                        Some((
                            repository.to_string(),
                            TrackingIssueRef {
                                id: issue.number,
                                body: issue.body,
                            },
                        ))
                    })
                    .collect();

                info!(open_issues = index.len(), "Loaded tracking issues");
                Ok(index)
            })
            .await
    }

    async fn snapshot(&self, repository: &str) -> Result<RepositorySnapshot, GitHubError> {
        let repo = self.get_repository(repository).await?;
        let default_branch = repo.default_branch.clone().unwrap_or_default();

        let has_branch_protection = if default_branch.is_empty() {
            false
        } else {
            self.branch_protected(repository, &default_branch).await?
        };
        let file_presence = self.file_presence(repository).await?;
        let current_labels = self.list_labels(repository).await?;
        let open_tracking_issue = self.tracking_index().await?.get(&repo.name).cloned();

        Ok(RepositorySnapshot {
            name: repo.name,
            description: repo.description,
            is_public: !repo.private,
            default_branch,
            has_branch_protection,
            file_presence,
            last_activity_at: repo.pushed_at,
            current_labels,
            open_tracking_issue,
        })
    }

    async fn create_label(&self, repository: &str, label: &ComplianceLabel) -> Result<(), GitHubError> {
        let body = CreateLabelBody {
            name: label.name,
            color: label.color,
            description: label.description(),
        };
        let response = self
            .send_json(Method::POST, &format!("{}/labels", self.repo_path(repository)), &body)
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(repository, label = label.name, "Applied label");
            return Ok(());
        }

        let error = Self::error_from_response(response).await;
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            // The API reports duplicates as a validation failure.
            debug!(repository, label = label.name, error = %error, "Label already exists");
            return Ok(());
        }
        Err(error)
    }

    async fn delete_label(&self, repository: &str, label: &str) -> Result<(), GitHubError> {
        let path = format!(
            "{}/labels/{}",
            self.repo_path(repository),
            urlencoding::encode(label)
        );
        let response = self.send(self.request(Method::DELETE, &path)).await?;

        match response.status() {
            status if status.is_success() => {
                info!(repository, label, "Removed label");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!(repository, label, "Label already removed");
                Ok(())
            }
            _ => Err(Self::error_from_response(response).await),
        }
    }

    async fn patch_issue(&self, issue_id: u64, body: &UpdateIssueBody<'_>) -> Result<(), GitHubError> {
        let path = format!(
            "{}/issues/{issue_id}",
            self.repo_path(&self.tracking_repository)
        );
        let response = self.send_json(Method::PATCH, &path, body).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }
}

#[async_trait]
impl SnapshotProvider for GitHubClient {
    async fn list_repositories(&self) -> Result<Vec<String>, ComplianceError> {
        let path = format!("/orgs/{}/repos?type=all", self.organization);
        let repos: Vec<RepositoryResource> = self
            .get_paginated(&path)
            .await
            .map_err(|e| e.into_fetch_error(&self.organization))?;

        let names: Vec<String> = repos
            .into_iter()
            .filter(|repo| {
                if repo.archived {
                    debug!(repository = %repo.name, "Skipping archived repository");
                }
                !repo.archived
            })
            .map(|repo| repo.name)
            .filter(|name| *name != self.tracking_repository)
            .collect();

        info!(
            org = %self.organization,
            repositories = names.len(),
            "Listed organization repositories"
        );
        Ok(names)
    }

    async fn fetch_snapshot(&self, repository: &str) -> Result<RepositorySnapshot, ComplianceError> {
        self.snapshot(repository)
            .await
            .map_err(|e| e.into_fetch_error(repository))
    }
}

#[async_trait]
impl MutationSink for GitHubClient {
    async fn add_labels(
        &self,
        repository: &str,
        labels: &[ComplianceLabel],
    ) -> Result<(), ComplianceError> {
        for label in labels {
            self.create_label(repository, label)
                .await
                .map_err(|e| e.into_mutation_error(repository))?;
        }
        Ok(())
    }

    async fn remove_labels(
        &self,
        repository: &str,
        labels: &[String],
    ) -> Result<(), ComplianceError> {
        for label in labels {
            self.delete_label(repository, label)
                .await
                .map_err(|e| e.into_mutation_error(repository))?;
        }
        Ok(())
    }

    async fn open_issue(
        &self,
        repository: &str,
        title: &str,
        body: &str,
    ) -> Result<u64, ComplianceError> {
        let path = format!("{}/issues", self.repo_path(&self.tracking_repository));
        let request = CreateIssueBody {
            title,
            body,
            labels: vec![TRACKING_LABEL, AUTOMATED_LABEL],
        };

        let response = self
            .send_json(Method::POST, &path, &request)
            .await
            .map_err(|e| e.into_mutation_error(repository))?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response)
                .await
                .into_mutation_error(repository));
        }

        let issue: IssueResource = response
            .json()
            .await
            .map_err(|e| GitHubError::from(e).into_mutation_error(repository))?;
        info!(repository, issue = issue.number, "Opened tracking issue");
        Ok(issue.number)
    }

    async fn update_issue(
        &self,
        repository: &str,
        issue_id: u64,
        body: &str,
    ) -> Result<(), ComplianceError> {
        let update = UpdateIssueBody {
            body: Some(body),
            ..UpdateIssueBody::default()
        };
        self.patch_issue(issue_id, &update)
            .await
            .map_err(|e| e.into_mutation_error(repository))?;
        info!(repository, issue = issue_id, "Updated tracking issue");
        Ok(())
    }

    async fn close_issue(
        &self,
        repository: &str,
        issue_id: u64,
        comment: &str,
    ) -> Result<(), ComplianceError> {
        let path = format!(
            "{}/issues/{issue_id}/comments",
            self.repo_path(&self.tracking_repository)
        );
        match self.send_json(Method::POST, &path, &CommentBody { body: comment }).await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                let error = Self::error_from_response(response).await;
                warn!(repository, issue = issue_id, error = %error, "Failed to add close comment");
            }
            Err(e) => {
                warn!(repository, issue = issue_id, error = %e, "Failed to add close comment");
            }
        }

        let update = UpdateIssueBody {
            state: Some("closed"),
            state_reason: Some("completed"),
            ..UpdateIssueBody::default()
        };
        self.patch_issue(issue_id, &update)
            .await
            .map_err(|e| e.into_mutation_error(repository))?;
        info!(repository, issue = issue_id, "Closed tracking issue");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_classification() {
        let throttled = GitHubError::Api {
            status: 429,
            message: "slow down".to_string(),
        };
        let unavailable = GitHubError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        let forbidden = GitHubError::Api {
            status: 403,
            message: "Resource not accessible".to_string(),
        };

        assert!(throttled.is_transient());
        assert!(unavailable.is_transient());
        assert!(!forbidden.is_transient());
        assert!(GitHubError::RateLimitExceeded {
            reset_in: Duration::from_secs(5)
        }
        .is_transient());
        assert!(!GitHubError::NotFound("gone".to_string()).is_transient());
    }

    #[test]
    fn test_secondary_rate_limit_message() {
        assert!(is_secondary_rate_limit(
            "You have exceeded a secondary rate limit. Please wait a few minutes before you try again."
        ));
        assert!(!is_secondary_rate_limit("Resource not accessible by integration"));
    }

    #[test]
    fn test_into_fetch_error() {
        let err = GitHubError::NotFound("gone".to_string()).into_fetch_error("FD-old");
        assert!(matches!(err, ComplianceError::PermanentFetch { ref repository, .. } if repository == "FD-old"));

        let err = GitHubError::Api {
            status: 503,
            message: "unavailable".to_string(),
        }
        .into_fetch_error("FD-api-core");
        assert!(err.is_transient());
    }

    #[test]
    fn test_client_trims_base_url() {
        let mut config = RunConfig::for_organization("finastra-demo");
        config.api_base_url = "http://localhost:8080/".to_string();
        let client = GitHubClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
        assert_eq!(client.repo_path("FD-x"), "/repos/finastra-demo/FD-x");
    }
}
