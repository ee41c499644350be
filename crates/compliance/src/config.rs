//! Run configuration.
//!
//! Values come from (lowest to highest precedence) built-in defaults, an
//! optional JSON config file, and CLI flags / environment variables applied
//! by the binary. [`RunConfig::validate`] runs before any client is built, so
//! a bad configuration never reaches the point of issuing mutations.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::ComplianceError;
use crate::retry::RetryConfig;
use crate::rules::NamingPolicy;

/// GitHub REST API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Repository that holds tracking issues.
pub const DEFAULT_TRACKING_REPOSITORY: &str = "admin-repo-compliance";

/// Default number of repositories processed at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default timeout for a single API call.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const MAX_CONCURRENCY: usize = 64;

// GitHub logins: alphanumerics and single hyphens, no leading/trailing hyphen.
static ORG_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,37}[A-Za-z0-9])?$").expect("valid org regex")
});

static REPO_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]{1,100}$").expect("valid repo regex"));

/// Parameters of one compliance run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Organization whose repositories are scanned.
    pub target_organization: String,
    /// Compute mutations without applying them.
    pub dry_run: bool,
    /// Attempt mutation application at all. Mutations are applied only when
    /// this is set and `dry_run` is not.
    pub fix_issues: bool,
    /// Repository (inside the organization) that holds tracking issues.
    pub tracking_repository: String,
    /// Maximum repositories fetched or mutated concurrently.
    pub concurrency: usize,
    /// Timeout for a single external call.
    pub request_timeout_secs: u64,
    /// Retry policy for transient fetch failures.
    pub retry: RetryConfig,
    /// Naming rule.
    pub naming: NamingPolicy,
    /// API root, overridable for GitHub Enterprise and tests.
    pub api_base_url: String,
    /// API token. Never read from or written to config files.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_organization: String::new(),
            dry_run: true,
            fix_issues: true,
            tracking_repository: DEFAULT_TRACKING_REPOSITORY.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry: RetryConfig::default(),
            naming: NamingPolicy::default(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            token: None,
        }
    }
}

impl RunConfig {
    /// Defaults for `organization`.
    #[must_use]
    pub fn for_organization(organization: impl Into<String>) -> Self {
        Self {
            target_organization: organization.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ComplianceError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ComplianceError::Configuration(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            ComplianceError::Configuration(format!(
                "malformed config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Whether mutations will actually be sent to the API.
    #[must_use]
    pub const fn mutations_enabled(&self) -> bool {
        !self.dry_run && self.fix_issues
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check every option. Errors here are fatal for the run.
    pub fn validate(&self) -> Result<(), ComplianceError> {
        let org = self.target_organization.trim();
        if org.is_empty() {
            return Err(ComplianceError::Configuration(
                "target organization is required".to_string(),
            ));
        }
        if !ORG_NAME.is_match(org) || org.contains("--") {
            return Err(ComplianceError::Configuration(format!(
                "invalid target organization '{org}'"
            )));
        }

        if !REPO_NAME.is_match(&self.tracking_repository) {
            return Err(ComplianceError::Configuration(format!(
                "invalid tracking repository '{}'",
                self.tracking_repository
            )));
        }

        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ComplianceError::Configuration(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(ComplianceError::Configuration(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ComplianceError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(ComplianceError::Configuration(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }

        if self.naming.required_prefixes.is_empty()
            || self.naming.required_prefixes.iter().any(String::is_empty)
        {
            return Err(ComplianceError::Configuration(
                "naming.required_prefixes must contain non-empty prefixes".to_string(),
            ));
        }

        if !(self.api_base_url.starts_with("https://") || self.api_base_url.starts_with("http://"))
        {
            return Err(ComplianceError::Configuration(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                self.api_base_url
            )));
        }

        if self.mutations_enabled() && self.token.as_deref().is_none_or(str::is_empty) {
            return Err(ComplianceError::Configuration(
                "GITHUB_TOKEN is required when mutations are enabled".to_string(),
            ));
        }

        Ok(())
    }
}
