//! Repository compliance engine.
//!
//! Scans every repository of an organization against a fixed set of
//! governance rules, keeps a managed set of `compliance:` style labels in
//! sync with the violations found, and maintains one tracking issue per
//! non-compliant repository in a central tracking repository.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use compliance::{GitHubClient, RunConfig, RunCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = RunConfig::for_organization("finastra-demo");
//!     config.token = std::env::var("GITHUB_TOKEN").ok();
//!     config.validate()?;
//!
//!     let client = Arc::new(GitHubClient::new(&config)?);
//!     let coordinator = RunCoordinator::from_config(&config, client.clone());
//!     let summary = coordinator.scan(client, config.dry_run).await?;
//!
//!     println!("{}", compliance::format_summary_text(&summary));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod github;
pub mod issues;
pub mod labels;
pub mod provider;
pub mod retry;
pub mod rules;
pub mod snapshot;
pub mod summary;
pub mod violation;

pub use config::RunConfig;
pub use coordinator::{CoordinatorOptions, RepositoryPlan, RunCoordinator};
pub use error::{ComplianceError, ErrorKind, RepositoryError};
pub use github::{GitHubClient, GitHubError};
pub use issues::{IssueReconciler, IssueState, TrackingIssueDecision};
pub use labels::{LabelMutation, LabelReconciler};
pub use provider::{MutationSink, SnapshotProvider};
pub use retry::RetryConfig;
pub use rules::{NamingPolicy, RuleEvaluator};
pub use snapshot::{RepositorySnapshot, RequiredFile, TrackingIssueRef};
pub use summary::{format_summary_text, MutationOutcome, RepositoryReport, RunSummary};
pub use violation::{ComplianceLabel, ViolationKind, ViolationSet, LABEL_TABLE};
