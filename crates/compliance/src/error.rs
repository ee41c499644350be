//! Error types for the compliance engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a compliance run.
///
/// Only [`ComplianceError::Configuration`] is fatal. Every other variant is
/// scoped to one repository and ends up in `RunSummary::errors`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComplianceError {
    /// Network failure, throttling or timeout while reading a repository.
    #[error("transient fetch error for {repository}: {message}")]
    TransientFetch { repository: String, message: String },

    /// Repository deleted or inaccessible.
    #[error("permanent fetch error for {repository}: {message}")]
    PermanentFetch { repository: String, message: String },

    /// A label or issue API call failed.
    #[error("failed to apply mutation to {repository}: {message}")]
    MutationApply { repository: String, message: String },

    /// Invalid target organization or malformed options.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ComplianceError {
    /// Whether the retry helper should try the operation again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch { .. })
    }

    /// Repository the error belongs to, if any.
    #[must_use]
    pub fn repository(&self) -> Option<&str> {
        match self {
            Self::TransientFetch { repository, .. }
            | Self::PermanentFetch { repository, .. }
            | Self::MutationApply { repository, .. } => Some(repository),
            Self::Configuration(_) => None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientFetch { .. } => ErrorKind::TransientFetch,
            Self::PermanentFetch { .. } => ErrorKind::PermanentFetch,
            Self::MutationApply { .. } => ErrorKind::MutationApply,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

/// Serializable discriminant of [`ComplianceError`], used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientFetch,
    PermanentFetch,
    MutationApply,
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientFetch => write!(f, "transient_fetch"),
            Self::PermanentFetch => write!(f, "permanent_fetch"),
            Self::MutationApply => write!(f, "mutation_apply"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// A per-repository failure recorded in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryError {
    /// Repository the failure belongs to.
    pub repository: String,
    /// Failure class.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
}

impl RepositoryError {
    /// Build a summary entry from an error, falling back to `repository`
    /// when the error carries none.
    #[must_use]
    pub fn from_error(repository: &str, error: &ComplianceError) -> Self {
        Self {
            repository: error.repository().unwrap_or(repository).to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
