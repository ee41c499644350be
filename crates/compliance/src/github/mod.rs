//! GitHub implementation of the snapshot provider and mutation sink.

mod client;
pub mod models;

pub use client::{GitHubClient, GitHubError};
