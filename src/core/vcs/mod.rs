//! Source control host abstraction
//!
//! - **system_git**: git CLI backend for clones, commits and tags
//! - **github**: `gh` CLI backend for release objects and prebuilt assets

pub mod github;
pub mod system_git;

pub use github::GitHubHost;
pub use system_git::SystemGit;

use crate::core::error::ReleaseResult;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Result of tagging one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TagOutcome {
  Created,
  /// Tag was already present; nothing was changed
  AlreadyExists,
  Failed { reason: String },
}

/// Operations the pipeline needs from the source control host
pub trait SourceHost: Send + Sync {
  /// Clone or refresh a repository at `reference`
  fn checkout(&self, url: &str, dest: &Path, reference: &str) -> ReleaseResult<()>;

  fn head_commit(&self, repo_dir: &Path) -> ReleaseResult<String>;

  /// Create and push an annotated tag; an existing tag is not an error
  ///
  /// Failures are reported as `TagFailure`.
  fn tag(&self, repo_dir: &Path, tag: &str, message: &str) -> ReleaseResult<TagOutcome>;

  /// Publish the release object for `tag` with all assets attached
  ///
  /// An existing release is updated in place (same-named assets replaced) and never
  /// removed. A release created by this call is removed again if its upload fails.
  fn create_release(&self, repo: &str, tag: &str, notes: &str, assets: &[PathBuf]) -> ReleaseResult<String>;
}
