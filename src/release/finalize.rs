//! Release finalization: tag every repository, then publish the release object
//!
//! States advance `Pending -> Tagging -> Publishing -> Complete` and never go
//! back. Tagging records an independent outcome per repository; publishing the
//! release object either fully succeeds or leaves no new release behind.

use crate::core::error::{ReleaseError, ReleaseResult};
use crate::core::vcs::{SourceHost, TagOutcome};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizeState {
  Pending,
  Tagging,
  Publishing,
  Complete,
}

impl FinalizeState {
  fn can_advance_to(self, next: FinalizeState) -> bool {
    matches!(
      (self, next),
      (FinalizeState::Pending, FinalizeState::Tagging)
        | (FinalizeState::Tagging, FinalizeState::Publishing)
        | (FinalizeState::Publishing, FinalizeState::Complete)
    )
  }
}

pub struct Finalizer<'a> {
  host: &'a dyn SourceHost,
  state: FinalizeState,
  tags: BTreeMap<String, TagOutcome>,
}

impl<'a> Finalizer<'a> {
  pub fn new(host: &'a dyn SourceHost) -> Self {
    Self {
      host,
      state: FinalizeState::Pending,
      tags: BTreeMap::new(),
    }
  }

  pub fn state(&self) -> FinalizeState {
    self.state
  }

  pub fn tags(&self) -> &BTreeMap<String, TagOutcome> {
    &self.tags
  }

  pub fn into_tags(self) -> BTreeMap<String, TagOutcome> {
    self.tags
  }

  fn advance(&mut self, next: FinalizeState) -> ReleaseResult<()> {
    if !self.state.can_advance_to(next) {
      return Err(ReleaseError::message(format!(
        "Illegal finalization transition {:?} -> {:?}",
        self.state, next
      )));
    }
    log::debug!("finalize: {:?} -> {:?}", self.state, next);
    self.state = next;
    Ok(())
  }

  /// Tag each `(repo, checkout)`; a failure is recorded, not returned
  pub fn tag_all(&mut self, repos: &[(String, PathBuf)], tag: &str, message: &str) -> ReleaseResult<()> {
    self.advance(FinalizeState::Tagging)?;
    for (repo, dir) in repos {
      let outcome = match self.host.tag(dir, tag, message) {
        Ok(outcome) => outcome,
        Err(e) => {
          log::warn!("tagging {} failed: {}", repo, e);
          TagOutcome::Failed { reason: e.to_string() }
        }
      };
      log::info!("{} {}: {:?}", repo, tag, outcome);
      self.tags.insert(repo.clone(), outcome);
    }
    Ok(())
  }

  /// Repositories without the tag after `tag_all`
  pub fn untagged(&self) -> Vec<String> {
    self
      .tags
      .iter()
      .filter(|(_, o)| matches!(o, TagOutcome::Failed { .. }))
      .map(|(r, _)| r.clone())
      .collect()
  }

  /// Create the release object with every asset attached
  pub fn publish_release(&mut self, repo: &str, tag: &str, notes: &str, assets: &[PathBuf]) -> ReleaseResult<String> {
    self.advance(FinalizeState::Publishing)?;
    let url = self.host.create_release(repo, tag, notes, assets)?;
    self.advance(FinalizeState::Complete)?;
    Ok(url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::FakeHost;
  use std::path::Path;

  fn repos(root: &Path) -> Vec<(String, PathBuf)> {
    ["bllvm-consensus", "bllvm-protocol", "bllvm-node"]
      .iter()
      .map(|r| (r.to_string(), root.join(r)))
      .collect()
  }

  #[test]
  fn test_full_transition_sequence() {
    let host = FakeHost::new();
    let mut finalizer = Finalizer::new(&host);
    assert_eq!(finalizer.state(), FinalizeState::Pending);

    finalizer.tag_all(&repos(Path::new("/work")), "v0.2.0", "Release v0.2.0").unwrap();
    assert_eq!(finalizer.state(), FinalizeState::Tagging);
    assert!(finalizer.tags().values().all(|o| *o == TagOutcome::Created));

    let url = finalizer
      .publish_release("BTCDecoded/bllvm", "v0.2.0", "notes", &[PathBuf::from("a.tar.gz")])
      .unwrap();
    assert!(url.ends_with("/releases/tag/v0.2.0"));
    assert_eq!(finalizer.state(), FinalizeState::Complete);
    assert_eq!(host.releases().len(), 1);
  }

  #[test]
  fn test_tag_failures_are_independent() {
    let host = FakeHost::new()
      .with_tag("bllvm-consensus", "v0.2.0")
      .failing_tag("bllvm-protocol");
    let mut finalizer = Finalizer::new(&host);
    finalizer.tag_all(&repos(Path::new("/work")), "v0.2.0", "Release v0.2.0").unwrap();

    assert_eq!(finalizer.tags()["bllvm-consensus"], TagOutcome::AlreadyExists);
    assert!(matches!(finalizer.tags()["bllvm-protocol"], TagOutcome::Failed { .. }));
    assert_eq!(finalizer.tags()["bllvm-node"], TagOutcome::Created);
    assert_eq!(finalizer.untagged(), vec!["bllvm-protocol"]);
  }

  #[test]
  fn test_retagging_is_idempotent() {
    let host = FakeHost::new();
    for _ in 0..2 {
      let mut finalizer = Finalizer::new(&host);
      finalizer.tag_all(&repos(Path::new("/work")), "v0.2.0", "Release v0.2.0").unwrap();
    }
    assert_eq!(host.tags().len(), 3);
  }

  #[test]
  fn test_release_failure_is_not_complete() {
    let host = FakeHost::new().failing_release();
    let mut finalizer = Finalizer::new(&host);
    finalizer.tag_all(&[], "v0.2.0", "Release v0.2.0").unwrap();
    assert!(finalizer.publish_release("BTCDecoded/bllvm", "v0.2.0", "notes", &[]).is_err());
    assert_eq!(finalizer.state(), FinalizeState::Publishing);
    assert!(host.releases().is_empty());
  }

  #[test]
  fn test_illegal_transitions_are_rejected() {
    let host = FakeHost::new();
    let mut finalizer = Finalizer::new(&host);
    assert!(finalizer.publish_release("BTCDecoded/bllvm", "v0.2.0", "notes", &[]).is_err());
    assert_eq!(finalizer.state(), FinalizeState::Pending);

    finalizer.tag_all(&[], "v0.2.0", "m").unwrap();
    assert!(finalizer.tag_all(&[], "v0.2.0", "m").is_err());
  }
}
