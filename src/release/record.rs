//! `release-manifest.json`: the aggregate record of a release run

use crate::core::error::{ReleaseResult, ResultExt};
use crate::core::vcs::TagOutcome;
use crate::manifest::ComponentKind;
use crate::release::artifacts::Artifact;
use crate::release::publish::PublishReport;
use crate::release::signing::SigningOutcome;
use crate::utils::write_atomic;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const RECORD_FILE: &str = "release-manifest.json";

#[derive(Debug, Clone, Serialize)]
pub struct ComponentRecord {
  pub name: String,
  pub kind: ComponentKind,
  pub version: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub commit: Option<String>,
  /// False when an optional component was skipped
  pub released: bool,
}

/// A step deliberately not performed, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedStep {
  pub step: String,
  pub reason: String,
}

impl SkippedStep {
  pub fn new(step: impl Into<String>, reason: impl Into<String>) -> Self {
    Self {
      step: step.into(),
      reason: reason.into(),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseRecord {
  pub version: String,
  pub tag: String,
  pub commit: Option<String>,
  pub generated_at: DateTime<Utc>,
  pub dry_run: bool,
  pub components: Vec<ComponentRecord>,
  pub artifacts: Vec<Artifact>,
  pub checksums: String,
  pub signing: SigningOutcome,
  pub publish: PublishReport,
  pub tags: BTreeMap<String, TagOutcome>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub release_url: Option<String>,
  pub notes: String,
  pub skipped: Vec<SkippedStep>,
  pub warnings: Vec<String>,
}

impl ReleaseRecord {
  /// Repositories whose tag could not be created
  pub fn untagged(&self) -> Vec<&str> {
    self
      .tags
      .iter()
      .filter(|(_, outcome)| matches!(outcome, TagOutcome::Failed { .. }))
      .map(|(repo, _)| repo.as_str())
      .collect()
  }

  pub fn write(&self, output_dir: &Path) -> ReleaseResult<PathBuf> {
    let path = output_dir.join(RECORD_FILE);
    let json = serde_json::to_string_pretty(self)?;
    write_atomic(&path, json.as_bytes()).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record() -> ReleaseRecord {
    ReleaseRecord {
      version: "0.2.0".to_string(),
      tag: "v0.2.0".to_string(),
      commit: Some("abc".to_string()),
      generated_at: Utc::now(),
      dry_run: false,
      components: vec![ComponentRecord {
        name: "bllvm-consensus".to_string(),
        kind: ComponentKind::Library,
        version: "0.2.0".to_string(),
        commit: None,
        released: true,
      }],
      artifacts: Vec::new(),
      checksums: String::new(),
      signing: SigningOutcome::Skipped {
        reason: "gpg unavailable".to_string(),
      },
      publish: PublishReport::default(),
      tags: BTreeMap::from([
        ("bllvm-consensus".to_string(), TagOutcome::Created),
        (
          "bllvm-node".to_string(),
          TagOutcome::Failed {
            reason: "denied".to_string(),
          },
        ),
      ]),
      release_url: None,
      notes: "notes".to_string(),
      skipped: vec![SkippedStep::new("signing", "gpg unavailable")],
      warnings: Vec::new(),
    }
  }

  #[test]
  fn test_untagged_lists_failed_repos() {
    assert_eq!(record().untagged(), vec!["bllvm-node"]);
  }

  #[test]
  fn test_written_json_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = record().write(dir.path()).unwrap();
    assert_eq!(path, dir.path().join(RECORD_FILE));

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["tag"], "v0.2.0");
    assert_eq!(json["tags"]["bllvm-consensus"]["outcome"], "created");
    assert_eq!(json["tags"]["bllvm-node"]["outcome"], "failed");
    assert_eq!(json["signing"]["status"], "skipped");
    assert_eq!(json["skipped"][0]["step"], "signing");
    assert!(json.get("release_url").is_none());
  }
}
