//! Build requirement analysis: download an existing artifact or build from source
//!
//! Libraries are asked of the package registry (one answer for all platforms).
//! Binaries are asked of the release index once per platform and variant; the
//! answers are never shared between platforms.

use crate::core::config::Variant;
use crate::core::error::{ReleaseError, ReleaseResult};
use crate::graph::DependencyGraph;
use crate::manifest::{ComponentKind, VersionsManifest, tag_for};
use crate::release::build::BuildTarget;
use crate::release::platform::archive_stem;
use crate::release::registry::{PackageRegistry, ReleaseIndex};
use semver::Version;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildDecision {
  /// Artifact already exists upstream
  Download,
  /// Must be compiled from source
  Build,
}

/// One decision of the plan
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
  pub component: String,
  pub kind: ComponentKind,
  /// Archive label (`linux-x86_64`); absent for libraries
  #[serde(skip_serializing_if = "Option::is_none")]
  pub platform: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub variant: Option<Variant>,
  /// Release assets that must all exist for a download; empty for libraries
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub assets: Vec<String>,
  pub decision: BuildDecision,
  pub reason: String,
}

/// Decisions for every component in topological order
#[derive(Debug, Clone, Serialize)]
pub struct ReleasePlan {
  pub version: String,
  pub tag: String,
  pub order: Vec<String>,
  pub steps: Vec<PlannedStep>,
}

impl ReleasePlan {
  pub fn steps_for<'a>(&'a self, component: &'a str) -> impl Iterator<Item = &'a PlannedStep> + 'a {
    self.steps.iter().filter(move |s| s.component == component)
  }

  /// Decision for a component (and platform label, for binaries)
  pub fn decision(&self, component: &str, label: Option<&str>) -> Option<BuildDecision> {
    self
      .steps_for(component)
      .find(|s| s.platform.as_deref() == label)
      .map(|s| s.decision)
  }

  pub fn build_count(&self) -> usize {
    self.steps.iter().filter(|s| s.decision == BuildDecision::Build).count()
  }
}

/// Archive asset names for a binary component: the `.tar.gz` and the `.zip`
pub fn asset_names(component: &str, version: &Version, target: &BuildTarget) -> [String; 2] {
  let stem = archive_stem(component, &version.to_string(), &target.label());
  [format!("{}.tar.gz", stem), format!("{}.zip", stem)]
}

fn unavailable(component: &str, err: ReleaseError) -> ReleaseError {
  match err {
    ReleaseError::RegistryUnavailable { reason, .. } => ReleaseError::RegistryUnavailable {
      component: component.to_string(),
      reason,
    },
    other => ReleaseError::RegistryUnavailable {
      component: component.to_string(),
      reason: other.to_string(),
    },
  }
}

/// Query the registry and release index for every component
///
/// Any failed query aborts the analysis with `RegistryUnavailable`.
pub fn analyze(
  manifest: &VersionsManifest,
  graph: &DependencyGraph,
  version: &Version,
  targets: &[BuildTarget],
  release_repo: &str,
  registry: &dyn PackageRegistry,
  index: &dyn ReleaseIndex,
) -> ReleaseResult<ReleasePlan> {
  let tag = tag_for(version);
  let mut steps = Vec::new();

  for name in graph.topological_order() {
    let component = manifest.require(name)?;

    if component.is_library() {
      let (decision, reason) = if !component.is_published() {
        (BuildDecision::Build, "not published to the registry".to_string())
      } else if registry.exists(name, version).map_err(|e| unavailable(name, e))? {
        (BuildDecision::Download, format!("{}@{} already published", name, version))
      } else {
        (BuildDecision::Build, format!("{}@{} not in the registry", name, version))
      };
      log::debug!("{}: {:?} ({})", name, decision, reason);
      steps.push(PlannedStep {
        component: name.clone(),
        kind: component.kind,
        platform: None,
        variant: None,
        assets: Vec::new(),
        decision,
        reason,
      });
      continue;
    }

    for target in targets {
      let assets = asset_names(name, version, target);
      // Stops at the first missing archive; a partial release is rebuilt
      let mut missing = None;
      for asset in &assets {
        if !index
          .has_asset(release_repo, &tag, asset)
          .map_err(|e| unavailable(name, e))?
        {
          missing = Some(asset.clone());
          break;
        }
      }
      let (decision, reason) = match missing {
        None => (
          BuildDecision::Download,
          format!("{} archives exist in {}@{}", target.label(), release_repo, tag),
        ),
        Some(asset) => (BuildDecision::Build, format!("{} not released", asset)),
      };
      log::debug!("{} [{}]: {:?}", name, target.label(), decision);
      steps.push(PlannedStep {
        component: name.clone(),
        kind: component.kind,
        platform: Some(target.label()),
        variant: Some(target.variant),
        assets: assets.to_vec(),
        decision,
        reason,
      });
    }
  }

  Ok(ReleasePlan {
    version: version.to_string(),
    tag,
    order: graph.topological_order().to_vec(),
    steps,
  })
}
