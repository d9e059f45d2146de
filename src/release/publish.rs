//! Library publishing in dependency order
//!
//! Each library's manifests are rewritten to exact registry pins and verified
//! before the publish call; after a publish the registry is polled until the
//! new version is visible. Publishing continues past failures, but dependents
//! of a failed library are skipped and the report fails as a whole.

use crate::core::error::{ReleaseError, ReleaseResult};
use crate::graph::DependencyGraph;
use crate::manifest::{Component, VersionsManifest};
use crate::release::registry::{PackageRegistry, PollPolicy, wait_until_visible};
use crate::release::rewrite;
use semver::Version;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct FailedPublish {
  pub component: String,
  pub reason: String,
}

/// Outcome of a publishing pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
  pub dry_run: bool,
  pub published: Vec<String>,
  pub already_published: Vec<String>,
  pub failed: Vec<FailedPublish>,
  /// Not attempted because a dependency failed
  pub skipped: Vec<String>,
}

impl PublishReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  /// `PublishFailure` naming every failed or skipped library
  pub fn ensure_success(&self) -> ReleaseResult<()> {
    if self.is_success() {
      return Ok(());
    }
    let components = self
      .failed
      .iter()
      .map(|f| f.component.clone())
      .chain(self.skipped.iter().cloned())
      .collect();
    Err(ReleaseError::PublishFailure { components })
  }
}

/// Exact pins for every published library of the ecosystem except `exclude`
pub fn ecosystem_pins(manifest: &VersionsManifest, version: &Version, exclude: &str) -> BTreeMap<String, Version> {
  manifest
    .components
    .iter()
    .filter(|c| c.is_library() && c.is_published() && c.name != exclude)
    .map(|c| (c.name.clone(), version.clone()))
    .collect()
}

/// Serialized publisher; one instance per run
pub struct Publisher<'a> {
  registry: &'a dyn PackageRegistry,
  policy: PollPolicy,
  sleep: &'a dyn Fn(Duration),
  report: PublishReport,
}

impl<'a> Publisher<'a> {
  pub fn new(registry: &'a dyn PackageRegistry, policy: PollPolicy, sleep: &'a dyn Fn(Duration), dry_run: bool) -> Self {
    Self {
      registry,
      policy,
      sleep,
      report: PublishReport {
        dry_run,
        ..PublishReport::default()
      },
    }
  }

  pub fn finish(self) -> PublishReport {
    self.report
  }

  /// First dependency of `component` that failed or was skipped
  pub fn blocked_by(&self, component: &Component) -> Option<String> {
    component
      .dependency_names()
      .find(|dep| {
        self.report.failed.iter().any(|f| f.component == *dep) || self.report.skipped.iter().any(|s| s == dep)
      })
      .map(String::from)
  }

  /// Rewrite, verify, publish and wait for one library
  ///
  /// Publish errors are recorded in the report and not returned; only
  /// `RegistryUnavailable` (the registry cannot be asked) aborts the run.
  pub fn publish_component(
    &mut self,
    component: &Component,
    source_dir: &Path,
    version: &Version,
    pins: &BTreeMap<String, Version>,
  ) -> ReleaseResult<()> {
    let name = component.name.as_str();

    if let Some(dep) = self.blocked_by(component) {
      log::warn!("skipping {}: dependency {} was not published", name, dep);
      self.report.skipped.push(name.to_string());
      return Ok(());
    }

    if self.registry.exists(name, version)? {
      log::info!("{}@{} already published", name, version);
      self.report.already_published.push(name.to_string());
      return Ok(());
    }

    match self.try_publish(component, source_dir, version, pins) {
      Ok(()) => {
        self.report.published.push(name.to_string());
        Ok(())
      }
      Err(e @ ReleaseError::RegistryUnavailable { .. }) => Err(e),
      Err(e) => {
        log::error!("publishing {} failed: {}", name, e);
        self.report.failed.push(FailedPublish {
          component: name.to_string(),
          reason: e.to_string(),
        });
        Ok(())
      }
    }
  }

  fn try_publish(
    &self,
    component: &Component,
    source_dir: &Path,
    version: &Version,
    pins: &BTreeMap<String, Version>,
  ) -> ReleaseResult<()> {
    if self.report.dry_run {
      // Checkouts stay untouched; only report what the rewrite would change
      let mut changes = 0;
      for path in rewrite::component_manifests(source_dir)? {
        let content = fs::read_to_string(&path)?;
        changes += rewrite::pin_document(&content, Some(version), pins)?.1.len();
      }
      log::info!("would pin {} dependencies and publish {}@{}", changes, component.name, version);
      return Ok(());
    }

    rewrite::pin_component(source_dir, Some(version), pins)?;
    let manifest_path = rewrite::package_manifest(source_dir, &component.name)?;
    self.registry.publish(&component.name, version, &manifest_path)?;
    wait_until_visible(self.registry, &component.name, version, self.policy, self.sleep)?;
    Ok(())
  }

  /// Publish every published library in topological order
  pub fn publish_all(
    mut self,
    manifest: &VersionsManifest,
    graph: &DependencyGraph,
    version: &Version,
    source_dirs: &BTreeMap<String, PathBuf>,
  ) -> ReleaseResult<PublishReport> {
    for name in graph.topological_order() {
      let component = manifest.require(name)?;
      if !component.is_library() || !component.is_published() {
        continue;
      }
      let source_dir = source_dirs.get(name).ok_or_else(|| {
        ReleaseError::message(format!("No checkout for '{}'", name))
      })?;
      let pins = ecosystem_pins(manifest, version, name);
      self.publish_component(component, source_dir, version, &pins)?;
    }
    Ok(self.finish())
  }
}
