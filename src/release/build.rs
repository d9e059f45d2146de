//! Component builds per platform and variant
//!
//! The toolchain is a seam: production runs `cargo`, tests use a fake that
//! writes binaries. Platforms of one component build in parallel, each in its
//! own target directory.

use crate::core::config::{FeatureSet, ReleaseConfig, Variant};
use crate::core::error::{ReleaseError, ReleaseResult};
use crate::core::process;
use crate::manifest::Component;
use crate::release::platform::Platform;
use crate::release::rewrite;
use crate::ui::progress::BuildProgress;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// How ecosystem dependencies resolve during a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySource {
  /// `path`/`git` references, for development builds
  Local,
  /// Exact pins to published versions, for release builds
  Registry,
}

/// One compiler invocation
#[derive(Debug)]
pub struct BuildRequest<'a> {
  pub component: &'a Component,
  pub source_dir: &'a Path,
  /// `None` builds for the host (libraries)
  pub platform: Option<&'a Platform>,
  pub variant: Variant,
  pub features: &'a FeatureSet,
  pub cargo_args: &'a [String],
  pub target_dir: PathBuf,
}

impl BuildRequest<'_> {
  pub fn platform_label(&self) -> String {
    self.platform.map_or_else(|| "host".to_string(), |p| p.triple().to_string())
  }
}

/// Compiler toolchain operations
pub trait Toolchain: Send + Sync {
  /// Compile, returning the produced binaries (empty for libraries)
  fn build(&self, request: &BuildRequest<'_>) -> ReleaseResult<Vec<PathBuf>>;

  fn test(&self, component: &Component, source_dir: &Path, features: &FeatureSet) -> ReleaseResult<()>;
}

/// `cargo` with bounded build and test times
pub struct CargoToolchain {
  build_timeout: Duration,
  test_timeout: Duration,
}

impl CargoToolchain {
  pub fn new(build_timeout: Duration, test_timeout: Duration) -> Self {
    Self {
      build_timeout,
      test_timeout,
    }
  }

  /// Declared binaries, or every bin target when none are declared
  fn binary_names(component: &Component, manifest: &Path) -> ReleaseResult<Vec<String>> {
    if !component.binaries.is_empty() {
      return Ok(component.binaries.clone());
    }
    let metadata = cargo_metadata::MetadataCommand::new()
      .manifest_path(manifest)
      .no_deps()
      .exec()?;
    let mut names: Vec<String> = metadata
      .workspace_packages()
      .iter()
      .flat_map(|p| p.targets.iter())
      .filter(|t| t.is_bin())
      .map(|t| t.name.clone())
      .collect();
    names.sort();
    names.dedup();
    Ok(names)
  }
}

impl Toolchain for CargoToolchain {
  fn build(&self, request: &BuildRequest<'_>) -> ReleaseResult<Vec<PathBuf>> {
    let component = &request.component.name;
    let manifest = rewrite::package_manifest(request.source_dir, component)?;

    let mut cmd = Command::new("cargo");
    cmd
      .arg("build")
      .arg("--release")
      .arg("--manifest-path")
      .arg(&manifest)
      .arg("--target-dir")
      .arg(&request.target_dir);
    if let Some(platform) = request.platform {
      cmd.arg("--target").arg(platform.triple());
    }
    cmd.args(request.features.cargo_args()).args(request.cargo_args);

    let output = match process::run(cmd, "cargo build", self.build_timeout) {
      Err(ReleaseError::ToolTimeout { seconds, .. }) => {
        return Err(ReleaseError::BuildFailure {
          component: component.clone(),
          platform: request.platform_label(),
          log: format!("cargo build timed out after {}s", seconds),
        });
      }
      other => other?,
    };
    if !output.success() {
      return Err(ReleaseError::BuildFailure {
        component: component.clone(),
        platform: request.platform_label(),
        log: output.combined(),
      });
    }

    if request.component.is_library() {
      return Ok(Vec::new());
    }

    let host = Platform::host();
    let platform = request.platform.unwrap_or(&host);
    let release_dir = match request.platform {
      Some(p) => request.target_dir.join(p.triple()).join("release"),
      None => request.target_dir.join("release"),
    };

    let mut binaries = Vec::new();
    for name in Self::binary_names(request.component, &manifest)? {
      let path = release_dir.join(platform.binary_file(&name));
      if !path.is_file() {
        log::debug!("expected binary missing: {}", path.display());
        return Err(ReleaseError::MissingArtifact {
          component: component.clone(),
          platform: request.platform_label(),
        });
      }
      binaries.push(path);
    }
    Ok(binaries)
  }

  fn test(&self, component: &Component, source_dir: &Path, features: &FeatureSet) -> ReleaseResult<()> {
    let manifest = rewrite::package_manifest(source_dir, &component.name)?;
    let mut cmd = Command::new("cargo");
    cmd.arg("test").arg("--manifest-path").arg(&manifest).args(features.cargo_args());

    let output = match process::run(cmd, "cargo test", self.test_timeout) {
      Err(ReleaseError::ToolTimeout { seconds, .. }) => {
        return Err(ReleaseError::TestFailure {
          component: component.name.clone(),
          log: format!("cargo test timed out after {}s", seconds),
        });
      }
      other => other?,
    };
    if !output.success() {
      return Err(ReleaseError::TestFailure {
        component: component.name.clone(),
        log: output.combined(),
      });
    }
    Ok(())
  }
}

/// A (platform, variant) pair to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
  pub platform: Platform,
  pub variant: Variant,
}

impl BuildTarget {
  pub fn label(&self) -> String {
    self.platform.label(self.variant)
  }

  /// Cartesian product, platforms outermost
  pub fn matrix(platforms: &[Platform], variants: &[Variant]) -> Vec<Self> {
    platforms
      .iter()
      .flat_map(|p| {
        variants.iter().map(move |v| Self {
          platform: p.clone(),
          variant: *v,
        })
      })
      .collect()
  }
}

/// Binaries produced for one target
#[derive(Debug, Clone)]
pub struct BuiltBinaries {
  pub component: String,
  pub target: BuildTarget,
  pub binaries: Vec<PathBuf>,
}

#[derive(Debug)]
pub enum BuildOutcome {
  Built(Vec<BuiltBinaries>),
  /// An optional component failed; the run continues without it
  Skipped { warning: String },
}

/// Drives the toolchain for one component at a time
pub struct Builder<'a> {
  toolchain: &'a dyn Toolchain,
  config: &'a ReleaseConfig,
  target_root: PathBuf,
  progress: BuildProgress,
}

impl<'a> Builder<'a> {
  pub fn new(toolchain: &'a dyn Toolchain, config: &'a ReleaseConfig, target_root: PathBuf) -> Self {
    Self {
      toolchain,
      config,
      target_root,
      progress: BuildProgress::hidden(),
    }
  }

  pub fn with_progress(mut self, progress: BuildProgress) -> Self {
    self.progress = progress;
    self
  }

  fn target_dir(&self, component: &str, target: Option<&BuildTarget>) -> PathBuf {
    let leaf = match target {
      Some(t) => format!("{}-{}", t.platform.triple(), t.variant),
      None => "host".to_string(),
    };
    self.target_root.join(component).join(leaf)
  }

  /// Build (and test) a component
  ///
  /// Libraries compile once for the host; binaries compile for every target.
  /// In `Registry` mode the component must not reference any of `ecosystem`
  /// locally. A failing optional component yields `Skipped`.
  pub fn build_component(
    &self,
    component: &Component,
    source_dir: &Path,
    targets: &[BuildTarget],
    source: DependencySource,
    ecosystem: &BTreeSet<String>,
  ) -> ReleaseResult<BuildOutcome> {
    if source == DependencySource::Registry {
      let local = rewrite::local_references(source_dir, ecosystem)?;
      if !local.is_empty() {
        return Err(ReleaseError::ManifestRewrite {
          path: source_dir.join("Cargo.toml"),
          reason: format!("registry build still has local references: {}", local.join("; ")),
        });
      }
    }

    match self.build_and_test(component, source_dir, targets) {
      Ok(built) => Ok(BuildOutcome::Built(built)),
      Err(
        e @ (ReleaseError::BuildFailure { .. } | ReleaseError::TestFailure { .. } | ReleaseError::MissingArtifact { .. }),
      ) if component.optional => {
        let warning = format!("optional component '{}' skipped: {}", component.name, e);
        log::warn!("{}", warning);
        Ok(BuildOutcome::Skipped { warning })
      }
      Err(e) => Err(e),
    }
  }

  fn build_and_test(
    &self,
    component: &Component,
    source_dir: &Path,
    targets: &[BuildTarget],
  ) -> ReleaseResult<Vec<BuiltBinaries>> {
    let settings = self.config.component(&component.name);

    let built = if component.is_library() {
      let features = self.config.features_for(&component.name, Variant::Base);
      let request = BuildRequest {
        component,
        source_dir,
        platform: None,
        variant: Variant::Base,
        features: &features,
        cargo_args: &settings.cargo_args,
        target_dir: self.target_dir(&component.name, None),
      };
      log::info!("building library {}", component.name);
      self.toolchain.build(&request)?;
      Vec::new()
    } else {
      let bar = self.progress.add_bar(targets.len(), component.name.clone());
      let results: Vec<ReleaseResult<BuiltBinaries>> = targets
        .par_iter()
        .map(|target| {
          let features = self.config.features_for(&component.name, target.variant);
          let request = BuildRequest {
            component,
            source_dir,
            platform: Some(&target.platform),
            variant: target.variant,
            features: &features,
            cargo_args: &settings.cargo_args,
            target_dir: self.target_dir(&component.name, Some(target)),
          };
          log::info!("building {} for {} ({})", component.name, target.platform, target.variant);
          let binaries = self.toolchain.build(&request)?;
          self.progress.inc(bar.as_ref());
          Ok(BuiltBinaries {
            component: component.name.clone(),
            target: target.clone(),
            binaries,
          })
        })
        .collect();
      results.into_iter().collect::<ReleaseResult<Vec<_>>>()?
    };

    if settings.run_tests {
      let features = self.config.features_for(&component.name, Variant::Base);
      log::info!("testing {}", component.name);
      self.toolchain.test(component, source_dir, &features)?;
    }

    Ok(built)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::VersionsManifest;
  use crate::testing::{ECOSYSTEM, FakeToolchain};

  fn linux() -> Platform {
    Platform::parse("x86_64-unknown-linux-gnu").unwrap()
  }

  #[test]
  fn test_matrix_order() {
    let windows = Platform::parse("x86_64-pc-windows-gnu").unwrap();
    let matrix = BuildTarget::matrix(&[linux(), windows], &[Variant::Base, Variant::Experimental]);
    let labels: Vec<String> = matrix.iter().map(BuildTarget::label).collect();
    assert_eq!(
      labels,
      vec![
        "linux-x86_64",
        "linux-x86_64-experimental",
        "windows-x86_64",
        "windows-x86_64-experimental"
      ]
    );
  }

  #[test]
  fn test_binary_built_per_target_with_variant_features() {
    let manifest = VersionsManifest::parse(ECOSYSTEM).unwrap();
    let config = ReleaseConfig::default();
    let toolchain = FakeToolchain::new();
    let dir = tempfile::tempdir().unwrap();
    let builder = Builder::new(&toolchain, &config, dir.path().join("target"));

    let node = manifest.require("bllvm-node").unwrap();
    let targets = BuildTarget::matrix(&[linux()], &[Variant::Base, Variant::Experimental]);
    let outcome = builder
      .build_component(node, dir.path(), &targets, DependencySource::Local, &BTreeSet::new())
      .unwrap();

    let BuildOutcome::Built(built) = outcome else {
      panic!("expected a build");
    };
    assert_eq!(built.len(), 2);
    assert!(built.iter().all(|b| b.binaries.iter().all(|p| p.is_file())));
    assert_ne!(built[0].binaries[0], built[1].binaries[0]);

    let calls = toolchain.builds();
    assert!(calls.iter().any(|c| c.features.all_features));
    assert_eq!(toolchain.tests(), vec!["bllvm-node".to_string()]);
  }

  #[test]
  fn test_optional_failure_is_downgraded() {
    let content = format!(
      "{}bllvm-commons = {{ version = \"0.1.0\", git_tag = \"v0.1.0\", requires = [\"bllvm-protocol\"], binaries = [\"bllvm-commons\"], optional = true }}\n",
      ECOSYSTEM.replace("[metadata]\necosystem = \"bllvm\"\n", "")
    );
    let manifest = VersionsManifest::parse(&content).unwrap();
    let config = ReleaseConfig::default();
    let toolchain = FakeToolchain::new().failing("bllvm-commons");
    let dir = tempfile::tempdir().unwrap();
    let builder = Builder::new(&toolchain, &config, dir.path().join("target"));
    let targets = BuildTarget::matrix(&[linux()], &[Variant::Base]);

    let commons = manifest.require("bllvm-commons").unwrap();
    let outcome = builder
      .build_component(commons, dir.path(), &targets, DependencySource::Local, &BTreeSet::new())
      .unwrap();
    assert!(matches!(outcome, BuildOutcome::Skipped { ref warning } if warning.contains("bllvm-commons")));

    let toolchain = FakeToolchain::new().failing("bllvm-node");
    let builder = Builder::new(&toolchain, &config, dir.path().join("target"));
    let node = manifest.require("bllvm-node").unwrap();
    let err = builder
      .build_component(node, dir.path(), &targets, DependencySource::Local, &BTreeSet::new())
      .unwrap_err();
    assert!(matches!(err, ReleaseError::BuildFailure { ref component, .. } if component == "bllvm-node"));
  }

  #[test]
  fn test_registry_mode_refuses_local_references() {
    let manifest = VersionsManifest::parse(ECOSYSTEM).unwrap();
    let config = ReleaseConfig::default();
    let toolchain = FakeToolchain::new();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join("Cargo.toml"),
      "[package]\nname = \"bllvm-node\"\nversion = \"0.1.0\"\n\n[dependencies]\nbllvm-protocol = { path = \"../bllvm-protocol\" }\n",
    )
    .unwrap();
    let builder = Builder::new(&toolchain, &config, dir.path().join("target"));
    let ecosystem: BTreeSet<String> = manifest.names().into_iter().collect();

    let err = builder
      .build_component(
        manifest.require("bllvm-node").unwrap(),
        dir.path(),
        &BuildTarget::matrix(&[linux()], &[Variant::Base]),
        DependencySource::Registry,
        &ecosystem,
      )
      .unwrap_err();
    assert!(matches!(err, ReleaseError::ManifestRewrite { .. }));
    assert!(toolchain.builds().is_empty());
  }
}
