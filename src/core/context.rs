//! Release context: build once in main, pass by reference everywhere
//!
//! Holds the pipeline config, the versions manifest and the dependency graph
//! derived from it. The graph is the only source of build, publish and rewrite
//! order; nothing else re-derives adjacency.

use crate::core::config::ReleaseConfig;
use crate::core::error::{ConfigError, ReleaseError, ReleaseResult};
use crate::graph::DependencyGraph;
use crate::manifest::VersionsManifest;
use crate::utils::resolve_path;
use std::path::{Path, PathBuf};

pub struct ReleaseContext {
  /// Directory relative paths in the config resolve against
  pub root: PathBuf,
  pub config: ReleaseConfig,
  pub manifest: VersionsManifest,
  pub graph: DependencyGraph,
}

impl ReleaseContext {
  /// Load config (file, then environment) and the versions manifest
  ///
  /// `config_path` overrides the search under `root`; `manifest_path`
  /// overrides `[release] manifest`.
  pub fn build(root: &Path, config_path: Option<&Path>, manifest_path: Option<&Path>) -> ReleaseResult<Self> {
    let config = load_config(root, config_path)?;
    let path = manifest_path
      .map(Path::to_path_buf)
      .unwrap_or_else(|| resolve_path(root, &config.release.manifest));
    let manifest = VersionsManifest::load(&path)?;
    Self::from_parts(root.to_path_buf(), config, manifest)
  }

  /// Validate a loaded manifest against the config and build the graph
  pub fn from_parts(root: PathBuf, config: ReleaseConfig, manifest: VersionsManifest) -> ReleaseResult<Self> {
    manifest.ensure_versions()?;
    let graph = DependencyGraph::from_manifest(&manifest)?;

    for warning in manifest.validate().warnings() {
      log::warn!("{}", warning);
    }

    if manifest.get(&config.release.anchor).is_none() {
      return Err(ReleaseError::Config(ConfigError::InvalidValue {
        field: "release.anchor".to_string(),
        reason: format!("'{}' is not declared in the versions manifest", config.release.anchor),
      }));
    }
    for name in config.components.keys() {
      manifest.require(name)?;
    }

    Ok(Self {
      root,
      config,
      manifest,
      graph,
    })
  }

  pub fn workspace_dir(&self) -> PathBuf {
    resolve_path(&self.root, &self.config.release.workspace_dir)
  }

  pub fn output_dir(&self) -> PathBuf {
    resolve_path(&self.root, &self.config.release.output_dir)
  }

  /// Existing checkout configured for a component, if any
  pub fn local_checkout(&self, name: &str) -> Option<PathBuf> {
    self
      .config
      .components
      .get(name)
      .and_then(|c| c.path.as_ref())
      .map(|p| resolve_path(&self.root, p))
  }

  pub fn notes_template(&self) -> Option<PathBuf> {
    self
      .config
      .release
      .notes_template
      .as_ref()
      .map(|p| resolve_path(&self.root, p))
  }
}

/// Config from an explicit file or the search path, then environment overrides
pub fn load_config(root: &Path, config_path: Option<&Path>) -> ReleaseResult<ReleaseConfig> {
  let mut config = match config_path {
    Some(path) => ReleaseConfig::load_file(path)?,
    None => ReleaseConfig::load(root)?,
  };
  config.apply_env(|name| std::env::var(name).ok())?;
  config.validate()?;
  Ok(config)
}
