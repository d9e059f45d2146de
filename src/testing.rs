//! In-memory stand-ins for the registry, release index, source host and toolchain

use crate::core::config::{FeatureSet, Variant};
use crate::core::error::{ReleaseError, ReleaseResult};
use crate::core::vcs::{SourceHost, TagOutcome};
use crate::manifest::Component;
use crate::release::build::{BuildRequest, Toolchain};
use crate::release::registry::{PackageRegistry, ReleaseIndex};
use crate::utils::file_name;
use semver::Version;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// consensus <- protocol <- node, all at 0.1.0
pub const ECOSYSTEM: &str = r#"# bllvm component versions
[versions]
bllvm-consensus = { version = "0.1.0", git_tag = "v0.1.0" }
bllvm-protocol = { version = "0.1.0", git_tag = "v0.1.0", requires = ["bllvm-consensus=0.1.0"] }
bllvm-node = { version = "0.1.0", git_tag = "v0.1.0", requires = ["bllvm-protocol=0.1.0"], binaries = ["bllvm-node"] }

[metadata]
ecosystem = "bllvm"
"#;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct RegistryState {
  published: BTreeSet<(String, String)>,
  queries_since_publish: HashMap<(String, String), u32>,
  publish_log: Vec<String>,
  manifests_at_publish: BTreeMap<String, String>,
}

pub struct FakeRegistry {
  visible_after: u32,
  failing: BTreeSet<String>,
  unavailable: bool,
  state: Mutex<RegistryState>,
}

impl FakeRegistry {
  pub fn new() -> Self {
    Self {
      visible_after: 1,
      failing: BTreeSet::new(),
      unavailable: false,
      state: Mutex::new(RegistryState::default()),
    }
  }

  /// Published versions become visible on the n-th query
  pub fn visible_after(mut self, queries: u32) -> Self {
    self.visible_after = queries;
    self
  }

  pub fn failing(mut self, name: &str) -> Self {
    self.failing.insert(name.to_string());
    self
  }

  pub fn unavailable(mut self) -> Self {
    self.unavailable = true;
    self
  }

  pub fn mark_published(&self, name: &str, version: &str) {
    lock(&self.state).published.insert((name.to_string(), version.to_string()));
  }

  pub fn publish_log(&self) -> Vec<String> {
    lock(&self.state).publish_log.clone()
  }

  /// Cargo.toml contents as seen when `name` was published
  pub fn manifest_at_publish(&self, name: &str) -> Option<String> {
    lock(&self.state).manifests_at_publish.get(name).cloned()
  }
}

impl PackageRegistry for FakeRegistry {
  fn exists(&self, name: &str, version: &Version) -> ReleaseResult<bool> {
    if self.unavailable {
      return Err(ReleaseError::RegistryUnavailable {
        component: name.to_string(),
        reason: "HTTP 503".to_string(),
      });
    }
    let key = (name.to_string(), version.to_string());
    let mut state = lock(&self.state);
    if !state.published.contains(&key) {
      return Ok(false);
    }
    let queries = state.queries_since_publish.entry(key).or_insert(0);
    *queries += 1;
    Ok(*queries >= self.visible_after)
  }

  fn publish(&self, name: &str, version: &Version, manifest_path: &Path) -> ReleaseResult<()> {
    if self.failing.contains(name) {
      return Err(ReleaseError::message(format!("registry rejected {}@{}", name, version)));
    }
    let manifest = fs::read_to_string(manifest_path)?;
    let mut state = lock(&self.state);
    state.publish_log.push(name.to_string());
    state.manifests_at_publish.insert(name.to_string(), manifest);
    state.published.insert((name.to_string(), version.to_string()));
    Ok(())
  }
}

pub struct FakeIndex {
  assets: BTreeSet<(String, String, String)>,
  unavailable: bool,
  queries: Mutex<Vec<String>>,
}

impl FakeIndex {
  pub fn new() -> Self {
    Self {
      assets: BTreeSet::new(),
      unavailable: false,
      queries: Mutex::new(Vec::new()),
    }
  }

  pub fn with_asset(mut self, repo: &str, tag: &str, asset: &str) -> Self {
    self.assets.insert((repo.to_string(), tag.to_string(), asset.to_string()));
    self
  }

  pub fn unavailable(mut self) -> Self {
    self.unavailable = true;
    self
  }

  /// Asset names queried, in order
  pub fn queries(&self) -> Vec<String> {
    lock(&self.queries).clone()
  }
}

impl ReleaseIndex for FakeIndex {
  fn has_asset(&self, repo: &str, tag: &str, asset: &str) -> ReleaseResult<bool> {
    lock(&self.queries).push(asset.to_string());
    if self.unavailable {
      return Err(ReleaseError::RegistryUnavailable {
        component: asset.to_string(),
        reason: "HTTP 401: Bad credentials".to_string(),
      });
    }
    Ok(
      self
        .assets
        .contains(&(repo.to_string(), tag.to_string(), asset.to_string())),
    )
  }

  fn download_asset(&self, repo: &str, tag: &str, asset: &str, dest_dir: &Path) -> ReleaseResult<PathBuf> {
    if !self.has_asset(repo, tag, asset)? {
      return Err(ReleaseError::message(format!("{} not found in {}@{}", asset, repo, tag)));
    }
    fs::create_dir_all(dest_dir)?;
    let path = dest_dir.join(asset);
    fs::write(&path, format!("prebuilt {}", asset))?;
    Ok(path)
  }
}

#[derive(Debug, Clone)]
pub struct CreatedRelease {
  pub repo: String,
  pub tag: String,
  pub notes: String,
  pub assets: Vec<PathBuf>,
  /// The tag already had a release, which was updated in place
  pub updated_existing: bool,
}

#[derive(Default)]
struct HostState {
  tags: BTreeSet<(String, String)>,
  checkouts: Vec<String>,
  releases: Vec<CreatedRelease>,
  /// Asset names of every release object on the host
  published: BTreeMap<(String, String), BTreeSet<String>>,
}

pub struct FakeHost {
  sources: BTreeMap<String, String>,
  failing_tags: BTreeSet<String>,
  fail_release: bool,
  state: Mutex<HostState>,
}

impl FakeHost {
  pub fn new() -> Self {
    Self {
      sources: BTreeMap::new(),
      failing_tags: BTreeSet::new(),
      fail_release: false,
      state: Mutex::new(HostState::default()),
    }
  }

  /// Cargo.toml written into the checkout of `repo`
  pub fn with_source(mut self, repo: &str, cargo_toml: &str) -> Self {
    self.sources.insert(repo.to_string(), cargo_toml.to_string());
    self
  }

  pub fn with_tag(self, repo: &str, tag: &str) -> Self {
    lock(&self.state).tags.insert((repo.to_string(), tag.to_string()));
    self
  }

  pub fn failing_tag(mut self, repo: &str) -> Self {
    self.failing_tags.insert(repo.to_string());
    self
  }

  /// A release object that exists before the run
  pub fn with_release(self, repo: &str, tag: &str, assets: &[&str]) -> Self {
    lock(&self.state).published.insert(
      (repo.to_string(), tag.to_string()),
      assets.iter().map(|a| a.to_string()).collect(),
    );
    self
  }

  pub fn failing_release(mut self) -> Self {
    self.fail_release = true;
    self
  }

  pub fn tags(&self) -> Vec<(String, String)> {
    lock(&self.state).tags.iter().cloned().collect()
  }

  pub fn checkouts(&self) -> Vec<String> {
    lock(&self.state).checkouts.clone()
  }

  pub fn releases(&self) -> Vec<CreatedRelease> {
    lock(&self.state).releases.clone()
  }

  /// Assets currently attached to the release for `tag`, if it exists
  pub fn release_assets(&self, repo: &str, tag: &str) -> Option<Vec<String>> {
    lock(&self.state)
      .published
      .get(&(repo.to_string(), tag.to_string()))
      .map(|a| a.iter().cloned().collect())
  }
}

impl SourceHost for FakeHost {
  fn checkout(&self, _url: &str, dest: &Path, _reference: &str) -> ReleaseResult<()> {
    let repo = file_name(dest);
    fs::create_dir_all(dest)?;
    if let Some(content) = self.sources.get(&repo) {
      fs::write(dest.join("Cargo.toml"), content)?;
    }
    lock(&self.state).checkouts.push(repo);
    Ok(())
  }

  fn head_commit(&self, repo_dir: &Path) -> ReleaseResult<String> {
    let repo = file_name(repo_dir);
    Ok(format!("{:0>40}", format!("{:x}", repo.len())))
  }

  fn tag(&self, repo_dir: &Path, tag: &str, _message: &str) -> ReleaseResult<TagOutcome> {
    let repo = file_name(repo_dir);
    if self.failing_tags.contains(&repo) {
      return Err(ReleaseError::TagFailure {
        repo,
        reason: "permission denied".to_string(),
      });
    }
    let mut state = lock(&self.state);
    if state.tags.insert((repo, tag.to_string())) {
      Ok(TagOutcome::Created)
    } else {
      Ok(TagOutcome::AlreadyExists)
    }
  }

  fn create_release(&self, repo: &str, tag: &str, notes: &str, assets: &[PathBuf]) -> ReleaseResult<String> {
    if self.fail_release {
      return Err(ReleaseError::message("release upload failed"));
    }
    let mut state = lock(&self.state);
    let key = (repo.to_string(), tag.to_string());
    let updated_existing = state.published.contains_key(&key);
    // Uploads replace same-named assets and keep the rest
    state
      .published
      .entry(key)
      .or_default()
      .extend(assets.iter().map(|a| file_name(a)));
    state.releases.push(CreatedRelease {
      repo: repo.to_string(),
      tag: tag.to_string(),
      notes: notes.to_string(),
      assets: assets.to_vec(),
      updated_existing,
    });
    Ok(format!("https://github.com/{}/releases/tag/{}", repo, tag))
  }
}

#[derive(Debug, Clone)]
pub struct BuildCall {
  pub component: String,
  pub platform: String,
  pub variant: Variant,
  pub features: FeatureSet,
}

pub struct FakeToolchain {
  failing: BTreeSet<String>,
  failing_tests: BTreeSet<String>,
  builds: Mutex<Vec<BuildCall>>,
  tests: Mutex<Vec<String>>,
}

impl FakeToolchain {
  pub fn new() -> Self {
    Self {
      failing: BTreeSet::new(),
      failing_tests: BTreeSet::new(),
      builds: Mutex::new(Vec::new()),
      tests: Mutex::new(Vec::new()),
    }
  }

  pub fn failing(mut self, component: &str) -> Self {
    self.failing.insert(component.to_string());
    self
  }

  pub fn failing_tests(mut self, component: &str) -> Self {
    self.failing_tests.insert(component.to_string());
    self
  }

  pub fn builds(&self) -> Vec<BuildCall> {
    lock(&self.builds).clone()
  }

  pub fn tests(&self) -> Vec<String> {
    lock(&self.tests).clone()
  }
}

impl Toolchain for FakeToolchain {
  fn build(&self, request: &BuildRequest<'_>) -> ReleaseResult<Vec<PathBuf>> {
    let component = &request.component.name;
    lock(&self.builds).push(BuildCall {
      component: component.clone(),
      platform: request.platform_label(),
      variant: request.variant,
      features: request.features.clone(),
    });
    if self.failing.contains(component) {
      return Err(ReleaseError::BuildFailure {
        component: component.clone(),
        platform: request.platform_label(),
        log: "error[E0433]: failed to resolve: use of undeclared crate".to_string(),
      });
    }
    if request.component.is_library() {
      return Ok(Vec::new());
    }

    let Some(platform) = request.platform else {
      return Ok(Vec::new());
    };
    let release_dir = request.target_dir.join(platform.triple()).join("release");
    fs::create_dir_all(&release_dir)?;
    let names = if request.component.binaries.is_empty() {
      vec![component.clone()]
    } else {
      request.component.binaries.clone()
    };
    names
      .iter()
      .map(|name| {
        let path = release_dir.join(platform.binary_file(name));
        fs::write(&path, format!("{} {} {}\n", name, platform, request.variant))?;
        Ok(path)
      })
      .collect()
  }

  fn test(&self, component: &Component, _source_dir: &Path, _features: &FeatureSet) -> ReleaseResult<()> {
    lock(&self.tests).push(component.name.clone());
    if self.failing_tests.contains(&component.name) {
      return Err(ReleaseError::TestFailure {
        component: component.name.clone(),
        log: "test consensus::tests::block_weight ... FAILED".to_string(),
      });
    }
    Ok(())
  }
}
