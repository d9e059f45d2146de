use crate::core::error::{ConfigError, ReleaseError, ReleaseResult, ResultExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "BLLVM_RELEASE_";

/// Pipeline configuration for bllvm-release
/// Searched in order: release.toml, .release.toml, .config/release.toml
///
/// Precedence: CLI flags > environment (`BLLVM_RELEASE_*`) > config file > defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseConfig {
  #[serde(default)]
  pub release: ReleaseSettings,
  #[serde(default)]
  pub registry: RegistryConfig,
  #[serde(default)]
  pub timeouts: TimeoutConfig,
  #[serde(default)]
  pub variants: VariantsConfig,
  /// Per-component overrides, keyed by component name
  #[serde(default)]
  pub components: BTreeMap<String, ComponentSettings>,
  #[serde(default)]
  pub signing: SigningConfig,
}

/// Build variant: a named feature-flag configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
  /// Minimal production feature subset
  Base,
  /// Full feature superset
  Experimental,
}

impl Variant {
  pub fn as_str(&self) -> &'static str {
    match self {
      Variant::Base => "base",
      Variant::Experimental => "experimental",
    }
  }
}

impl fmt::Display for Variant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseSettings {
  /// Foundation component whose version is the canonical version source
  #[serde(default = "default_anchor")]
  pub anchor: String,

  /// Versions manifest, relative to the config root
  #[serde(default = "default_manifest")]
  pub manifest: PathBuf,

  /// Where component repositories are checked out
  #[serde(default = "default_workspace_dir")]
  pub workspace_dir: PathBuf,

  /// Where archives, checksums and the release record are written
  #[serde(default = "default_output_dir")]
  pub output_dir: PathBuf,

  /// GitHub organization owning the component repositories
  #[serde(default = "default_org")]
  pub org: String,

  /// Repository (`owner/name`) holding the aggregate release and prebuilt artifacts
  #[serde(default = "default_release_repo")]
  pub repo: String,

  /// Branch or ref checked out in each component repository
  #[serde(default = "default_source_ref")]
  pub source_ref: String,

  /// Target triples to build
  #[serde(default = "default_platforms")]
  pub platforms: Vec<String>,

  /// Variants to build for every platform
  #[serde(default = "default_variants")]
  pub variants: Vec<Variant>,

  /// Release notes template; the built-in template is used when absent
  #[serde(default)]
  pub notes_template: Option<PathBuf>,
}

fn default_anchor() -> String {
  "bllvm-consensus".to_string()
}

fn default_manifest() -> PathBuf {
  PathBuf::from("versions.toml")
}

fn default_workspace_dir() -> PathBuf {
  PathBuf::from("target/release-workspace")
}

fn default_output_dir() -> PathBuf {
  PathBuf::from("artifacts")
}

fn default_org() -> String {
  "BTCDecoded".to_string()
}

fn default_release_repo() -> String {
  "BTCDecoded/bllvm".to_string()
}

fn default_source_ref() -> String {
  "main".to_string()
}

fn default_platforms() -> Vec<String> {
  vec!["x86_64-unknown-linux-gnu".to_string()]
}

fn default_variants() -> Vec<Variant> {
  vec![Variant::Base]
}

impl Default for ReleaseSettings {
  fn default() -> Self {
    Self {
      anchor: default_anchor(),
      manifest: default_manifest(),
      workspace_dir: default_workspace_dir(),
      output_dir: default_output_dir(),
      org: default_org(),
      repo: default_release_repo(),
      source_ref: default_source_ref(),
      platforms: default_platforms(),
      variants: default_variants(),
      notes_template: None,
    }
  }
}

/// Package registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
  /// Sparse index base URL
  #[serde(default = "default_index_url")]
  pub index_url: String,

  /// Seconds between visibility polls after a publish
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,

  /// Polls before giving up with RegistryUnavailable
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,

  /// HTTP timeout for a single index query
  #[serde(default = "default_http_timeout")]
  pub http_timeout_secs: u64,
}

fn default_index_url() -> String {
  "https://index.crates.io".to_string()
}

fn default_poll_interval() -> u64 {
  10
}

fn default_max_attempts() -> u32 {
  30
}

fn default_http_timeout() -> u64 {
  30
}

impl Default for RegistryConfig {
  fn default() -> Self {
    Self {
      index_url: default_index_url(),
      poll_interval_secs: default_poll_interval(),
      max_attempts: default_max_attempts(),
      http_timeout_secs: default_http_timeout(),
    }
  }
}

/// Upper bounds for long-running external tools, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
  #[serde(default = "default_build_timeout")]
  pub build_secs: u64,
  #[serde(default = "default_test_timeout")]
  pub test_secs: u64,
  #[serde(default = "default_git_timeout")]
  pub git_secs: u64,
  #[serde(default = "default_publish_timeout")]
  pub publish_secs: u64,
}

fn default_build_timeout() -> u64 {
  45 * 60
}

fn default_test_timeout() -> u64 {
  30 * 60
}

fn default_git_timeout() -> u64 {
  5 * 60
}

fn default_publish_timeout() -> u64 {
  10 * 60
}

impl Default for TimeoutConfig {
  fn default() -> Self {
    Self {
      build_secs: default_build_timeout(),
      test_secs: default_test_timeout(),
      git_secs: default_git_timeout(),
      publish_secs: default_publish_timeout(),
    }
  }
}

/// Cargo feature selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureSet {
  #[serde(default)]
  pub features: Vec<String>,
  #[serde(default)]
  pub no_default_features: bool,
  #[serde(default)]
  pub all_features: bool,
}

impl FeatureSet {
  /// Cargo CLI arguments selecting these features
  pub fn cargo_args(&self) -> Vec<String> {
    let mut args = Vec::new();
    if self.all_features {
      args.push("--all-features".to_string());
      return args;
    }
    if self.no_default_features {
      args.push("--no-default-features".to_string());
    }
    if !self.features.is_empty() {
      args.push("--features".to_string());
      args.push(self.features.join(","));
    }
    args
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantsConfig {
  #[serde(default)]
  pub base: FeatureSet,
  #[serde(default = "default_experimental")]
  pub experimental: FeatureSet,
}

fn default_experimental() -> FeatureSet {
  FeatureSet {
    all_features: true,
    ..FeatureSet::default()
  }
}

impl Default for VariantsConfig {
  fn default() -> Self {
    Self {
      base: FeatureSet::default(),
      experimental: default_experimental(),
    }
  }
}

impl VariantsConfig {
  pub fn get(&self, variant: Variant) -> &FeatureSet {
    match variant {
      Variant::Base => &self.base,
      Variant::Experimental => &self.experimental,
    }
  }
}

/// Per-component overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentSettings {
  /// Use an existing checkout instead of cloning (relative to the config root)
  #[serde(default)]
  pub path: Option<PathBuf>,

  /// Feature set for the base variant, replacing the global one
  #[serde(default)]
  pub base: Option<FeatureSet>,

  /// Feature set for the experimental variant, replacing the global one
  #[serde(default)]
  pub experimental: Option<FeatureSet>,

  /// Run `cargo test` before publishing/collecting
  #[serde(default = "default_true")]
  pub run_tests: bool,

  /// Extra arguments appended to `cargo build`
  #[serde(default)]
  pub cargo_args: Vec<String>,
}

fn default_true() -> bool {
  true
}

impl Default for ComponentSettings {
  fn default() -> Self {
    Self {
      path: None,
      base: None,
      experimental: None,
      run_tests: true,
      cargo_args: Vec::new(),
    }
  }
}

/// Detached signature of the release checksum file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SigningConfig {
  #[serde(default)]
  pub enabled: bool,
  /// gpg key id; gpg's default key when absent
  #[serde(default)]
  pub key: Option<String>,
}

impl ReleaseConfig {
  /// Find config file in search order: release.toml, .release.toml, .config/release.toml
  pub fn find_config_path(path: &Path) -> Option<PathBuf> {
    let candidates = vec![
      path.join("release.toml"),
      path.join(".release.toml"),
      path.join(".config").join("release.toml"),
    ];

    candidates.into_iter().find(|p| p.exists())
  }

  /// Load config from the search path, falling back to defaults when no file exists
  pub fn load(root: &Path) -> ReleaseResult<Self> {
    match Self::find_config_path(root) {
      Some(config_path) => Self::load_file(&config_path),
      None => {
        log::debug!("no release.toml under {}, using defaults", root.display());
        Ok(Self::default())
      }
    }
  }

  /// Load an explicit config file
  pub fn load_file(config_path: &Path) -> ReleaseResult<Self> {
    let content = fs::read_to_string(config_path)
      .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
    let config: ReleaseConfig = toml_edit::de::from_str(&content)
      .with_context(|| format!("Failed to parse config from {}", config_path.display()))?;
    log::debug!("loaded config from {}", config_path.display());
    Ok(config)
  }

  /// Apply `BLLVM_RELEASE_*` overrides
  pub fn apply_env<F>(&mut self, lookup: F) -> ReleaseResult<()>
  where
    F: Fn(&str) -> Option<String>,
  {
    let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty());

    if let Some(dir) = var("OUTPUT_DIR") {
      self.release.output_dir = PathBuf::from(dir);
    }
    if let Some(dir) = var("WORKSPACE_DIR") {
      self.release.workspace_dir = PathBuf::from(dir);
    }
    if let Some(platforms) = var("PLATFORMS") {
      self.release.platforms = platforms
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect();
    }
    if let Some(url) = var("REGISTRY_INDEX") {
      self.registry.index_url = url;
    }
    if let Some(repo) = var("REPO") {
      self.release.repo = repo;
    }
    if let Some(attempts) = var("MAX_ATTEMPTS") {
      self.registry.max_attempts = attempts.parse().map_err(|_| {
        ReleaseError::Config(ConfigError::InvalidValue {
          field: format!("{}MAX_ATTEMPTS", ENV_PREFIX),
          reason: format!("'{}' is not a number", attempts),
        })
      })?;
    }
    Ok(())
  }

  /// Validate values that serde cannot
  pub fn validate(&self) -> ReleaseResult<()> {
    let invalid = |field: &str, reason: &str| {
      Err(ReleaseError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
      }))
    };

    if self.release.platforms.is_empty() {
      return invalid("release.platforms", "at least one target triple is required");
    }
    if self.release.variants.is_empty() {
      return invalid("release.variants", "at least one variant is required");
    }
    if self.registry.max_attempts == 0 {
      return invalid("registry.max_attempts", "must be greater than zero");
    }
    if self.timeouts.build_secs == 0 || self.timeouts.test_secs == 0 || self.timeouts.git_secs == 0 {
      return invalid("timeouts", "timeouts must be greater than zero");
    }
    if !self.release.repo.contains('/') {
      return invalid("release.repo", "expected `owner/name`");
    }
    Ok(())
  }

  /// Effective feature set for a component and variant
  pub fn features_for(&self, component: &str, variant: Variant) -> FeatureSet {
    let overridden = self.components.get(component).and_then(|c| match variant {
      Variant::Base => c.base.clone(),
      Variant::Experimental => c.experimental.clone(),
    });
    overridden.unwrap_or_else(|| self.variants.get(variant).clone())
  }

  pub fn component(&self, name: &str) -> ComponentSettings {
    self.components.get(name).cloned().unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn test_defaults_without_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = ReleaseConfig::load(dir.path()).unwrap();
    assert_eq!(config.release.anchor, "bllvm-consensus");
    assert_eq!(config.release.variants, vec![Variant::Base]);
    assert_eq!(config.timeouts.build_secs, 2700);
    assert!(config.variants.experimental.all_features);
    config.validate().unwrap();
  }

  #[test]
  fn test_search_order_prefers_root_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join(".config")).unwrap();
    fs::write(dir.path().join(".config/release.toml"), "[release]\nanchor = \"hidden\"\n").unwrap();
    fs::write(dir.path().join("release.toml"), "[release]\nanchor = \"visible\"\n").unwrap();

    let config = ReleaseConfig::load(dir.path()).unwrap();
    assert_eq!(config.release.anchor, "visible");
  }

  #[test]
  fn test_component_feature_override() {
    let toml = r#"
[variants.base]
features = ["production"]
no_default_features = true

[components.bllvm-node.experimental]
features = ["stratum-v2", "dandelion"]
"#;
    let config: ReleaseConfig = toml_edit::de::from_str(toml).unwrap();

    let base = config.features_for("bllvm-node", Variant::Base);
    assert_eq!(base.cargo_args(), vec!["--no-default-features", "--features", "production"]);

    let experimental = config.features_for("bllvm-node", Variant::Experimental);
    assert_eq!(experimental.cargo_args(), vec!["--features", "stratum-v2,dandelion"]);

    let other = config.features_for("bllvm-protocol", Variant::Experimental);
    assert_eq!(other.cargo_args(), vec!["--all-features"]);
  }

  #[test]
  fn test_env_overrides_file_values() {
    let mut config: ReleaseConfig = toml_edit::de::from_str("[release]\noutput_dir = \"from-file\"\n").unwrap();
    let env: HashMap<String, String> = [
      ("BLLVM_RELEASE_OUTPUT_DIR", "from-env"),
      ("BLLVM_RELEASE_PLATFORMS", "x86_64-unknown-linux-gnu, x86_64-pc-windows-gnu"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    config.apply_env(|k| env.get(k).cloned()).unwrap();
    assert_eq!(config.release.output_dir, PathBuf::from("from-env"));
    assert_eq!(config.release.platforms.len(), 2);
    assert_eq!(config.release.platforms[1], "x86_64-pc-windows-gnu");
  }

  #[test]
  fn test_rejects_bad_env_number() {
    let mut config = ReleaseConfig::default();
    let result = config.apply_env(|k| (k == "BLLVM_RELEASE_MAX_ATTEMPTS").then(|| "many".to_string()));
    assert!(result.is_err());
  }

  #[test]
  fn test_validate_rejects_zero_attempts() {
    let mut config = ReleaseConfig::default();
    config.registry.max_attempts = 0;
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_unknown_fields_rejected() {
    let result: Result<ReleaseConfig, _> = toml_edit::de::from_str("[release]\nanchorr = \"x\"\n");
    assert!(result.is_err());
  }
}
