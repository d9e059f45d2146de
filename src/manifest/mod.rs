//! Versions manifest (`versions.toml`)
//!
//! The single declaration of every component in the ecosystem: its version, release
//! tag, required components and produced binaries. Parsed losslessly with `toml_edit`
//! so that document order is the declaration order (and therefore the tie-break order
//! for topological sorting), and so that the end-of-run version bump keeps comments
//! and formatting intact.
//!
//! ```toml
//! [versions]
//! bllvm-consensus = { version = "0.2.0", git_tag = "v0.2.0" }
//! bllvm-protocol = { version = "0.2.0", git_tag = "v0.2.0", requires = ["bllvm-consensus=0.2.0"] }
//! bllvm-node = { version = "0.2.0", git_tag = "v0.2.0", requires = ["bllvm-protocol=0.2.0"], binaries = ["bllvm"] }
//! ```

pub mod bump;
pub mod version;

use crate::core::error::{ConfigError, ReleaseError, ReleaseResult, ResultExt};
use crate::graph::dependency_graph::{Declaration, find_cycle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::{DocumentMut, Item, TableLike};

pub use version::{VersionResolution, parse_version, resolve, tag_for};

/// Library or binary component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
  Library,
  Binary,
}

/// One entry of `requires`, e.g. `bllvm-consensus=0.2.0`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
  pub name: String,
  /// Declared pin, if any
  pub pin: Option<String>,
}

impl Requirement {
  pub fn parse(raw: &str) -> Self {
    match raw.split_once('=') {
      Some((name, pin)) => Requirement {
        name: name.trim().to_string(),
        pin: Some(pin.trim().to_string()),
      },
      None => Requirement {
        name: raw.trim().to_string(),
        pin: None,
      },
    }
  }
}

/// A named build unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
  pub name: String,
  pub kind: ComponentKind,
  pub version: String,
  pub git_tag: String,
  pub git_commit: Option<String>,
  pub requires: Vec<Requirement>,
  pub binaries: Vec<String>,
  /// Non-critical: a build failure downgrades to a warning
  pub optional: bool,
  /// Clone URL override
  pub repo: Option<String>,
  /// Whether a library is published to the package registry
  pub publish: bool,
}

impl Component {
  pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
    self.requires.iter().map(|r| r.name.as_str())
  }

  pub fn is_library(&self) -> bool {
    self.kind == ComponentKind::Library
  }

  /// Libraries that go to the registry
  pub fn is_published(&self) -> bool {
    self.is_library() && self.publish
  }

  pub fn clone_url(&self, org: &str) -> String {
    self
      .repo
      .clone()
      .unwrap_or_else(|| format!("https://github.com/{}/{}.git", org, self.name))
  }
}

/// Outcome of manifest validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationReport {
  Valid,
  ValidWithWarnings { warnings: Vec<String> },
  Invalid { errors: Vec<String>, warnings: Vec<String> },
}

impl ValidationReport {
  pub fn is_valid(&self) -> bool {
    !matches!(self, ValidationReport::Invalid { .. })
  }

  pub fn errors(&self) -> &[String] {
    match self {
      ValidationReport::Invalid { errors, .. } => errors,
      _ => &[],
    }
  }

  pub fn warnings(&self) -> &[String] {
    match self {
      ValidationReport::Valid => &[],
      ValidationReport::ValidWithWarnings { warnings } | ValidationReport::Invalid { warnings, .. } => warnings,
    }
  }
}

/// Parsed versions manifest, in declaration order
#[derive(Debug, Clone, Serialize)]
pub struct VersionsManifest {
  #[serde(skip)]
  pub path: Option<PathBuf>,
  pub components: Vec<Component>,
  pub metadata: BTreeMap<String, String>,
}

impl VersionsManifest {
  /// Load and parse a manifest file
  pub fn load(path: &Path) -> ReleaseResult<Self> {
    if !path.exists() {
      return Err(ReleaseError::Config(ConfigError::ManifestNotFound {
        path: path.to_path_buf(),
      }));
    }
    let content =
      fs::read_to_string(path).with_context(|| format!("Failed to read versions manifest {}", path.display()))?;
    let mut manifest =
      Self::parse(&content).with_context(|| format!("Failed to parse versions manifest {}", path.display()))?;
    manifest.path = Some(path.to_path_buf());
    Ok(manifest)
  }

  /// Parse manifest text
  pub fn parse(content: &str) -> ReleaseResult<Self> {
    let doc: DocumentMut = content.parse()?;
    let versions = doc
      .get("versions")
      .and_then(Item::as_table_like)
      .ok_or_else(|| ReleaseError::message("Missing [versions] table"))?;

    let mut components = Vec::new();
    for (name, item) in versions.iter() {
      let entry = item
        .as_table_like()
        .ok_or_else(|| ReleaseError::message(format!("Entry '{}' under [versions] must be a table", name)))?;
      components.push(parse_component(name, entry)?);
    }

    let metadata = doc
      .get("metadata")
      .and_then(Item::as_table_like)
      .map(|t| {
        t.iter()
          .filter_map(|(k, v)| v.as_str().map(|s| (k.to_string(), s.to_string())))
          .collect()
      })
      .unwrap_or_default();

    Ok(Self {
      path: None,
      components,
      metadata,
    })
  }

  pub fn get(&self, name: &str) -> Option<&Component> {
    self.components.iter().find(|c| c.name == name)
  }

  /// Look up a component or fail with ComponentNotFound
  pub fn require(&self, name: &str) -> ReleaseResult<&Component> {
    self.get(name).ok_or_else(|| {
      ReleaseError::Config(ConfigError::ComponentNotFound {
        name: name.to_string(),
      })
    })
  }

  pub fn names(&self) -> Vec<String> {
    self.components.iter().map(|c| c.name.clone()).collect()
  }

  /// Adjacency in declaration order
  pub fn declarations(&self) -> Vec<Declaration> {
    self
      .components
      .iter()
      .map(|c| Declaration {
        name: c.name.clone(),
        requires: c.dependency_names().map(String::from).collect(),
      })
      .collect()
  }

  /// Full validation: collects every problem instead of stopping at the first
  pub fn validate(&self) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for component in &self.components {
      if let Err(e) = parse_version(Some(&component.name), &component.version) {
        errors.push(e.to_string());
      } else if component.git_tag != format!("v{}", component.version) {
        warnings.push(format!(
          "Component '{}' has git_tag '{}' but version '{}'",
          component.name, component.git_tag, component.version
        ));
      }

      for req in &component.requires {
        let Some(dep) = self.get(&req.name) else {
          errors.push(
            ReleaseError::DanglingDependency {
              component: component.name.clone(),
              missing: req.name.clone(),
            }
            .to_string(),
          );
          continue;
        };
        if let Some(pin) = &req.pin
          && pin != &dep.version
        {
          warnings.push(format!(
            "Component '{}' pins '{}={}' but '{}' declares version '{}'",
            component.name, req.name, pin, dep.name, dep.version
          ));
        }
        if !dep.is_library() {
          warnings.push(format!(
            "Component '{}' requires binary component '{}'; only libraries can be pinned",
            component.name, dep.name
          ));
        }
      }

      if component.is_library() && !component.binaries.is_empty() {
        warnings.push(format!(
          "Component '{}' is declared a library but lists binaries {:?}",
          component.name, component.binaries
        ));
      }
    }

    if let Some(cycle) = find_cycle(&self.declarations()) {
      errors.push(ReleaseError::CyclicDependency { components: cycle }.to_string());
    }

    if errors.is_empty() && warnings.is_empty() {
      ValidationReport::Valid
    } else if errors.is_empty() {
      ValidationReport::ValidWithWarnings { warnings }
    } else {
      ValidationReport::Invalid { errors, warnings }
    }
  }

  /// Fail fast on the first malformed version
  pub fn ensure_versions(&self) -> ReleaseResult<()> {
    for component in &self.components {
      parse_version(Some(&component.name), &component.version)?;
    }
    Ok(())
  }
}

fn parse_component(name: &str, entry: &dyn TableLike) -> ReleaseResult<Component> {
  let str_field = |key: &str| entry.get(key).and_then(Item::as_str).map(String::from);
  let list_field = |key: &str| -> ReleaseResult<Vec<String>> {
    match entry.get(key) {
      None => Ok(Vec::new()),
      Some(item) => {
        let array = item
          .as_array()
          .ok_or_else(|| ReleaseError::message(format!("'{}.{}' must be an array of strings", name, key)))?;
        array
          .iter()
          .map(|v| {
            v.as_str()
              .map(String::from)
              .ok_or_else(|| ReleaseError::message(format!("'{}.{}' must be an array of strings", name, key)))
          })
          .collect()
      }
    }
  };

  let version =
    str_field("version").ok_or_else(|| ReleaseError::message(format!("Component '{}' is missing `version`", name)))?;
  let git_tag = str_field("git_tag").unwrap_or_else(|| format!("v{}", version));
  let requires = list_field("requires")?.iter().map(|r| Requirement::parse(r)).collect();
  let binaries = list_field("binaries")?;

  let kind = match str_field("kind").as_deref() {
    Some("library") => ComponentKind::Library,
    Some("binary") => ComponentKind::Binary,
    Some(other) => {
      return Err(ReleaseError::message(format!(
        "Component '{}' has unknown kind '{}' (expected library or binary)",
        name, other
      )));
    }
    None if binaries.is_empty() => ComponentKind::Library,
    None => ComponentKind::Binary,
  };

  Ok(Component {
    name: name.to_string(),
    kind,
    version,
    git_tag,
    git_commit: str_field("git_commit"),
    requires,
    binaries,
    optional: entry.get("optional").and_then(Item::as_bool).unwrap_or(false),
    repo: str_field("repo"),
    publish: entry.get("publish").and_then(Item::as_bool).unwrap_or(true),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  const ECOSYSTEM: &str = r#"
# bllvm component versions
[versions]
bllvm-consensus = { version = "0.1.0", git_tag = "v0.1.0" }
bllvm-protocol = { version = "0.1.0", git_tag = "v0.1.0", requires = ["bllvm-consensus=0.1.0"] }
bllvm-node = { version = "0.1.0", git_tag = "v0.1.0", requires = ["bllvm-protocol=0.1.0"], binaries = ["bllvm-node"] }

[versions.bllvm-commons]
version = "0.1.0"
git_tag = "v0.1.0"
requires = ["bllvm-node"]
binaries = ["bllvm-commons"]
optional = true

[metadata]
ecosystem = "bllvm"
"#;

  #[test]
  fn test_parse_preserves_declaration_order() {
    let manifest = VersionsManifest::parse(ECOSYSTEM).unwrap();
    assert_eq!(
      manifest.names(),
      vec!["bllvm-consensus", "bllvm-protocol", "bllvm-node", "bllvm-commons"]
    );
    assert_eq!(manifest.metadata.get("ecosystem").map(String::as_str), Some("bllvm"));
  }

  #[test]
  fn test_kind_defaults_from_binaries() {
    let manifest = VersionsManifest::parse(ECOSYSTEM).unwrap();
    assert_eq!(manifest.get("bllvm-protocol").unwrap().kind, ComponentKind::Library);
    let node = manifest.get("bllvm-node").unwrap();
    assert_eq!(node.kind, ComponentKind::Binary);
    assert_eq!(node.binaries, vec!["bllvm-node"]);
    assert!(manifest.get("bllvm-commons").unwrap().optional);
  }

  #[test]
  fn test_requirement_pins() {
    let manifest = VersionsManifest::parse(ECOSYSTEM).unwrap();
    let protocol = manifest.get("bllvm-protocol").unwrap();
    assert_eq!(
      protocol.requires,
      vec![Requirement {
        name: "bllvm-consensus".to_string(),
        pin: Some("0.1.0".to_string())
      }]
    );
    let commons = manifest.get("bllvm-commons").unwrap();
    assert_eq!(commons.requires[0].pin, None);
  }

  #[test]
  fn test_valid_manifest() {
    let manifest = VersionsManifest::parse(ECOSYSTEM).unwrap();
    let report = manifest.validate();
    assert!(report.is_valid(), "{:?}", report);
  }

  #[test]
  fn test_validate_collects_all_errors() {
    let content = r#"
[versions]
a = { version = "1.2", git_tag = "v1.2" }
b = { version = "0.1.0", git_tag = "v0.1.0", requires = ["missing=0.1.0"] }
"#;
    let report = VersionsManifest::parse(content).unwrap().validate();
    assert!(!report.is_valid());
    assert_eq!(report.errors().len(), 2);
    assert!(report.errors()[0].contains("malformed version '1.2'"));
    assert!(report.errors()[1].contains("requires 'missing'"));
  }

  #[test]
  fn test_validate_reports_cycle() {
    let content = r#"
[versions]
A = { version = "0.1.0", git_tag = "v0.1.0", requires = ["B=0.1.0"] }
B = { version = "0.1.0", git_tag = "v0.1.0", requires = ["A=0.1.0"] }
"#;
    let report = VersionsManifest::parse(content).unwrap().validate();
    assert!(!report.is_valid());
    assert!(report.errors().iter().any(|e| e.contains("Circular dependency")));
  }

  #[test]
  fn test_pin_drift_is_a_warning() {
    let content = r#"
[versions]
bllvm-consensus = { version = "0.2.0", git_tag = "v0.2.0" }
bllvm-protocol = { version = "0.2.0", git_tag = "v0.2.0", requires = ["bllvm-consensus=0.1.0"] }
"#;
    let report = VersionsManifest::parse(content).unwrap().validate();
    assert!(report.is_valid());
    assert_eq!(report.warnings().len(), 1);
    assert!(report.warnings()[0].contains("bllvm-consensus=0.1.0"));
  }

  #[test]
  fn test_missing_version_is_an_error() {
    let err = VersionsManifest::parse("[versions]\na = { git_tag = \"v1.0.0\" }\n").unwrap_err();
    assert!(err.to_string().contains("missing `version`"));
  }

  #[test]
  fn test_unknown_kind_rejected() {
    let err = VersionsManifest::parse("[versions]\na = { version = \"1.0.0\", kind = \"plugin\" }\n").unwrap_err();
    assert!(err.to_string().contains("unknown kind"));
  }

  #[test]
  fn test_clone_url_default_and_override() {
    let manifest = VersionsManifest::parse(
      "[versions]\na = { version = \"1.0.0\" }\nb = { version = \"1.0.0\", repo = \"/srv/git/b\" }\n",
    )
    .unwrap();
    assert_eq!(
      manifest.get("a").unwrap().clone_url("BTCDecoded"),
      "https://github.com/BTCDecoded/a.git"
    );
    assert_eq!(manifest.get("b").unwrap().clone_url("BTCDecoded"), "/srv/git/b");
  }
}
