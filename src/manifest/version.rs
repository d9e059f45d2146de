//! Version resolution against the anchor component

use crate::core::error::{ConfigError, ReleaseError, ReleaseResult};
use crate::manifest::VersionsManifest;
use semver::Version;
use serde::Serialize;

/// Parse a strict `MAJOR.MINOR.PATCH` version
///
/// Pre-release and build suffixes are rejected: release tags are always plain triples.
pub fn parse_version(component: Option<&str>, value: &str) -> ReleaseResult<Version> {
  let malformed = || ReleaseError::MalformedVersion {
    component: component.map(String::from),
    value: value.to_string(),
  };

  let parts: Vec<&str> = value.split('.').collect();
  if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
    return Err(malformed());
  }
  let numbers: Vec<u64> = parts
    .iter()
    .map(|p| p.parse::<u64>().map_err(|_| malformed()))
    .collect::<ReleaseResult<_>>()?;

  Ok(Version::new(numbers[0], numbers[1], numbers[2]))
}

/// Increment the patch segment
pub fn next_patch(version: &Version) -> ReleaseResult<Version> {
  let patch = version.patch.checked_add(1).ok_or_else(|| {
    ReleaseError::with_help(
      format!("Patch segment of {} cannot be incremented", version),
      "Pass the release version explicitly with --version",
    )
  })?;
  Ok(Version::new(version.major, version.minor, patch))
}

/// Tag name for a release version
pub fn tag_for(version: &Version) -> String {
  format!("v{}", version)
}

/// Current and target version of a release run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionResolution {
  pub anchor: String,
  pub current: Version,
  pub next: Version,
  /// True when `next` came from an explicit override
  pub overridden: bool,
}

impl VersionResolution {
  pub fn tag(&self) -> String {
    tag_for(&self.next)
  }
}

/// Resolve the anchor's current version and the version to release
///
/// An explicit override bypasses auto-increment entirely.
pub fn resolve(manifest: &VersionsManifest, anchor: &str, version_override: Option<&str>) -> ReleaseResult<VersionResolution> {
  let component = manifest.get(anchor).ok_or_else(|| {
    ReleaseError::Config(ConfigError::ComponentNotFound {
      name: anchor.to_string(),
    })
  })?;
  let current = parse_version(Some(anchor), &component.version)?;

  let (next, overridden) = match version_override {
    Some(explicit) => (parse_version(None, explicit.trim_start_matches('v'))?, true),
    None => (next_patch(&current)?, false),
  };

  Ok(VersionResolution {
    anchor: anchor.to_string(),
    current,
    next,
    overridden,
  })
}
