//! Package registry and release index adapters
//!
//! Both seams answer a yes/no question and never guess: a query that cannot be
//! answered is `RegistryUnavailable`, which aborts the run.

use crate::core::config::RegistryConfig;
use crate::core::error::{ReleaseError, ReleaseResult};
use crate::core::process;
use semver::Version;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Where libraries are published
pub trait PackageRegistry: Send + Sync {
  /// Whether `name` at exactly `version` is visible in the index
  fn exists(&self, name: &str, version: &Version) -> ReleaseResult<bool>;

  /// Publish the package whose manifest is at `manifest_path`
  fn publish(&self, name: &str, version: &Version, manifest_path: &Path) -> ReleaseResult<()>;
}

/// Where prebuilt binary archives live
pub trait ReleaseIndex: Send + Sync {
  fn has_asset(&self, repo: &str, tag: &str, asset: &str) -> ReleaseResult<bool>;

  fn download_asset(&self, repo: &str, tag: &str, asset: &str, dest_dir: &Path) -> ReleaseResult<PathBuf>;
}

/// Bounded visibility polling after a publish
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
  pub interval: Duration,
  pub max_attempts: u32,
}

impl PollPolicy {
  pub fn from_config(config: &RegistryConfig) -> Self {
    Self {
      interval: Duration::from_secs(config.poll_interval_secs),
      max_attempts: config.max_attempts,
    }
  }
}

/// Poll until `name@version` is visible, returning the number of attempts used
///
/// Query errors count as unsuccessful attempts; after `max_attempts` the last
/// reason is reported as `RegistryUnavailable`.
pub fn wait_until_visible(
  registry: &dyn PackageRegistry,
  name: &str,
  version: &Version,
  policy: PollPolicy,
  sleep: &dyn Fn(Duration),
) -> ReleaseResult<u32> {
  let mut last_reason = String::from("not yet indexed");

  for attempt in 1..=policy.max_attempts {
    match registry.exists(name, version) {
      Ok(true) => {
        log::info!("{}@{} visible after {} attempt(s)", name, version, attempt);
        return Ok(attempt);
      }
      Ok(false) => last_reason = "not yet indexed".to_string(),
      Err(e) => {
        log::debug!("visibility query for {} failed: {}", name, e);
        last_reason = e.to_string();
      }
    }
    if attempt < policy.max_attempts {
      sleep(policy.interval);
    }
  }

  Err(ReleaseError::RegistryUnavailable {
    component: name.to_string(),
    reason: format!(
      "{}@{} not visible after {} attempt(s): {}",
      name, version, policy.max_attempts, last_reason
    ),
  })
}

/// crates.io (or any sparse-index registry) via HTTP + `cargo publish`
pub struct CratesIoRegistry {
  index_url: String,
  agent: ureq::Agent,
  publish_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct IndexLine {
  vers: String,
  #[serde(default)]
  yanked: bool,
}

impl CratesIoRegistry {
  pub fn new(config: &RegistryConfig, publish_timeout: Duration) -> Self {
    let agent_config = ureq::Agent::config_builder()
      .timeout_global(Some(Duration::from_secs(config.http_timeout_secs)))
      .build();
    Self {
      index_url: config.index_url.trim_end_matches('/').to_string(),
      agent: ureq::Agent::new_with_config(agent_config),
      publish_timeout,
    }
  }

  fn index_url_for(&self, name: &str) -> ReleaseResult<String> {
    Ok(format!("{}/{}", self.index_url, sparse_index_path(name)?))
  }
}

/// Relative path of a crate's file in a sparse index
///
/// Only valid crate names (non-empty ASCII alphanumerics, `-` and `_`) have one.
pub fn sparse_index_path(name: &str) -> ReleaseResult<String> {
  if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
    return Err(ReleaseError::message(format!("'{}' is not a valid crate name", name)));
  }
  let lower = name.to_ascii_lowercase();
  Ok(match lower.len() {
    1 => format!("1/{}", lower),
    2 => format!("2/{}", lower),
    3 => format!("3/{}/{}", &lower[..1], lower),
    _ => format!("{}/{}/{}", &lower[..2], &lower[2..4], lower),
  })
}

/// Whether an index file lists `version` (yanked versions count as published)
pub fn index_contains(body: &str, version: &Version) -> ReleaseResult<bool> {
  let wanted = version.to_string();
  for line in body.lines().filter(|l| !l.trim().is_empty()) {
    let entry: IndexLine = serde_json::from_str(line)?;
    if entry.vers == wanted {
      if entry.yanked {
        log::warn!("version {} is yanked", wanted);
      }
      return Ok(true);
    }
  }
  Ok(false)
}

impl PackageRegistry for CratesIoRegistry {
  fn exists(&self, name: &str, version: &Version) -> ReleaseResult<bool> {
    let url = self.index_url_for(name)?;
    log::debug!("querying {}", url);

    let unavailable = |reason: String| ReleaseError::RegistryUnavailable {
      component: name.to_string(),
      reason,
    };

    let response = match self.agent.get(&url).call() {
      Ok(response) => response,
      Err(ureq::Error::StatusCode(404)) => return Ok(false),
      Err(ureq::Error::StatusCode(code)) => return Err(unavailable(format!("{} returned HTTP {}", url, code))),
      Err(e) => return Err(unavailable(format!("{}: {}", url, e))),
    };

    let body = response
      .into_body()
      .read_to_string()
      .map_err(|e| unavailable(format!("failed to read {}: {}", url, e)))?;
    index_contains(&body, version).map_err(|e| unavailable(e.to_string()))
  }

  fn publish(&self, name: &str, version: &Version, manifest_path: &Path) -> ReleaseResult<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("publish").arg("--manifest-path").arg(manifest_path).arg("--allow-dirty");

    let output = process::run(cmd, "cargo publish", self.publish_timeout)?;
    if !output.success() {
      return Err(ReleaseError::message(format!(
        "cargo publish failed for {}@{}:\n{}",
        name,
        version,
        output.combined()
      )));
    }
    log::info!("published {}@{}", name, version);
    Ok(())
  }
}
