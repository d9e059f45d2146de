//! CLI commands for bllvm-release
//!
//! ## Manifest
//! - **validate**: check the versions manifest
//! - **order**: topological build/publish order
//! - **version**: anchor version and the proposed next release
//! - **bump**: rewrite every component to a new version
//!
//! ## Pipeline stages
//! - **plan**: build/download decision per component and platform
//! - **build**: compile components and pack their binaries
//! - **publish**: publish libraries in dependency order
//! - **collect** / **verify**: archive binaries, check archives
//! - **tag**: idempotent tagging of every repository
//!
//! ## End to end
//! - **release**: the full pipeline
//! - **doctor**: external tool availability
//!
//! Commands that need the manifest take `&ReleaseContext`, loaded once in main.

pub mod artifacts;
pub mod build;
pub mod doctor;
pub mod manifest;
pub mod plan;
pub mod publish;
pub mod release;

pub use artifacts::{run_collect, run_verify};
pub use build::run_build;
pub use doctor::run_doctor;
pub use manifest::{run_bump, run_order, run_validate, run_version};
pub use plan::run_plan;
pub use publish::run_publish;
pub use release::{run_release, run_tag};

use crate::core::config::ReleaseConfig;
use crate::core::error::ReleaseResult;
use crate::core::vcs::GitHubHost;
use crate::release::platform::Platform;
use crate::release::{CargoToolchain, CratesIoRegistry, Services};
use std::time::Duration;

/// Production implementations of every pipeline seam
pub struct ProductionServices {
  host: GitHubHost,
  registry: CratesIoRegistry,
  toolchain: CargoToolchain,
}

impl ProductionServices {
  pub fn new(config: &ReleaseConfig) -> Self {
    let git = Duration::from_secs(config.timeouts.git_secs);
    Self {
      host: GitHubHost::new(git, git),
      registry: CratesIoRegistry::new(&config.registry, Duration::from_secs(config.timeouts.publish_secs)),
      toolchain: CargoToolchain::new(
        Duration::from_secs(config.timeouts.build_secs),
        Duration::from_secs(config.timeouts.test_secs),
      ),
    }
  }

  pub fn services(&self) -> Services<'_> {
    Services {
      host: &self.host,
      index: &self.host,
      registry: &self.registry,
      toolchain: &self.toolchain,
      sleep: &std::thread::sleep,
    }
  }
}

/// `--platform` flags, falling back to the configured platforms
pub(crate) fn platforms_or_default(flags: &[String], config: &ReleaseConfig) -> ReleaseResult<Vec<Platform>> {
  if flags.is_empty() {
    Platform::parse_all(&config.release.platforms)
  } else {
    Platform::parse_all(flags)
  }
}
