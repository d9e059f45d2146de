//! Detached signature for the release checksum file

use crate::core::config::SigningConfig;
use crate::core::error::{ReleaseError, ReleaseResult};
use crate::core::process::{self, ToolStatus};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SigningOutcome {
  Signed { signature: PathBuf },
  /// Signing was requested but could not be performed
  Skipped { reason: String },
  Disabled,
}

pub struct Signer {
  program: String,
  timeout: Duration,
}

impl Signer {
  pub fn gpg(timeout: Duration) -> Self {
    Self {
      program: "gpg".to_string(),
      timeout,
    }
  }

  #[cfg(test)]
  pub fn with_program(program: &str, timeout: Duration) -> Self {
    Self {
      program: program.to_string(),
      timeout,
    }
  }

  /// Write `<file>.asc` next to `file`
  ///
  /// A missing signing tool is an explicit skip; a failing one is an error.
  pub fn sign(&self, config: &SigningConfig, file: &Path) -> ReleaseResult<SigningOutcome> {
    if !config.enabled {
      return Ok(SigningOutcome::Disabled);
    }

    if let ToolStatus::Missing { reason } = process::probe(&self.program) {
      log::warn!("signing skipped: {}", reason);
      return Ok(SigningOutcome::Skipped {
        reason: format!("{} unavailable: {}", self.program, reason),
      });
    }

    let mut signature = file.as_os_str().to_owned();
    signature.push(".asc");
    let signature = PathBuf::from(signature);

    let mut cmd = Command::new(&self.program);
    cmd.args(["--batch", "--yes", "--armor", "--detach-sign"]);
    if let Some(key) = &config.key {
      cmd.arg("--local-user").arg(key);
    }
    cmd.arg("--output").arg(&signature).arg(file);

    let output = process::run(cmd, &self.program, self.timeout)?;
    if !output.success() {
      return Err(ReleaseError::message(format!(
        "Signing {} failed:\n{}",
        file.display(),
        output.combined()
      )));
    }
    log::info!("signed {}", file.display());
    Ok(SigningOutcome::Signed { signature })
  }
}
