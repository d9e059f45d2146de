//! Target platforms and their archive tags

use crate::core::config::Variant;
use crate::core::error::{ReleaseError, ReleaseResult};
use serde::Serialize;
use std::fmt;

/// A target triple, e.g. `x86_64-unknown-linux-gnu`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Platform {
  triple: String,
}

impl Platform {
  pub fn parse(triple: &str) -> ReleaseResult<Self> {
    let triple = triple.trim();
    let parts: Vec<&str> = triple.split('-').collect();
    if parts.len() < 3 || parts.iter().any(|p| p.is_empty()) {
      return Err(ReleaseError::message(format!(
        "Invalid target triple '{}' (expected arch-vendor-os[-env])",
        triple
      )));
    }
    Ok(Self {
      triple: triple.to_string(),
    })
  }

  pub fn parse_all(triples: &[String]) -> ReleaseResult<Vec<Self>> {
    triples.iter().map(|t| Self::parse(t)).collect()
  }

  /// Triple for the machine running the pipeline
  pub fn host() -> Self {
    let arch = std::env::consts::ARCH;
    let triple = match std::env::consts::OS {
      "macos" => format!("{}-apple-darwin", arch),
      "windows" => format!("{}-pc-windows-msvc", arch),
      _ => format!("{}-unknown-linux-gnu", arch),
    };
    Self { triple }
  }

  pub fn triple(&self) -> &str {
    &self.triple
  }

  pub fn arch(&self) -> &str {
    self.triple.split('-').next().unwrap_or_default()
  }

  pub fn os(&self) -> &'static str {
    if self.triple.contains("windows") {
      "windows"
    } else if self.triple.contains("darwin") || self.triple.contains("apple") {
      "macos"
    } else if self.triple.contains("freebsd") {
      "freebsd"
    } else {
      "linux"
    }
  }

  pub fn is_windows(&self) -> bool {
    self.os() == "windows"
  }

  /// `os-arch`, e.g. `linux-x86_64`
  pub fn tag(&self) -> String {
    format!("{}-{}", self.os(), self.arch())
  }

  /// Archive label: the tag, suffixed for non-base variants
  pub fn label(&self, variant: Variant) -> String {
    match variant {
      Variant::Base => self.tag(),
      Variant::Experimental => format!("{}-experimental", self.tag()),
    }
  }

  /// File name of a binary on this platform
  pub fn binary_file(&self, name: &str) -> String {
    if self.is_windows() {
      format!("{}.exe", name)
    } else {
      name.to_string()
    }
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.triple)
  }
}

/// Archive base name: `{component}-{version}-{label}`
pub fn archive_stem(component: &str, version: &str, label: &str) -> String {
  format!("{}-{}-{}", component, version, label)
}
