//! `collect` and `verify`: standalone archive packing and checking

use crate::core::config::Variant;
use crate::core::context::ReleaseContext;
use crate::core::error::{ReleaseError, ReleaseResult, ResultExt};
use crate::manifest::parse_version;
use crate::release::artifacts::{self, ArchiveVerification};
use crate::release::build::BuildTarget;
use crate::release::platform::Platform;
use std::fs;
use std::path::{Path, PathBuf};

pub struct CollectArgs {
  pub input: PathBuf,
  pub component: String,
  pub version: String,
  pub platform: String,
  pub variant: Variant,
  pub output_dir: Option<PathBuf>,
  pub json: bool,
}

/// Binaries of `component` in `input`: the declared ones, or every regular file
fn binaries_in(input: &Path, declared: &[String], platform: &Platform) -> ReleaseResult<Vec<PathBuf>> {
  if !declared.is_empty() {
    return Ok(declared.iter().map(|name| input.join(platform.binary_file(name))).collect());
  }
  let mut found = Vec::new();
  for entry in fs::read_dir(input).with_context(|| format!("Failed to read {}", input.display()))? {
    let path = entry?.path();
    if path.is_file() {
      found.push(path);
    }
  }
  found.sort();
  Ok(found)
}

/// Run the collect command
pub fn run_collect(ctx: &ReleaseContext, args: CollectArgs) -> ReleaseResult<()> {
  let component = ctx.manifest.require(&args.component)?;
  if component.is_library() {
    return Err(ReleaseError::with_help(
      format!("'{}' is a library and has no binaries to collect", args.component),
      "Declare `binaries` for the component in the versions manifest.",
    ));
  }
  let version = parse_version(None, args.version.trim_start_matches('v'))?;
  let target = BuildTarget {
    platform: Platform::parse(&args.platform)?,
    variant: args.variant,
  };
  let output_dir = args.output_dir.unwrap_or_else(|| ctx.output_dir());

  let binaries = binaries_in(&args.input, &component.binaries, &target.platform)?;
  let collected = artifacts::collect(&args.component, &version, &target, &binaries, &output_dir)?;

  if args.json {
    let all: Vec<_> = collected.binaries.iter().chain(collected.archives.iter()).collect();
    println!("{}", serde_json::to_string_pretty(&all)?);
    return Ok(());
  }

  println!("📦 Collected {} for {}", args.component, target.label());
  for binary in &collected.binaries {
    println!("   {}  {}", binary.sha256, crate::utils::file_name(&binary.path));
  }
  println!();
  for archive in &collected.archives {
    println!("   ✅ {}", archive.path.display());
  }
  Ok(())
}

/// Run the verify command
pub fn run_verify(archives: Vec<PathBuf>, json: bool) -> ReleaseResult<()> {
  if archives.is_empty() {
    return Err(ReleaseError::message("No archives given"));
  }

  let mut verified: Vec<ArchiveVerification> = Vec::new();
  let mut failures = Vec::new();
  for archive in &archives {
    match artifacts::verify_archive(archive) {
      Ok(v) => verified.push(v),
      Err(e) => failures.push((archive.clone(), e)),
    }
  }

  if json {
    println!("{}", serde_json::to_string_pretty(&verified)?);
  } else {
    for v in &verified {
      println!("✅ {} ({} files)", v.archive.display(), v.files.len());
    }
    for (archive, e) in &failures {
      println!("❌ {}: {}", archive.display(), e);
    }
  }

  match failures.into_iter().next() {
    None => Ok(()),
    Some((_, e)) => Err(e),
  }
}
