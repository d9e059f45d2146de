//! `validate`, `order`, `version` and `bump`: read-mostly views of the versions manifest

use crate::core::context::ReleaseContext;
use crate::core::error::{ExitCode, ReleaseError, ReleaseResult};
use crate::manifest::bump::{apply_bump, bump_document};
use crate::manifest::{ComponentKind, ValidationReport, VersionsManifest, resolve};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Run the validate command
///
/// Works on manifests the context loader would reject, so it takes a path.
pub fn run_validate(manifest_path: &Path, json: bool) -> ReleaseResult<()> {
  let manifest = VersionsManifest::load(manifest_path)?;
  let report = manifest.validate();

  if json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    print_report(manifest_path, &manifest, &report);
  }

  if !report.is_valid() {
    // Details were already printed
    std::process::exit(ExitCode::Validation.as_i32());
  }
  Ok(())
}

fn print_report(path: &Path, manifest: &VersionsManifest, report: &ValidationReport) {
  println!("📋 {} ({} components)", path.display(), manifest.components.len());
  println!();
  for error in report.errors() {
    println!("  ❌ {}", error);
  }
  for warning in report.warnings() {
    println!("  ⚠️  {}", warning);
  }
  if !report.errors().is_empty() || !report.warnings().is_empty() {
    println!();
  }

  match report {
    ValidationReport::Valid => println!("✅ Manifest is valid"),
    ValidationReport::ValidWithWarnings { warnings } => {
      println!("✅ Manifest is valid ({} warnings)", warnings.len())
    }
    ValidationReport::Invalid { errors, .. } => println!("❌ Manifest is invalid ({} errors)", errors.len()),
  }
}

#[derive(Serialize)]
struct OrderEntry<'a> {
  position: usize,
  name: &'a str,
  kind: ComponentKind,
  requires: Vec<String>,
  dependents: Vec<String>,
}

/// Run the order command
///
/// With `affected_by`, only that component and everything that transitively
/// requires it are listed, still in build order.
pub fn run_order(ctx: &ReleaseContext, json: bool, dot: bool, affected_by: Option<String>) -> ReleaseResult<()> {
  if dot {
    print!("{}", ctx.graph.to_dot());
    return Ok(());
  }

  let selected: Option<Vec<String>> = match &affected_by {
    Some(name) => {
      let mut names = ctx.graph.transitive_dependents(name)?;
      names.push(name.clone());
      Some(names)
    }
    None => None,
  };

  let mut entries = Vec::new();
  for name in ctx.graph.topological_order() {
    if let Some(selected) = &selected
      && !selected.contains(name)
    {
      continue;
    }
    let component = ctx.manifest.require(name)?;
    entries.push(OrderEntry {
      position: entries.len() + 1,
      name,
      kind: component.kind,
      requires: ctx.graph.direct_dependencies(name)?,
      dependents: ctx.graph.direct_dependents(name)?,
    });
  }

  if json {
    println!("{}", serde_json::to_string_pretty(&entries)?);
    return Ok(());
  }

  match &affected_by {
    Some(name) => println!("🔗 Rebuild order after a change to {}", name),
    None => println!("🔗 Build and publish order"),
  }
  println!();
  for entry in &entries {
    let kind = match entry.kind {
      ComponentKind::Library => "library",
      ComponentKind::Binary => "binary",
    };
    if entry.requires.is_empty() {
      println!("  {}. {} ({})", entry.position, entry.name, kind);
    } else {
      println!(
        "  {}. {} ({}) <- {}",
        entry.position,
        entry.name,
        kind,
        entry.requires.join(", ")
      );
    }
  }
  Ok(())
}

/// Run the version command
pub fn run_version(ctx: &ReleaseContext, next: bool, set: Option<String>, json: bool) -> ReleaseResult<()> {
  let resolution = resolve(&ctx.manifest, &ctx.config.release.anchor, set.as_deref())?;

  if json {
    println!("{}", serde_json::to_string_pretty(&resolution)?);
    return Ok(());
  }

  if !next && set.is_none() {
    println!("{}", resolution.current);
    return Ok(());
  }

  println!("📦 {} is at {}", resolution.anchor, resolution.current);
  let source = if resolution.overridden {
    "explicit"
  } else {
    "next patch"
  };
  println!("   Next release: {} ({}, tag {})", resolution.next, source, resolution.tag());
  if resolution.next <= resolution.current {
    println!("   ⚠️  {} is not newer than the current version", resolution.next);
  }
  Ok(())
}

/// Run the bump command (dry-run unless `apply`)
pub fn run_bump(ctx: &ReleaseContext, version: Option<String>, apply: bool, json: bool) -> ReleaseResult<()> {
  let path = ctx
    .manifest
    .path
    .clone()
    .ok_or_else(|| ReleaseError::message("The versions manifest was not loaded from a file"))?;
  let resolution = resolve(&ctx.manifest, &ctx.config.release.anchor, version.as_deref())?;
  let commits = BTreeMap::new();

  let current = fs::read_to_string(&path)?;
  let updated = bump_document(&current, &resolution.next, &commits)?;
  let changed: Vec<&str> = ctx
    .manifest
    .components
    .iter()
    .filter(|c| c.version != resolution.next.to_string())
    .map(|c| c.name.as_str())
    .collect();

  if json {
    #[derive(Serialize)]
    struct BumpSummary<'a> {
      manifest: &'a Path,
      version: String,
      changed: &'a [&'a str],
      applied: bool,
    }
    println!(
      "{}",
      serde_json::to_string_pretty(&BumpSummary {
        manifest: &path,
        version: resolution.next.to_string(),
        changed: &changed,
        applied: apply,
      })?
    );
  } else {
    println!("📦 Bump {} to {}", path.display(), resolution.next);
    for name in &changed {
      println!("   {}", name);
    }
    if changed.is_empty() {
      println!("   (every component is already at {})", resolution.next);
    }
  }

  if !apply {
    if !json {
      println!();
      println!("🔍 Dry-run mode (no changes applied). Re-run with --apply.");
    }
    return Ok(());
  }

  if updated != current {
    apply_bump(&path, &resolution.next, &commits)?;
  }
  if !json {
    println!("✅ Updated {}", path.display());
  }
  Ok(())
}
