//! `build`: compile selected components and pack their binaries
//!
//! Development builds use local dependency references; `--registry-deps`
//! builds against the published versions the manifest pins.

use crate::commands::{ProductionServices, platforms_or_default};
use crate::core::config::Variant;
use crate::core::context::ReleaseContext;
use crate::core::error::{ReleaseError, ReleaseResult};
use crate::manifest::resolve;
use crate::release::artifacts;
use crate::release::build::{BuildOutcome, BuildTarget, Builder, DependencySource};
use crate::release::pipeline::checkout_components;
use crate::release::publish::ecosystem_pins;
use crate::release::rewrite;
use crate::ui::progress::BuildProgress;
use std::collections::BTreeSet;
use std::path::PathBuf;

pub struct BuildArgs {
  pub components: Vec<String>,
  pub platforms: Vec<String>,
  pub variants: Vec<Variant>,
  pub output_dir: Option<PathBuf>,
  pub registry_deps: bool,
}

/// Run the build command
pub fn run_build(ctx: &ReleaseContext, args: BuildArgs) -> ReleaseResult<()> {
  for name in &args.components {
    ctx.manifest.require(name)?;
  }
  // Keep dependency order even for an explicit selection
  let selected: Vec<String> = ctx
    .graph
    .topological_order()
    .iter()
    .filter(|n| args.components.is_empty() || args.components.contains(n))
    .cloned()
    .collect();
  if selected.is_empty() {
    return Err(ReleaseError::message("No components selected"));
  }

  let platforms = platforms_or_default(&args.platforms, &ctx.config)?;
  let variants = if args.variants.is_empty() {
    ctx.config.release.variants.clone()
  } else {
    args.variants
  };
  let targets = BuildTarget::matrix(&platforms, &variants);
  let output_dir = args.output_dir.unwrap_or_else(|| ctx.output_dir());
  let version = resolve(&ctx.manifest, &ctx.config.release.anchor, None)?.current;

  let production = ProductionServices::new(&ctx.config);
  let services = production.services();
  let workspace_dir = ctx.workspace_dir();
  let sources = checkout_components(ctx, services.host, &workspace_dir, &selected)?;

  let builder = Builder::new(services.toolchain, &ctx.config, workspace_dir.join("target"))
    .with_progress(BuildProgress::new());
  let ecosystem: BTreeSet<String> = ctx.manifest.names().into_iter().collect();
  let source = if args.registry_deps {
    DependencySource::Registry
  } else {
    DependencySource::Local
  };

  println!("🔨 Building {} component(s) for {} target(s)", selected.len(), targets.len());
  let mut skipped = Vec::new();
  for name in &selected {
    let component = ctx.manifest.require(name)?;
    let source_dir = &sources[name];

    if args.registry_deps {
      let changes = rewrite::pin_component(source_dir, None, &ecosystem_pins(&ctx.manifest, &version, name))?;
      log::debug!("{}: {} dependency pins rewritten", name, changes.len());
    }

    match builder.build_component(component, source_dir, &targets, source, &ecosystem)? {
      BuildOutcome::Built(built) => {
        for binaries in built {
          let collected =
            artifacts::collect(name, &version, &binaries.target, &binaries.binaries, &output_dir)?;
          for archive in &collected.archives {
            println!("   📦 {}", archive.path.display());
          }
        }
        println!("✅ {}", name);
      }
      BuildOutcome::Skipped { warning } => {
        println!("⚠️  {}", warning);
        skipped.push(name.clone());
      }
    }
  }

  if !skipped.is_empty() {
    println!();
    println!("Skipped optional components: {}", skipped.join(", "));
  }
  Ok(())
}
