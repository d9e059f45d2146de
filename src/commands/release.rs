//! `release` and `tag`
//!
//! `release` runs the whole pipeline; `tag` re-runs tagging on its own, which is
//! how a partially tagged release is completed.

use crate::commands::{ProductionServices, platforms_or_default};
use crate::core::config::Variant;
use crate::core::context::ReleaseContext;
use crate::core::error::ReleaseResult;
use crate::core::vcs::TagOutcome;
use crate::manifest::{parse_version, tag_for};
use crate::release::finalize::Finalizer;
use crate::release::pipeline::{self, PipelineOptions, checkout_all};
use crate::release::record::ReleaseRecord;
use crate::ui::progress::BuildProgress;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub struct ReleaseArgs {
  pub version: Option<String>,
  pub platforms: Vec<String>,
  pub variants: Vec<Variant>,
  pub output_dir: Option<PathBuf>,
  pub dry_run: bool,
  pub skip_tagging: bool,
  pub no_bump: bool,
  pub json: bool,
}

/// Run the full release pipeline
pub fn run_release(ctx: &ReleaseContext, args: ReleaseArgs) -> ReleaseResult<()> {
  let mut options = PipelineOptions::from_context(ctx)?;
  options.version = args.version;
  options.platforms = platforms_or_default(&args.platforms, &ctx.config)?;
  if !args.variants.is_empty() {
    options.variants = args.variants;
  }
  if let Some(dir) = args.output_dir {
    options.output_dir = dir;
  }
  options.dry_run = args.dry_run;
  options.skip_tagging = args.skip_tagging;
  options.no_bump = args.no_bump;
  if !args.json {
    options.progress = BuildProgress::new();
  }

  if !args.json {
    let mode = if args.dry_run { " (dry run)" } else { "" };
    println!("🚀 Releasing the {} ecosystem{}", ctx.manifest.components.len(), mode);
    println!();
  }

  let production = ProductionServices::new(&ctx.config);
  let outcome = pipeline::run(ctx, &production.services(), &options)?;

  if args.json {
    println!("{}", serde_json::to_string_pretty(&outcome.record)?);
  } else {
    print_summary(&outcome.record);
    println!();
    println!("📝 {}", outcome.record_path.display());
  }
  Ok(())
}

fn print_summary(record: &ReleaseRecord) {
  println!("📦 {} ({})", record.version, record.tag);
  for component in &record.components {
    let icon = if component.released { "✅" } else { "⏭️ " };
    println!("  {} {}", icon, component.name);
  }

  let archives = record
    .artifacts
    .iter()
    .filter(|a| a.path.extension().is_some_and(|e| e == "gz" || e == "zip"))
    .count();
  println!();
  println!("  Archives: {}", archives);
  println!(
    "  Published: {} (already published: {})",
    record.publish.published.len(),
    record.publish.already_published.len()
  );

  if !record.tags.is_empty() {
    println!();
    print_tags(&record.tag, &record.tags);
  }
  if let Some(url) = &record.release_url {
    println!("  🔗 {}", url);
  }

  for step in &record.skipped {
    println!("  ⏸️  {} skipped: {}", step.step, step.reason);
  }
  for warning in &record.warnings {
    println!("  ⚠️  {}", warning);
  }
}

fn print_tags(tag: &str, tags: &BTreeMap<String, TagOutcome>) {
  for (repo, outcome) in tags {
    match outcome {
      TagOutcome::Created => println!("  🏷️  {} {}", repo, tag),
      TagOutcome::AlreadyExists => println!("  🏷️  {} {} (already existed)", repo, tag),
      TagOutcome::Failed { reason } => println!("  ❌ {} {}: {}", repo, tag, reason),
    }
  }
}

/// Tag every repository at `version`
///
/// Tag failures are reported but never fail the command.
pub fn run_tag(ctx: &ReleaseContext, version: String, message: Option<String>, json: bool) -> ReleaseResult<()> {
  let version = parse_version(None, version.trim_start_matches('v'))?;
  let tag = tag_for(&version);
  let message = message.unwrap_or_else(|| format!("Release {}", tag));

  let production = ProductionServices::new(&ctx.config);
  let services = production.services();
  let sources = checkout_all(ctx, services.host, &ctx.workspace_dir())?;
  let repos: Vec<(String, PathBuf)> = sources.into_iter().collect();

  let mut finalizer = Finalizer::new(services.host);
  finalizer.tag_all(&repos, &tag, &message)?;

  if json {
    println!("{}", serde_json::to_string_pretty(finalizer.tags())?);
  } else {
    print_tags(&tag, finalizer.tags());
    let untagged = finalizer.untagged();
    if !untagged.is_empty() {
      println!();
      println!("⚠️  Not tagged: {}. Re-run `bllvm-release tag` once fixed.", untagged.join(", "));
    }
  }
  Ok(())
}
