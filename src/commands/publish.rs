//! `publish`: publish ecosystem libraries in dependency order

use crate::commands::ProductionServices;
use crate::core::context::ReleaseContext;
use crate::core::error::ReleaseResult;
use crate::manifest::resolve;
use crate::release::pipeline::checkout_components;
use crate::release::publish::{PublishReport, Publisher};
use crate::release::registry::PollPolicy;

/// Run the publish command (dry-run unless `apply`)
pub fn run_publish(ctx: &ReleaseContext, version: Option<String>, apply: bool, json: bool) -> ReleaseResult<()> {
  let resolution = resolve(&ctx.manifest, &ctx.config.release.anchor, version.as_deref())?;
  let libraries: Vec<String> = ctx
    .graph
    .topological_order()
    .iter()
    .filter(|n| {
      ctx
        .manifest
        .get(n)
        .is_some_and(|c| c.is_library() && c.is_published())
    })
    .cloned()
    .collect();

  let production = ProductionServices::new(&ctx.config);
  let services = production.services();
  let sources = checkout_components(ctx, services.host, &ctx.workspace_dir(), &libraries)?;

  if !json {
    println!("📦 Publishing {} libraries at {}", libraries.len(), resolution.next);
    println!();
  }

  let publisher = Publisher::new(
    services.registry,
    PollPolicy::from_config(&ctx.config.registry),
    services.sleep,
    !apply,
  );
  let report = publisher.publish_all(&ctx.manifest, &ctx.graph, &resolution.next, &sources)?;

  if json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  } else {
    print_report(&report);
  }
  report.ensure_success()
}

fn print_report(report: &PublishReport) {
  for name in &report.published {
    if report.dry_run {
      println!("  🔍 {} (would publish)", name);
    } else {
      println!("  ✅ {}", name);
    }
  }
  for name in &report.already_published {
    println!("  ⏭️  {} (already published)", name);
  }
  for failed in &report.failed {
    println!("  ❌ {}: {}", failed.component, failed.reason);
  }
  for name in &report.skipped {
    println!("  ⏸️  {} (dependency not published)", name);
  }

  if report.dry_run {
    println!();
    println!("🔍 Dry-run mode (nothing published). Re-run with --apply.");
  }
}
