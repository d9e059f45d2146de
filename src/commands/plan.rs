//! `plan`: what a release would build and what it can reuse

use crate::commands::{ProductionServices, platforms_or_default};
use crate::core::context::ReleaseContext;
use crate::core::error::ReleaseResult;
use crate::manifest::resolve;
use crate::release::build::BuildTarget;
use crate::release::plan::{BuildDecision, ReleasePlan, analyze};

/// Run the plan command
pub fn run_plan(ctx: &ReleaseContext, version: Option<String>, platforms: Vec<String>, json: bool) -> ReleaseResult<()> {
  let resolution = resolve(&ctx.manifest, &ctx.config.release.anchor, version.as_deref())?;
  let platforms = platforms_or_default(&platforms, &ctx.config)?;
  let targets = BuildTarget::matrix(&platforms, &ctx.config.release.variants);

  let production = ProductionServices::new(&ctx.config);
  let services = production.services();
  let plan = analyze(
    &ctx.manifest,
    &ctx.graph,
    &resolution.next,
    &targets,
    &ctx.config.release.repo,
    services.registry,
    services.index,
  )?;

  if json {
    println!("{}", serde_json::to_string_pretty(&plan)?);
  } else {
    print_plan(&plan);
  }
  Ok(())
}

fn print_plan(plan: &ReleasePlan) {
  println!("📦 Release plan for {} ({})", plan.version, plan.tag);
  println!();

  for name in &plan.order {
    println!("  {}", name);
    for step in plan.steps_for(name) {
      let icon = match step.decision {
        BuildDecision::Build => "🔨",
        BuildDecision::Download => "📥",
      };
      match &step.platform {
        Some(label) => println!("    {} {:<28} {}", icon, label, step.reason),
        None => println!("    {} {}", icon, step.reason),
      }
    }
  }

  println!();
  let reused = plan.steps.len() - plan.build_count();
  println!("Summary: {} to build, {} reused", plan.build_count(), reused);
}
