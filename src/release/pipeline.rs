//! The full release run
//!
//! ```text
//! resolve version -> checkout -> plan -> per component (topological order):
//!     pin manifests -> build/test -> publish libraries | download or build binaries
//!   -> publish gate -> collect archives -> checksums -> sign -> notes
//!   -> tag all repos -> create release -> release-manifest.json -> bump versions.toml
//! ```
//!
//! Every external effect goes through `Services`, so the whole run can be
//! exercised against in-memory fakes.

use crate::core::config::Variant;
use crate::core::context::ReleaseContext;
use crate::core::error::{ConfigError, ReleaseError, ReleaseResult};
use crate::core::vcs::SourceHost;
use crate::manifest::{bump, resolve};
use crate::release::artifacts::{self, Artifact, compute_sha256, write_checksums};
use crate::release::build::{BuildOutcome, BuildTarget, BuiltBinaries, Builder, DependencySource, Toolchain};
use crate::release::finalize::Finalizer;
use crate::release::notes::{self, NotesContext};
use crate::release::plan::{BuildDecision, analyze, asset_names};
use crate::release::platform::Platform;
use crate::release::publish::{Publisher, ecosystem_pins};
use crate::release::record::{ComponentRecord, ReleaseRecord, SkippedStep};
use crate::release::registry::{PackageRegistry, PollPolicy, ReleaseIndex};
use crate::release::rewrite;
use crate::release::signing::{Signer, SigningOutcome};
use crate::ui::progress::BuildProgress;
use crate::utils::file_name;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const NOTES_FILE: &str = "RELEASE_NOTES.md";

/// External collaborators of a run
pub struct Services<'a> {
  pub host: &'a dyn SourceHost,
  pub index: &'a dyn ReleaseIndex,
  pub registry: &'a dyn PackageRegistry,
  pub toolchain: &'a dyn Toolchain,
  /// Pause between registry visibility polls
  pub sleep: &'a dyn Fn(Duration),
}

#[derive(Clone)]
pub struct PipelineOptions {
  /// Explicit release version; the anchor's next patch when absent
  pub version: Option<String>,
  pub platforms: Vec<Platform>,
  pub variants: Vec<Variant>,
  pub output_dir: PathBuf,
  pub workspace_dir: PathBuf,
  /// Build against local references; publish, tag and bump nothing
  pub dry_run: bool,
  /// Produce artifacts but do not tag, release or bump
  pub skip_tagging: bool,
  pub no_bump: bool,
  pub progress: BuildProgress,
}

impl PipelineOptions {
  /// Defaults from the loaded config
  pub fn from_context(ctx: &ReleaseContext) -> ReleaseResult<Self> {
    Ok(Self {
      version: None,
      platforms: Platform::parse_all(&ctx.config.release.platforms)?,
      variants: ctx.config.release.variants.clone(),
      output_dir: ctx.output_dir(),
      workspace_dir: ctx.workspace_dir(),
      dry_run: false,
      skip_tagging: false,
      no_bump: false,
      progress: BuildProgress::hidden(),
    })
  }
}

pub struct PipelineOutcome {
  pub record: ReleaseRecord,
  pub record_path: PathBuf,
}

#[derive(Default)]
struct RunState {
  built: Vec<BuiltBinaries>,
  downloaded: Vec<Artifact>,
  skipped_components: Vec<String>,
  warnings: Vec<String>,
  skipped_steps: Vec<SkippedStep>,
}

impl RunState {
  fn skip_component(&mut self, name: &str, warning: String) {
    self.skipped_components.push(name.to_string());
    self.skipped_steps.push(SkippedStep::new(format!("release {}", name), warning.clone()));
    self.warnings.push(warning);
  }

  fn is_skipped(&self, name: &str) -> bool {
    self.skipped_components.iter().any(|s| s == name)
  }
}

/// Clone every component (or use its configured checkout)
pub fn checkout_all(
  ctx: &ReleaseContext,
  host: &dyn SourceHost,
  workspace_dir: &std::path::Path,
) -> ReleaseResult<BTreeMap<String, PathBuf>> {
  checkout_components(ctx, host, workspace_dir, ctx.graph.topological_order())
}

/// Source directory for each of `names`
pub fn checkout_components(
  ctx: &ReleaseContext,
  host: &dyn SourceHost,
  workspace_dir: &std::path::Path,
  names: &[String],
) -> ReleaseResult<BTreeMap<String, PathBuf>> {
  let mut sources = BTreeMap::new();
  for name in names {
    let component = ctx.manifest.require(name)?;
    let dir = match ctx.local_checkout(name) {
      Some(dir) => {
        if !dir.join("Cargo.toml").is_file() {
          return Err(ReleaseError::Config(ConfigError::InvalidValue {
            field: format!("components.{}.path", name),
            reason: format!("{} has no Cargo.toml", dir.display()),
          }));
        }
        dir
      }
      None => {
        let dest = workspace_dir.join(name);
        let url = component.clone_url(&ctx.config.release.org);
        log::info!("checking out {} ({})", name, url);
        host.checkout(&url, &dest, &ctx.config.release.source_ref)?;
        dest
      }
    };
    sources.insert(name.clone(), dir);
  }
  Ok(sources)
}

/// Run the pipeline end to end
pub fn run(ctx: &ReleaseContext, services: &Services<'_>, options: &PipelineOptions) -> ReleaseResult<PipelineOutcome> {
  let resolution = resolve(&ctx.manifest, &ctx.config.release.anchor, options.version.as_deref())?;
  let version = resolution.next.clone();
  let tag = resolution.tag();
  log::info!(
    "releasing {} ({} currently at {})",
    tag,
    resolution.anchor,
    resolution.current
  );

  let order = ctx.graph.topological_order();
  let sources = checkout_all(ctx, services.host, &options.workspace_dir)?;
  let targets = BuildTarget::matrix(&options.platforms, &options.variants);
  let release_repo = ctx.config.release.repo.as_str();

  let plan = analyze(
    &ctx.manifest,
    &ctx.graph,
    &version,
    &targets,
    release_repo,
    services.registry,
    services.index,
  )?;
  log::info!("{} of {} steps need a build", plan.build_count(), plan.steps.len());

  fs::create_dir_all(&options.output_dir)?;
  let builder = Builder::new(services.toolchain, &ctx.config, options.workspace_dir.join("target"))
    .with_progress(options.progress.clone());
  let mut publisher = Publisher::new(
    services.registry,
    PollPolicy::from_config(&ctx.config.registry),
    services.sleep,
    options.dry_run,
  );
  let ecosystem: BTreeSet<String> = ctx.manifest.names().into_iter().collect();
  let source_mode = if options.dry_run {
    DependencySource::Local
  } else {
    DependencySource::Registry
  };

  let mut state = RunState::default();

  for name in order {
    let component = ctx.manifest.require(name)?;
    let source_dir = &sources[name];

    if let Some(dep) = component.dependency_names().find(|d| state.is_skipped(d)) {
      let warning = format!("'{}' not released: dependency '{}' was skipped", name, dep);
      if !component.optional {
        return Err(ReleaseError::BuildFailure {
          component: name.clone(),
          platform: "all".to_string(),
          log: warning,
        });
      }
      log::warn!("{}", warning);
      state.skip_component(name, warning);
      continue;
    }

    let pins = ecosystem_pins(&ctx.manifest, &version, name);

    if let Some(dep) = publisher.blocked_by(component) {
      if component.is_library() && component.is_published() {
        publisher.publish_component(component, source_dir, &version, &pins)?;
      } else {
        log::warn!("not building {}: {} was not published", name, dep);
      }
      continue;
    }

    if !options.dry_run {
      rewrite::pin_component(source_dir, Some(&version), &pins)?;
    }

    if component.is_library() {
      if plan.decision(name, None) == Some(BuildDecision::Download) {
        log::info!("{}@{} is already published, not rebuilding", name, version);
        publisher.publish_component(component, source_dir, &version, &pins)?;
        continue;
      }
      match builder.build_component(component, source_dir, &[], source_mode, &ecosystem)? {
        BuildOutcome::Built(_) => {}
        BuildOutcome::Skipped { warning } => {
          state.skip_component(name, warning);
          continue;
        }
      }
      if component.is_published() {
        publisher.publish_component(component, source_dir, &version, &pins)?;
      }
      continue;
    }

    let mut to_build = Vec::new();
    for target in &targets {
      if plan.decision(name, Some(target.label().as_str())) != Some(BuildDecision::Download) {
        to_build.push(target.clone());
        continue;
      }
      for asset in asset_names(name, &version, target) {
        log::info!("downloading {} from {}@{}", asset, release_repo, tag);
        let path = services
          .index
          .download_asset(release_repo, &tag, &asset, &options.output_dir)?;
        state.downloaded.push(Artifact {
          component: name.clone(),
          platform: target.label(),
          variant: target.variant,
          sha256: compute_sha256(&path)?,
          path,
        });
      }
    }
    if to_build.is_empty() {
      continue;
    }
    match builder.build_component(component, source_dir, &to_build, source_mode, &ecosystem)? {
      BuildOutcome::Built(built) => state.built.extend(built),
      BuildOutcome::Skipped { warning } => state.skip_component(name, warning),
    }
  }

  let publish_report = publisher.finish();
  publish_report.ensure_success()?;

  let (artifacts, mut archives) = collect_all(&state, &version, &options.output_dir)?;
  ensure_complete(ctx, &targets, &state)?;

  archives.sort();
  let checksum_file = write_checksums(&options.output_dir, &archives)?;
  let checksums = fs::read_to_string(&checksum_file)?;

  let signing = Signer::gpg(Duration::from_secs(ctx.config.timeouts.git_secs)).sign(&ctx.config.signing, &checksum_file)?;
  if let SigningOutcome::Skipped { reason } = &signing {
    state.skipped_steps.push(SkippedStep::new("signing", reason.clone()));
  }

  let mut commits = BTreeMap::new();
  for name in order {
    commits.insert(name.clone(), services.host.head_commit(&sources[name])?);
  }
  let anchor_commit = commits.get(&ctx.config.release.anchor).cloned();

  let archive_names: Vec<String> = archives.iter().map(|p| file_name(p)).collect();
  let template = notes::load_template(ctx.notes_template().as_deref())?;
  let notes = notes::render(
    &template,
    &NotesContext {
      version: version.to_string(),
      tag: tag.clone(),
      commit: anchor_commit.clone().unwrap_or_default(),
      date: Utc::now().format("%Y-%m-%d").to_string(),
      components: NotesContext::component_list(&ctx.manifest, &version.to_string(), &state.skipped_components),
      artifacts: NotesContext::artifact_list(&archive_names),
      checksums: checksums.clone(),
    },
  );
  fs::write(options.output_dir.join(NOTES_FILE), &notes)?;

  let mut tags = BTreeMap::new();
  let mut release_url = None;
  let hold_reason = if options.dry_run {
    Some("dry run")
  } else if options.skip_tagging {
    Some("tagging disabled for this run")
  } else {
    None
  };

  match hold_reason {
    Some(reason) => {
      state.skipped_steps.push(SkippedStep::new("tagging", reason));
      state.skipped_steps.push(SkippedStep::new("release", reason));
    }
    None => {
      let mut finalizer = Finalizer::new(services.host);
      let repos: Vec<(String, PathBuf)> = order
        .iter()
        .filter(|n| !state.is_skipped(n))
        .map(|n| (n.clone(), sources[n].clone()))
        .collect();
      finalizer.tag_all(&repos, &tag, &format!("Release {}", tag))?;
      for repo in finalizer.untagged() {
        state.warnings.push(format!("{} was not tagged {}", repo, tag));
      }

      let mut assets = archives.clone();
      assets.push(checksum_file.clone());
      if let SigningOutcome::Signed { signature } = &signing {
        assets.push(signature.clone());
      }
      release_url = Some(finalizer.publish_release(release_repo, &tag, &notes, &assets)?);
      tags = finalizer.into_tags();
    }
  }

  let bump_target = match (&ctx.manifest.path, hold_reason) {
    (_, Some(reason)) => {
      state.skipped_steps.push(SkippedStep::new("version bump", reason));
      None
    }
    _ if options.no_bump => {
      state.skipped_steps.push(SkippedStep::new("version bump", "disabled for this run"));
      None
    }
    (None, None) => {
      state
        .skipped_steps
        .push(SkippedStep::new("version bump", "versions manifest was not loaded from a file"));
      None
    }
    (Some(path), None) => Some(path.clone()),
  };

  let record = ReleaseRecord {
    version: version.to_string(),
    tag: tag.clone(),
    commit: anchor_commit,
    generated_at: Utc::now(),
    dry_run: options.dry_run,
    components: ctx
      .manifest
      .components
      .iter()
      .map(|c| ComponentRecord {
        name: c.name.clone(),
        kind: c.kind,
        version: version.to_string(),
        commit: commits.get(&c.name).cloned(),
        released: !state.is_skipped(&c.name),
      })
      .collect(),
    artifacts,
    checksums,
    signing,
    publish: publish_report,
    tags,
    release_url,
    notes,
    skipped: state.skipped_steps,
    warnings: state.warnings,
  };
  let record_path = record.write(&options.output_dir)?;

  if let Some(path) = bump_target {
    bump::apply_bump(&path, &version, &commits)?;
  }

  Ok(PipelineOutcome { record, record_path })
}

fn collect_all(
  state: &RunState,
  version: &semver::Version,
  output_dir: &std::path::Path,
) -> ReleaseResult<(Vec<Artifact>, Vec<PathBuf>)> {
  let mut artifacts = state.downloaded.clone();
  let mut archives: Vec<PathBuf> = state.downloaded.iter().map(|a| a.path.clone()).collect();

  for built in &state.built {
    let collected = artifacts::collect(&built.component, version, &built.target, &built.binaries, output_dir)?;
    archives.extend(collected.archives.iter().map(|a| a.path.clone()));
    artifacts.extend(collected.binaries);
    artifacts.extend(collected.archives);
  }
  Ok((artifacts, archives))
}

/// Every released binary component has an archive for every target
fn ensure_complete(ctx: &ReleaseContext, targets: &[BuildTarget], state: &RunState) -> ReleaseResult<()> {
  let produced: BTreeSet<(String, String)> = state
    .built
    .iter()
    .map(|b| (b.component.clone(), b.target.label()))
    .chain(state.downloaded.iter().map(|a| (a.component.clone(), a.platform.clone())))
    .collect();

  for component in ctx.manifest.components.iter().filter(|c| !c.is_library()) {
    if state.is_skipped(&component.name) {
      continue;
    }
    for target in targets {
      if !produced.contains(&(component.name.clone(), target.label())) {
        return Err(ReleaseError::MissingArtifact {
          component: component.name.clone(),
          platform: target.label(),
        });
      }
    }
  }
  Ok(())
}
