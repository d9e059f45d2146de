mod commands;
mod core;
mod graph;
mod manifest;
mod release;
#[cfg(test)]
mod testing;
mod ui;
mod utils;

use clap::{Parser, Subcommand};
use commands::artifacts::CollectArgs;
use commands::build::BuildArgs;
use commands::release::ReleaseArgs;
use core::config::Variant;
use core::context::{ReleaseContext, load_config};
use core::error::{ReleaseError, print_error};
use std::path::{Path, PathBuf};

/// Build, publish and release the bllvm component ecosystem in dependency order
#[derive(Parser)]
#[command(name = "bllvm-release")]
#[command(version, about, long_about = None)]
#[command(styles = get_styles())]
struct Cli {
  /// Pipeline config file (default: release.toml search in the current directory)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Versions manifest (default: `[release] manifest` from the config)
  #[arg(long, global = true)]
  manifest: Option<PathBuf>,

  /// Debug-level diagnostics on stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Also write diagnostics to this file
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  // ============================================================================
  // Versions manifest
  // ============================================================================
  /// Validate the versions manifest
  Validate {
    /// Output results in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Print the topological build and publish order
  Order {
    /// Output results in JSON format
    #[arg(long)]
    json: bool,
    /// Print the dependency graph in Graphviz DOT format
    #[arg(long, conflicts_with = "json")]
    dot: bool,
    /// Only the given component and everything that requires it
    #[arg(long, value_name = "NAME", conflicts_with = "dot")]
    affected_by: Option<String>,
  },

  /// Show the anchor version and the proposed next release
  Version {
    /// Show the next release version
    #[arg(long)]
    next: bool,
    /// Check an explicit release version instead of the next patch
    #[arg(long, value_name = "X.Y.Z")]
    set: Option<String>,
    /// Output results in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Rewrite every component of the manifest to a new version
  Bump {
    /// Target version (default: next patch of the anchor)
    #[arg(long, value_name = "X.Y.Z")]
    version: Option<String>,
    /// Actually rewrite the manifest (default: dry-run)
    #[arg(long)]
    apply: bool,
    /// Output results in JSON format
    #[arg(long)]
    json: bool,
  },

  // ============================================================================
  // Pipeline stages
  // ============================================================================
  /// Decide, per component and platform, what to build and what to reuse
  Plan {
    /// Release version (default: next patch of the anchor)
    #[arg(long, value_name = "X.Y.Z")]
    version: Option<String>,
    /// Target triple (repeatable; default: configured platforms)
    #[arg(long = "platform", value_name = "TRIPLE")]
    platforms: Vec<String>,
    /// Output plan in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Build components and pack their binaries
  Build {
    /// Component to build (repeatable; default: all)
    #[arg(long = "component", value_name = "NAME")]
    components: Vec<String>,
    /// Target triple (repeatable; default: configured platforms)
    #[arg(long = "platform", value_name = "TRIPLE")]
    platforms: Vec<String>,
    /// Feature variant (repeatable; default: configured variants)
    #[arg(long = "variant", value_enum)]
    variants: Vec<Variant>,
    /// Directory for archives (default: configured output dir)
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Build against published ecosystem versions instead of local paths
    #[arg(long)]
    registry_deps: bool,
  },

  /// Publish ecosystem libraries in dependency order
  Publish {
    /// Release version (default: next patch of the anchor)
    #[arg(long, value_name = "X.Y.Z")]
    version: Option<String>,
    /// Actually publish (default: dry-run)
    #[arg(long)]
    apply: bool,
    /// Output report in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Stage, checksum and archive the binaries of one component
  Collect {
    /// Directory holding the built binaries
    #[arg(long)]
    input: PathBuf,
    /// Component the binaries belong to
    #[arg(long)]
    component: String,
    /// Release version
    #[arg(long, value_name = "X.Y.Z")]
    version: String,
    /// Target triple the binaries were built for
    #[arg(long, value_name = "TRIPLE")]
    platform: String,
    /// Feature variant
    #[arg(long, value_enum, default_value = "base")]
    variant: Variant,
    /// Directory for archives (default: configured output dir)
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Output artifacts in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Check archives against the checksum file they contain
  Verify {
    /// Archives to check (.tar.gz or .zip)
    #[arg(required = true)]
    archives: Vec<PathBuf>,
    /// Output results in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Tag every component repository (safe to re-run)
  Tag {
    /// Release version
    #[arg(long, value_name = "X.Y.Z")]
    version: String,
    /// Tag message (default: "Release vX.Y.Z")
    #[arg(long)]
    message: Option<String>,
    /// Output tag outcomes in JSON format
    #[arg(long)]
    json: bool,
  },

  // ============================================================================
  // End to end
  // ============================================================================
  /// Run the full release pipeline
  Release {
    /// Release version (default: next patch of the anchor)
    #[arg(long, value_name = "X.Y.Z")]
    version: Option<String>,
    /// Target triple (repeatable; default: configured platforms)
    #[arg(long = "platform", value_name = "TRIPLE")]
    platforms: Vec<String>,
    /// Feature variant (repeatable; default: configured variants)
    #[arg(long = "variant", value_enum)]
    variants: Vec<Variant>,
    /// Directory for archives and the release record
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Build with local references; publish, tag and bump nothing
    #[arg(long)]
    dry_run: bool,
    /// Produce artifacts without tagging, releasing or bumping
    #[arg(long)]
    skip_tagging: bool,
    /// Leave the versions manifest untouched
    #[arg(long)]
    no_bump: bool,
    /// Output the release record in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Check that the external tools a release needs are installed
  Doctor {
    /// Output results in JSON format
    #[arg(long)]
    json: bool,
  },
}

fn get_styles() -> clap::builder::Styles {
  clap::builder::Styles::styled()
    .usage(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
    )
    .header(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
    )
    .literal(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))))
    .invalid(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
    )
    .error(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
    )
    .valid(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
    )
    .placeholder(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))))
}

fn main() {
  let cli = Cli::parse();

  if let Err(e) = ui::logging::init(cli.verbose, cli.log_file.as_deref()) {
    eprintln!("Warning: {}", e);
  }

  let root = match std::env::current_dir() {
    Ok(dir) => dir,
    Err(e) => {
      eprintln!("Error: Failed to get current directory: {}", e);
      std::process::exit(1);
    }
  };

  // Commands that must work without a loadable manifest
  let result = match cli.command {
    Commands::Doctor { json } => commands::run_doctor(json),
    Commands::Verify { archives, json } => commands::run_verify(archives, json),
    Commands::Validate { json } => {
      manifest_path(&root, cli.config.as_deref(), cli.manifest.as_deref()).and_then(|p| commands::run_validate(&p, json))
    }
    command => {
      // Build the release context once; everything below borrows it
      let ctx = match ReleaseContext::build(&root, cli.config.as_deref(), cli.manifest.as_deref()) {
        Ok(ctx) => ctx,
        Err(e) => handle_error(e),
      };
      run_with_context(&ctx, command)
    }
  };

  if let Err(err) = result {
    handle_error(err);
  }
}

fn run_with_context(ctx: &ReleaseContext, command: Commands) -> Result<(), ReleaseError> {
  match command {
    Commands::Order { json, dot, affected_by } => commands::run_order(ctx, json, dot, affected_by),
    Commands::Version { next, set, json } => commands::run_version(ctx, next, set, json),
    Commands::Bump { version, apply, json } => commands::run_bump(ctx, version, apply, json),
    Commands::Plan {
      version,
      platforms,
      json,
    } => commands::run_plan(ctx, version, platforms, json),
    Commands::Build {
      components,
      platforms,
      variants,
      output_dir,
      registry_deps,
    } => commands::run_build(
      ctx,
      BuildArgs {
        components,
        platforms,
        variants,
        output_dir,
        registry_deps,
      },
    ),
    Commands::Publish { version, apply, json } => commands::run_publish(ctx, version, apply, json),
    Commands::Collect {
      input,
      component,
      version,
      platform,
      variant,
      output_dir,
      json,
    } => commands::run_collect(
      ctx,
      CollectArgs {
        input,
        component,
        version,
        platform,
        variant,
        output_dir,
        json,
      },
    ),
    Commands::Tag { version, message, json } => commands::run_tag(ctx, version, message, json),
    Commands::Release {
      version,
      platforms,
      variants,
      output_dir,
      dry_run,
      skip_tagging,
      no_bump,
      json,
    } => commands::run_release(
      ctx,
      ReleaseArgs {
        version,
        platforms,
        variants,
        output_dir,
        dry_run,
        skip_tagging,
        no_bump,
        json,
      },
    ),
    Commands::Doctor { json } => commands::run_doctor(json),
    Commands::Verify { archives, json } => commands::run_verify(archives, json),
    Commands::Validate { json } => match &ctx.manifest.path {
      Some(path) => commands::run_validate(path, json),
      None => Err(ReleaseError::message("The versions manifest was not loaded from a file")),
    },
  }
}

/// Versions manifest location without loading it
fn manifest_path(root: &Path, config: Option<&Path>, manifest: Option<&Path>) -> Result<PathBuf, ReleaseError> {
  if let Some(path) = manifest {
    return Ok(path.to_path_buf());
  }
  let config = load_config(root, config)?;
  Ok(utils::resolve_path(root, &config.release.manifest))
}

fn handle_error(err: ReleaseError) -> ! {
  print_error(&err);
  std::process::exit(err.exit_code().as_i32());
}
