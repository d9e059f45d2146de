//! Error types for bllvm-release with contextual messages and exit codes
//!
//! Every fatal pipeline failure names the offending component (and platform where one
//! applies) and carries the underlying tool's diagnostic output, so operators never
//! see a bare "build failed".

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Number of trailing diagnostic lines shown for build/test failures
const DIAGNOSTIC_TAIL: usize = 60;

/// Exit codes for bllvm-release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
  /// User error (config, invalid args, missing files)
  User = 1,
  /// System error (git, network, I/O)
  System = 2,
  /// Manifest validation failure (versions, cycles, dangling references)
  Validation = 3,
  /// Pipeline stage failure (build, test, publish, artifacts)
  Pipeline = 4,
}

impl ExitCode {
  /// Convert to i32 for process exit
  pub fn as_i32(self) -> i32 {
    self as i32
  }
}

/// Main error type for bllvm-release
#[derive(Debug)]
pub enum ReleaseError {
  /// Version string is not `MAJOR.MINOR.PATCH`
  MalformedVersion { component: Option<String>, value: String },

  /// The declared dependency relation contains a cycle
  CyclicDependency { components: Vec<String> },

  /// A component requires a name that is not declared
  DanglingDependency { component: String, missing: String },

  /// The registry or release index could not answer a query
  RegistryUnavailable { component: String, reason: String },

  /// Compilation failed
  BuildFailure {
    component: String,
    platform: String,
    log: String,
  },

  /// Test execution failed
  TestFailure { component: String, log: String },

  /// One or more components failed to publish
  PublishFailure { components: Vec<String> },

  /// Tagging a single repository failed (recovered by the finalizer)
  TagFailure { repo: String, reason: String },

  /// A binary expected for a platform was not produced
  MissingArtifact { component: String, platform: String },

  /// A Cargo.toml could not be rewritten to registry pins
  ManifestRewrite { path: PathBuf, reason: String },

  /// An external tool exceeded its time budget
  ToolTimeout { tool: String, seconds: u64 },

  /// Configuration errors
  Config(ConfigError),

  /// Git operation errors
  Git(GitError),

  /// I/O errors
  Io(io::Error),

  /// Generic error with message and optional context
  Message {
    message: String,
    context: Option<String>,
    help: Option<String>,
  },
}

impl ReleaseError {
  /// Create a simple error message
  pub fn message(msg: impl Into<String>) -> Self {
    ReleaseError::Message {
      message: msg.into(),
      context: None,
      help: None,
    }
  }

  /// Create an error with help text
  pub fn with_help(msg: impl Into<String>, help: impl Into<String>) -> Self {
    ReleaseError::Message {
      message: msg.into(),
      context: None,
      help: Some(help.into()),
    }
  }

  /// Add context to an existing error
  pub fn context(self, ctx: impl Into<String>) -> Self {
    let ctx_str = ctx.into();
    match self {
      ReleaseError::Message { message, context, help } => ReleaseError::Message {
        message,
        context: Some(context.map(|c| format!("{}\n{}", ctx_str, c)).unwrap_or(ctx_str)),
        help,
      },
      ReleaseError::Io(e) => ReleaseError::Message {
        message: ctx_str,
        context: Some(format!("I/O error: {}", e)),
        help: None,
      },
      _ => self,
    }
  }

  /// Get the appropriate exit code for this error
  pub fn exit_code(&self) -> ExitCode {
    match self {
      ReleaseError::MalformedVersion { .. }
      | ReleaseError::CyclicDependency { .. }
      | ReleaseError::DanglingDependency { .. }
      | ReleaseError::ManifestRewrite { .. } => ExitCode::Validation,
      ReleaseError::BuildFailure { .. }
      | ReleaseError::TestFailure { .. }
      | ReleaseError::PublishFailure { .. }
      | ReleaseError::MissingArtifact { .. }
      | ReleaseError::ToolTimeout { .. } => ExitCode::Pipeline,
      ReleaseError::RegistryUnavailable { .. } | ReleaseError::Git(_) | ReleaseError::Io(_) => ExitCode::System,
      ReleaseError::TagFailure { .. } => ExitCode::System,
      ReleaseError::Config(_) | ReleaseError::Message { .. } => ExitCode::User,
    }
  }

  /// Get contextual help message for this error
  pub fn help_message(&self) -> Option<String> {
    match self {
      ReleaseError::MalformedVersion { .. } => Some("Versions must be three numeric parts, e.g. 0.2.0".to_string()),
      ReleaseError::CyclicDependency { .. } => {
        Some("Remove one of the `requires` entries so the components form a DAG.".to_string())
      }
      ReleaseError::DanglingDependency { missing, .. } => Some(format!(
        "Declare '{}' under [versions] or drop it from `requires`.",
        missing
      )),
      ReleaseError::RegistryUnavailable { .. } => Some(
        "Check network access and credentials (CARGO_REGISTRY_TOKEN, GH_TOKEN), then re-run. \
         Nothing was assumed about existing releases."
          .to_string(),
      ),
      ReleaseError::PublishFailure { .. } => Some(
        "Already-published versions are immutable; fix the failing crate and re-run. \
         Published components are detected and skipped."
          .to_string(),
      ),
      ReleaseError::MissingArtifact { .. } => {
        Some("Check the component's `binaries` list against its Cargo targets.".to_string())
      }
      ReleaseError::ToolTimeout { .. } => Some("Raise the limit under [timeouts] in release.toml.".to_string()),
      ReleaseError::Config(e) => e.help_message(),
      ReleaseError::Git(e) => e.help_message(),
      ReleaseError::Message { help, .. } => help.clone(),
      _ => None,
    }
  }
}

/// Keep the last lines of a tool's output
pub fn diagnostic_tail(log: &str) -> String {
  let lines: Vec<&str> = log.lines().collect();
  let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL);
  lines[start..].join("\n")
}

impl fmt::Display for ReleaseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ReleaseError::MalformedVersion { component, value } => match component {
        Some(name) => write!(f, "Component '{}' has malformed version '{}' (must be X.Y.Z)", name, value),
        None => write!(f, "Malformed version '{}' (must be X.Y.Z)", value),
      },
      ReleaseError::CyclicDependency { components } => {
        write!(f, "Circular dependency detected: {}", components.join(" -> "))
      }
      ReleaseError::DanglingDependency { component, missing } => {
        write!(f, "Component '{}' requires '{}' which is not defined", component, missing)
      }
      ReleaseError::RegistryUnavailable { component, reason } => {
        write!(f, "Registry unavailable while checking '{}': {}", component, reason)
      }
      ReleaseError::BuildFailure {
        component,
        platform,
        log,
      } => write!(
        f,
        "Build failed for '{}' ({})\n{}",
        component,
        platform,
        diagnostic_tail(log)
      ),
      ReleaseError::TestFailure { component, log } => {
        write!(f, "Tests failed for '{}'\n{}", component, diagnostic_tail(log))
      }
      ReleaseError::PublishFailure { components } => {
        write!(f, "Publishing failed for: {}", components.join(", "))
      }
      ReleaseError::TagFailure { repo, reason } => write!(f, "Tagging '{}' failed: {}", repo, reason),
      ReleaseError::MissingArtifact { component, platform } => {
        write!(f, "Missing artifact for '{}' on {}", component, platform)
      }
      ReleaseError::ManifestRewrite { path, reason } => {
        write!(f, "Manifest rewrite failed for {}: {}", path.display(), reason)
      }
      ReleaseError::ToolTimeout { tool, seconds } => write!(f, "`{}` timed out after {}s", tool, seconds),
      ReleaseError::Config(e) => write!(f, "{}", e),
      ReleaseError::Git(e) => write!(f, "{}", e),
      ReleaseError::Io(e) => write!(f, "I/O error: {}", e),
      ReleaseError::Message { message, context, .. } => {
        write!(f, "{}", message)?;
        if let Some(ctx) = context {
          write!(f, "\n{}", ctx)?;
        }
        Ok(())
      }
    }
  }
}

impl std::error::Error for ReleaseError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      ReleaseError::Io(e) => Some(e),
      _ => None,
    }
  }
}

impl From<io::Error> for ReleaseError {
  fn from(err: io::Error) -> Self {
    ReleaseError::Io(err)
  }
}

impl From<String> for ReleaseError {
  fn from(msg: String) -> Self {
    ReleaseError::message(msg)
  }
}

impl From<&str> for ReleaseError {
  fn from(msg: &str) -> Self {
    ReleaseError::message(msg)
  }
}

impl From<toml_edit::TomlError> for ReleaseError {
  fn from(err: toml_edit::TomlError) -> Self {
    ReleaseError::message(format!("TOML parse error: {}", err))
  }
}

impl From<toml_edit::de::Error> for ReleaseError {
  fn from(err: toml_edit::de::Error) -> Self {
    ReleaseError::message(format!("TOML deserialization error: {}", err))
  }
}

impl From<cargo_metadata::Error> for ReleaseError {
  fn from(err: cargo_metadata::Error) -> Self {
    ReleaseError::message(format!("Cargo metadata error: {}", err))
  }
}

impl From<serde_json::Error> for ReleaseError {
  fn from(err: serde_json::Error) -> Self {
    ReleaseError::message(format!("JSON error: {}", err))
  }
}

impl From<zip::result::ZipError> for ReleaseError {
  fn from(err: zip::result::ZipError) -> Self {
    ReleaseError::message(format!("Zip archive error: {}", err))
  }
}

/// Configuration-related errors
#[derive(Debug)]
pub enum ConfigError {
  /// Versions manifest not found
  ManifestNotFound { path: PathBuf },

  /// Invalid value in release.toml
  InvalidValue { field: String, reason: String },

  /// Component not declared in the versions manifest
  ComponentNotFound { name: String },
}

impl ConfigError {
  fn help_message(&self) -> Option<String> {
    match self {
      ConfigError::ManifestNotFound { .. } => {
        Some("Pass --manifest or set `manifest` under [release] in release.toml.".to_string())
      }
      ConfigError::ComponentNotFound { .. } => {
        Some("List declared components with `bllvm-release order`.".to_string())
      }
      ConfigError::InvalidValue { .. } => None,
    }
  }
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigError::ManifestNotFound { path } => {
        write!(f, "Versions manifest not found: {}", path.display())
      }
      ConfigError::InvalidValue { field, reason } => {
        write!(f, "Invalid configuration value for `{}`: {}", field, reason)
      }
      ConfigError::ComponentNotFound { name } => {
        write!(f, "Component '{}' not found in the versions manifest", name)
      }
    }
  }
}

/// Git operation errors
#[derive(Debug)]
pub enum GitError {
  /// Git command failed
  CommandFailed { command: String, stderr: String },

  /// Repository not found
  RepoNotFound { path: PathBuf },

  /// Push failed
  PushFailed { remote: String, reference: String, reason: String },
}

impl GitError {
  fn help_message(&self) -> Option<String> {
    match self {
      GitError::PushFailed { reason, .. } => {
        if reason.contains("permission denied") || reason.contains("403") {
          Some("Check repository write access for the release credentials.".to_string())
        } else {
          None
        }
      }
      GitError::RepoNotFound { path } => Some(format!(
        "Clone the component first or check the workspace directory: {}",
        path.display()
      )),
      _ => None,
    }
  }
}

impl fmt::Display for GitError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GitError::CommandFailed { command, stderr } => {
        write!(f, "Git command failed: {}\n{}", command, stderr)
      }
      GitError::RepoNotFound { path } => {
        write!(f, "Git repository not found at: {}", path.display())
      }
      GitError::PushFailed {
        remote,
        reference,
        reason,
      } => {
        write!(f, "Push of {} to {} failed: {}", reference, remote, reason)
      }
    }
  }
}

/// Result type alias for bllvm-release
pub type ReleaseResult<T> = Result<T, ReleaseError>;

/// Helper trait to add context to Results
pub trait ResultExt<T> {
  /// Add context to an error result
  fn context(self, ctx: impl Into<String>) -> ReleaseResult<T>;

  /// Add context using a closure (lazy evaluation)
  fn with_context<F>(self, f: F) -> ReleaseResult<T>
  where
    F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
  E: Into<ReleaseError>,
{
  fn context(self, ctx: impl Into<String>) -> ReleaseResult<T> {
    self.map_err(|e| e.into().context(ctx))
  }

  fn with_context<F>(self, f: F) -> ReleaseResult<T>
  where
    F: FnOnce() -> String,
  {
    self.map_err(|e| e.into().context(f()))
  }
}

/// Pretty-print an error to stderr with help text
pub fn print_error(error: &ReleaseError) {
  eprintln!("\n❌ {}\n", error);

  if let Some(help) = error.help_message() {
    eprintln!("💡 Help: {}\n", help);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_build_failure_names_component_and_platform() {
    let err = ReleaseError::BuildFailure {
      component: "bllvm-node".to_string(),
      platform: "x86_64-unknown-linux-gnu".to_string(),
      log: "error[E0425]: cannot find value `x`".to_string(),
    };
    let text = err.to_string();
    assert!(text.contains("bllvm-node"));
    assert!(text.contains("x86_64-unknown-linux-gnu"));
    assert!(text.contains("E0425"));
    assert_eq!(err.exit_code(), ExitCode::Pipeline);
  }

  #[test]
  fn test_diagnostic_tail_keeps_last_lines() {
    let log: String = (0..100).map(|i| format!("line {}\n", i)).collect();
    let tail = diagnostic_tail(&log);
    assert!(tail.starts_with("line 40"));
    assert!(tail.ends_with("line 99"));
  }

  #[test]
  fn test_context_wraps_io_errors() {
    let read = Err::<(), io::Error>(io::Error::new(io::ErrorKind::NotFound, "gone"));
    let err = read.context("Failed to read versions.toml").unwrap_err();
    let text = err.to_string();
    assert!(text.contains("Failed to read versions.toml"));
    assert!(text.contains("gone"));
  }

  #[test]
  fn test_cycle_message_lists_path() {
    let err = ReleaseError::CyclicDependency {
      components: vec!["A".into(), "B".into(), "A".into()],
    };
    assert_eq!(err.to_string(), "Circular dependency detected: A -> B -> A");
    assert_eq!(err.exit_code(), ExitCode::Validation);
  }
}
