//! System git backend
//!
//! Drives the git CLI in an isolated environment with a bounded runtime per call.

use crate::core::error::{GitError, ReleaseError, ReleaseResult};
use crate::core::process::{self, ToolOutput};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Git backend for one component checkout
pub struct SystemGit {
  /// Repository working directory
  pub(crate) repo_path: PathBuf,

  /// Budget for each git invocation
  timeout: Duration,
}

impl SystemGit {
  /// Open an existing checkout
  pub fn open(path: &Path, timeout: Duration) -> ReleaseResult<Self> {
    if !path.join(".git").exists() {
      return Err(ReleaseError::Git(GitError::RepoNotFound {
        path: path.to_path_buf(),
      }));
    }
    Ok(Self {
      repo_path: path.to_path_buf(),
      timeout,
    })
  }

  /// Clone `url` at `reference` into `dest`, or refresh an existing clone
  pub fn clone_or_update(url: &str, dest: &Path, reference: &str, timeout: Duration) -> ReleaseResult<Self> {
    if dest.join(".git").exists() {
      let git = Self::open(dest, timeout)?;
      git.run_checked(&["fetch", "--tags", "--force", "origin", reference])?;
      git.run_checked(&["checkout", "--force", "--detach", "FETCH_HEAD"])?;
      log::info!("updated {} to {}", dest.display(), reference);
      return Ok(git);
    }

    if let Some(parent) = dest.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let mut cmd = isolated_command();
    cmd
      .args(["clone", "--quiet", "--branch", reference, url])
      .arg(dest);
    let output = process::run(cmd, "git", timeout)?;
    if !output.success() {
      return Err(ReleaseError::Git(GitError::CommandFailed {
        command: format!("git clone --branch {} {}", reference, url),
        stderr: output.stderr,
      }));
    }
    log::info!("cloned {} ({}) into {}", url, reference, dest.display());
    Self::open(dest, timeout)
  }

  /// Get HEAD commit SHA
  pub fn head_commit(&self) -> ReleaseResult<String> {
    let output = self.run_checked(&["rev-parse", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
  }

  /// Whether a tag exists locally
  pub fn tag_exists(&self, tag: &str) -> ReleaseResult<bool> {
    let refname = format!("refs/tags/{}", tag);
    let output = self.run(&["rev-parse", "--quiet", "--verify", &refname])?;
    Ok(output.success())
  }

  /// Whether `origin` already carries a tag
  pub fn remote_tag_exists(&self, tag: &str) -> ReleaseResult<bool> {
    let refname = format!("refs/tags/{}", tag);
    let output = self.run_checked(&["ls-remote", "--tags", "origin", &refname])?;
    Ok(!output.stdout.trim().is_empty())
  }

  pub fn has_remote(&self, name: &str) -> ReleaseResult<bool> {
    let output = self.run_checked(&["remote"])?;
    Ok(output.stdout.lines().any(|l| l.trim() == name))
  }

  /// Create an annotated tag at HEAD
  pub fn create_annotated_tag(&self, tag: &str, message: &str) -> ReleaseResult<()> {
    self.run_checked(&["tag", "-a", tag, "-m", message])?;
    Ok(())
  }

  /// Push a single tag to a remote
  pub fn push_tag(&self, remote: &str, tag: &str) -> ReleaseResult<()> {
    let refspec = format!("refs/tags/{}", tag);
    let output = self.run(&["push", remote, &refspec])?;
    if !output.success() {
      return Err(ReleaseError::Git(GitError::PushFailed {
        remote: remote.to_string(),
        reference: refspec,
        reason: output.stderr.trim().to_string(),
      }));
    }
    Ok(())
  }

  fn run(&self, args: &[&str]) -> ReleaseResult<ToolOutput> {
    let mut cmd = self.git_cmd();
    cmd.args(args);
    process::run(cmd, "git", self.timeout)
  }

  fn run_checked(&self, args: &[&str]) -> ReleaseResult<ToolOutput> {
    let output = self.run(args)?;
    if !output.success() {
      return Err(ReleaseError::Git(GitError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        stderr: output.stderr,
      }));
    }
    Ok(output)
  }

  /// Create a safe git command with isolated environment
  ///
  /// - Sets working directory to repo path
  /// - Clears environment variables
  /// - Whitelists PATH, HOME and the SSH agent socket
  pub(crate) fn git_cmd(&self) -> Command {
    let mut cmd = isolated_command();
    cmd.arg("-C").arg(&self.repo_path);
    cmd
  }
}

fn isolated_command() -> Command {
  let mut cmd = Command::new("git");

  // Isolated environment (don't trust global config)
  cmd.env_clear();
  for var in ["PATH", "HOME", "SSH_AUTH_SOCK"] {
    if let Ok(value) = std::env::var(var) {
      cmd.env(var, value);
    }
  }

  cmd.arg("-c").arg("advice.detachedHead=false");
  cmd.arg("-c").arg("core.quotePath=false");
  cmd.arg("-c").arg("tag.gpgSign=false");

  cmd
}

#[cfg(test)]
mod tests {
  use super::*;

  fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git").current_dir(dir).args(args).status().unwrap();
    assert!(status.success(), "git {:?} failed", args);
  }

  fn init_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "--quiet", "--initial-branch=main"]);
    git(dir.path(), &["config", "user.name", "Release Bot"]);
    git(dir.path(), &["config", "user.email", "release@example.com"]);
    std::fs::write(dir.path().join("README.md"), "component\n").unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "--quiet", "-m", "initial"]);
    dir
  }

  #[test]
  fn test_open_rejects_non_repo() {
    let dir = tempfile::tempdir().unwrap();
    let err = SystemGit::open(dir.path(), Duration::from_secs(30)).err().unwrap();
    assert!(matches!(err, ReleaseError::Git(GitError::RepoNotFound { .. })));
  }

  #[test]
  fn test_head_commit_is_full_sha() {
    let repo = init_repo();
    let git = SystemGit::open(repo.path(), Duration::from_secs(30)).unwrap();
    let sha = git.head_commit().unwrap();
    assert_eq!(sha.len(), 40);
    assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_tag_lifecycle() {
    let repo = init_repo();
    let git = SystemGit::open(repo.path(), Duration::from_secs(30)).unwrap();
    assert!(!git.tag_exists("v0.2.0").unwrap());
    assert!(!git.has_remote("origin").unwrap());
    git.create_annotated_tag("v0.2.0", "Release v0.2.0").unwrap();
    assert!(git.tag_exists("v0.2.0").unwrap());
  }

  #[test]
  fn test_clone_and_refresh() {
    let upstream = init_repo();
    let work = tempfile::tempdir().unwrap();
    let dest = work.path().join("component");
    let url = upstream.path().to_string_lossy().to_string();

    let git = SystemGit::clone_or_update(&url, &dest, "main", Duration::from_secs(60)).unwrap();
    let first = git.head_commit().unwrap();
    assert!(git.has_remote("origin").unwrap());

    std::fs::write(upstream.path().join("CHANGELOG.md"), "next\n").unwrap();
    self::git(upstream.path(), &["add", "."]);
    self::git(upstream.path(), &["commit", "--quiet", "-m", "next"]);

    let git = SystemGit::clone_or_update(&url, &dest, "main", Duration::from_secs(60)).unwrap();
    assert_ne!(git.head_commit().unwrap(), first);
  }
}
