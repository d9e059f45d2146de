//! GitHub host: git for repositories, `gh` for release objects
//!
//! Release lookups distinguish "no such release/asset" (a normal answer) from any
//! other failure, which surfaces as `RegistryUnavailable` rather than a guess.
//! A release that already exists for a tag is only ever added to, never deleted.

use super::{SourceHost, SystemGit, TagOutcome};
use crate::core::error::{ReleaseError, ReleaseResult};
use crate::core::process::{self, ToolOutput};
use crate::release::registry::ReleaseIndex;
use crate::utils::file_name;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ReleaseView {
  #[serde(default)]
  assets: Vec<AssetView>,
}

#[derive(Debug, Deserialize)]
struct AssetView {
  name: String,
}

/// Production source host
pub struct GitHubHost {
  git_timeout: Duration,
  gh_timeout: Duration,
  gh_program: PathBuf,
  /// Script handed to `gh_program` ahead of the arguments
  gh_script: Option<PathBuf>,
}

impl GitHubHost {
  pub fn new(git_timeout: Duration, gh_timeout: Duration) -> Self {
    Self {
      git_timeout,
      gh_timeout,
      gh_program: PathBuf::from("gh"),
      gh_script: None,
    }
  }

  #[cfg(test)]
  fn with_gh_script(mut self, script: &Path) -> Self {
    self.gh_program = PathBuf::from("sh");
    self.gh_script = Some(script.to_path_buf());
    self
  }

  fn gh(&self, args: &[&str]) -> ReleaseResult<ToolOutput> {
    let mut cmd = Command::new(&self.gh_program);
    cmd.args(&self.gh_script).args(args);
    process::run(cmd, "gh", self.gh_timeout)
  }

  fn gh_checked(&self, args: &[&str], action: &str, repo: &str, tag: &str) -> ReleaseResult<ToolOutput> {
    let output = self.gh(args)?;
    if !output.success() {
      return Err(ReleaseError::message(format!(
        "Failed to {} release {} in {}:\n{}",
        action,
        tag,
        repo,
        output.combined()
      )));
    }
    Ok(output)
  }

  /// Upload (replacing same-named assets) and refresh title and notes
  fn update_release(
    &self,
    repo: &str,
    tag: &str,
    title: &str,
    notes_file: &str,
    assets: &[String],
  ) -> ReleaseResult<String> {
    log::info!("release {} already exists in {}, updating it", tag, repo);
    if !assets.is_empty() {
      let mut args = vec!["release", "upload", tag, "--repo", repo, "--clobber"];
      args.extend(assets.iter().map(String::as_str));
      self.gh_checked(&args, "upload assets to", repo, tag)?;
    }
    let output = self.gh_checked(
      &["release", "edit", tag, "--repo", repo, "--title", title, "--notes-file", notes_file],
      "update",
      repo,
      tag,
    )?;
    Ok(output.stdout.trim().to_string())
  }

  fn create_new_release(
    &self,
    repo: &str,
    tag: &str,
    title: &str,
    notes_file: &str,
    assets: &[String],
  ) -> ReleaseResult<String> {
    let mut args = vec!["release", "create", tag, "--repo", repo, "--title", title, "--notes-file", notes_file];
    args.extend(assets.iter().map(String::as_str));
    let output = self.gh(&args)?;
    if output.success() {
      return Ok(output.stdout.trim().to_string());
    }

    // The tag had no release before this call, so anything there now is a partial upload of ours
    match self.release_assets(repo, tag) {
      Ok(Some(_)) => {
        let cleanup = self.gh(&["release", "delete", tag, "--repo", repo, "--yes"]);
        if !matches!(cleanup, Ok(ref out) if out.success()) {
          log::warn!("could not remove partial release {} in {}", tag, repo);
        }
      }
      Ok(None) => {}
      Err(e) => log::warn!("could not check for a partial release {} in {}: {}", tag, repo, e),
    }
    Err(ReleaseError::message(format!(
      "Failed to create release {} in {}:\n{}",
      tag,
      repo,
      output.combined()
    )))
  }

  fn release_assets(&self, repo: &str, tag: &str) -> ReleaseResult<Option<Vec<String>>> {
    let output = self.gh(&["release", "view", tag, "--repo", repo, "--json", "assets"])?;
    if !output.success() {
      if is_not_found(&output.stderr) {
        return Ok(None);
      }
      return Err(ReleaseError::RegistryUnavailable {
        component: format!("{}@{}", repo, tag),
        reason: output.combined(),
      });
    }
    let view: ReleaseView = serde_json::from_str(&output.stdout)?;
    Ok(Some(view.assets.into_iter().map(|a| a.name).collect()))
  }
}

fn is_not_found(stderr: &str) -> bool {
  let lower = stderr.to_lowercase();
  lower.contains("release not found") || lower.contains("not found") && !lower.contains("repository")
}

impl SourceHost for GitHubHost {
  fn checkout(&self, url: &str, dest: &Path, reference: &str) -> ReleaseResult<()> {
    SystemGit::clone_or_update(url, dest, reference, self.git_timeout).map(|_| ())
  }

  fn head_commit(&self, repo_dir: &Path) -> ReleaseResult<String> {
    SystemGit::open(repo_dir, self.git_timeout)?.head_commit()
  }

  fn tag(&self, repo_dir: &Path, tag: &str, message: &str) -> ReleaseResult<TagOutcome> {
    let repo = file_name(repo_dir);
    let fail = |e: ReleaseError| ReleaseError::TagFailure {
      repo: repo.clone(),
      reason: e.to_string(),
    };

    let git = SystemGit::open(repo_dir, self.git_timeout).map_err(fail)?;
    let has_origin = git.has_remote("origin").map_err(fail)?;

    if has_origin && git.remote_tag_exists(tag).map_err(fail)? {
      return Ok(TagOutcome::AlreadyExists);
    }

    let existed = git.tag_exists(tag).map_err(fail)?;
    if !existed {
      git.create_annotated_tag(tag, message).map_err(fail)?;
    }
    if has_origin {
      git.push_tag("origin", tag).map_err(fail)?;
    }

    Ok(if existed {
      TagOutcome::AlreadyExists
    } else {
      TagOutcome::Created
    })
  }

  fn create_release(&self, repo: &str, tag: &str, notes: &str, assets: &[PathBuf]) -> ReleaseResult<String> {
    let existing = self.release_assets(repo, tag)?;

    let notes_path = std::env::temp_dir().join(format!("bllvm-release-notes-{}.md", std::process::id()));
    fs::write(&notes_path, notes)?;
    let notes_arg = notes_path.to_string_lossy().to_string();
    let title = format!("bllvm {}", tag);
    let asset_args: Vec<String> = assets.iter().map(|a| a.to_string_lossy().to_string()).collect();

    let result = match existing {
      Some(_) => self.update_release(repo, tag, &title, &notes_arg, &asset_args),
      None => self.create_new_release(repo, tag, &title, &notes_arg, &asset_args),
    };
    let _ = fs::remove_file(&notes_path);
    result
  }
}

impl ReleaseIndex for GitHubHost {
  fn has_asset(&self, repo: &str, tag: &str, asset: &str) -> ReleaseResult<bool> {
    Ok(
      self
        .release_assets(repo, tag)?
        .is_some_and(|assets| assets.iter().any(|a| a == asset)),
    )
  }

  fn download_asset(&self, repo: &str, tag: &str, asset: &str, dest_dir: &Path) -> ReleaseResult<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let dir = dest_dir.to_string_lossy().to_string();
    let output = self.gh(&[
      "release", "download", tag, "--repo", repo, "--pattern", asset, "--dir", &dir, "--clobber",
    ])?;
    if !output.success() {
      return Err(ReleaseError::RegistryUnavailable {
        component: asset.to_string(),
        reason: output.combined(),
      });
    }
    let path = dest_dir.join(asset);
    if !path.exists() {
      return Err(ReleaseError::message(format!(
        "`gh release download` succeeded but {} is missing",
        path.display()
      )));
    }
    Ok(path)
  }
}
