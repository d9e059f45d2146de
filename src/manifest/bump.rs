//! End-of-run version bump of the versions manifest
//!
//! The manifest is read-only for the duration of a run and rewritten exactly once,
//! atomically, after a successful release.

use crate::core::error::{ReleaseError, ReleaseResult, ResultExt};
use crate::manifest::{Requirement, tag_for};
use crate::utils::write_atomic;
use semver::Version;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use toml_edit::{DocumentMut, Item, TableLike, Value};

/// Rewrite every component to `version`, recording head commits where known
pub fn apply_bump(path: &Path, version: &Version, commits: &BTreeMap<String, String>) -> ReleaseResult<()> {
  let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
  let updated = bump_document(&content, version, commits)?;
  write_atomic(path, updated.as_bytes()).with_context(|| format!("Failed to write {}", path.display()))?;
  log::info!("bumped {} to {}", path.display(), version);
  Ok(())
}

/// Pure rewrite of manifest text
pub fn bump_document(content: &str, version: &Version, commits: &BTreeMap<String, String>) -> ReleaseResult<String> {
  let mut doc: DocumentMut = content.parse()?;
  let versions = doc
    .get_mut("versions")
    .and_then(Item::as_table_like_mut)
    .ok_or_else(|| ReleaseError::message("Missing [versions] table"))?;

  let version_str = version.to_string();
  let tag = tag_for(version);

  for (name, item) in versions.iter_mut() {
    let entry = item
      .as_table_like_mut()
      .ok_or_else(|| ReleaseError::message(format!("Entry '{}' under [versions] must be a table", name.get())))?;

    set_string(entry, "version", &version_str);
    set_string(entry, "git_tag", &tag);
    if let Some(sha) = commits.get(name.get()) {
      set_string(entry, "git_commit", sha);
    }

    if let Some(requires) = entry.get_mut("requires").and_then(Item::as_array_mut) {
      for value in requires.iter_mut() {
        let Some(raw) = value.as_str() else { continue };
        let req = Requirement::parse(raw);
        if req.pin.is_some() {
          replace_preserving_decor(value, &format!("{}={}", req.name, version_str));
        }
      }
    }
  }

  Ok(doc.to_string())
}

fn set_string(entry: &mut dyn TableLike, key: &str, new: &str) {
  match entry.get_mut(key).and_then(Item::as_value_mut) {
    Some(value) => replace_preserving_decor(value, new),
    None => {
      entry.insert(key, toml_edit::value(new));
    }
  }
}

fn replace_preserving_decor(value: &mut Value, new: &str) {
  let decor = value.decor().clone();
  *value = Value::from(new);
  *value.decor_mut() = decor;
}
