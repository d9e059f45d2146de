//! Cargo.toml rewriting from local references to exact registry pins
//!
//! Before a component is published (or built against the registry), every
//! dependency on an ecosystem library is rewritten from `path`/`git` to
//! `version = "=X.Y.Z"`, then re-read and verified. Features, `optional`,
//! `default-features` and `package` renames are kept; formatting is preserved.

use crate::core::error::{ReleaseError, ReleaseResult, ResultExt};
use crate::utils::write_atomic;
use semver::Version;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::{DocumentMut, Item, TableLike, Value};

const DEP_TABLES: [&str; 3] = ["dependencies", "build-dependencies", "dev-dependencies"];
const LOCAL_KEYS: [&str; 5] = ["path", "git", "branch", "tag", "rev"];

/// One rewritten dependency entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinChange {
  pub manifest: PathBuf,
  pub table: String,
  pub dependency: String,
  pub pinned: String,
}

/// Cargo manifests of a component checkout: the root plus any workspace members
pub fn component_manifests(source_dir: &Path) -> ReleaseResult<Vec<PathBuf>> {
  let root = source_dir.join("Cargo.toml");
  let content = fs::read_to_string(&root).with_context(|| format!("Failed to read {}", root.display()))?;
  let doc: DocumentMut = content.parse()?;

  let mut manifests = vec![root];
  let members = doc
    .get("workspace")
    .and_then(|w| w.get("members"))
    .and_then(Item::as_array)
    .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect::<Vec<_>>())
    .unwrap_or_default();

  for member in members {
    if let Some(prefix) = member.strip_suffix("/*") {
      let dir = source_dir.join(prefix);
      if !dir.is_dir() {
        continue;
      }
      let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|e| e.ok().map(|e| e.path().join("Cargo.toml")))
        .filter(|p| p.exists())
        .collect();
      entries.sort();
      manifests.extend(entries);
    } else {
      let path = source_dir.join(&member).join("Cargo.toml");
      if path.exists() && !manifests.contains(&path) {
        manifests.push(path);
      }
    }
  }

  Ok(manifests)
}

/// Manifest declaring package `name`, falling back to the root manifest
pub fn package_manifest(source_dir: &Path, name: &str) -> ReleaseResult<PathBuf> {
  for path in component_manifests(source_dir)? {
    let doc: DocumentMut = fs::read_to_string(&path)?.parse()?;
    let package_name = doc.get("package").and_then(|p| p.get("name")).and_then(Item::as_str);
    if package_name == Some(name) {
      return Ok(path);
    }
  }
  Ok(source_dir.join("Cargo.toml"))
}

/// Rewrite all manifests of a component and verify the result
///
/// `package_version`, when given, also sets `package.version` (or
/// `workspace.package.version`) so the published crate carries the release version.
pub fn pin_component(
  source_dir: &Path,
  package_version: Option<&Version>,
  pins: &BTreeMap<String, Version>,
) -> ReleaseResult<Vec<PinChange>> {
  let mut changes = Vec::new();
  for path in component_manifests(source_dir)? {
    let content = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let (updated, mut local) = pin_document(&content, package_version, pins).map_err(|e| rewrite_error(&path, e))?;
    if updated != content {
      write_atomic(&path, updated.as_bytes()).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    for change in &mut local {
      change.manifest = path.clone();
    }
    changes.extend(local);
    verify_pins(&path, pins)?;
  }
  log::debug!("pinned {} dependency entries under {}", changes.len(), source_dir.display());
  Ok(changes)
}

fn rewrite_error(path: &Path, err: ReleaseError) -> ReleaseError {
  ReleaseError::ManifestRewrite {
    path: path.to_path_buf(),
    reason: err.to_string(),
  }
}

/// Pure rewrite of one manifest's text
pub fn pin_document(
  content: &str,
  package_version: Option<&Version>,
  pins: &BTreeMap<String, Version>,
) -> ReleaseResult<(String, Vec<PinChange>)> {
  let mut doc: DocumentMut = content.parse()?;
  let mut changes = Vec::new();

  if let Some(version) = package_version {
    set_package_version(&mut doc, version);
  }

  for (table_name, table) in dependency_tables_mut(&mut doc) {
    for (key, item) in table.iter_mut() {
      let dep_key = key.get().to_string();
      let package = package_name(&dep_key, item);
      let Some(version) = pins.get(&package) else { continue };
      if is_workspace_inherited(item) {
        continue;
      }

      let pinned = format!("={}", version);
      if let Some(value) = item.as_value_mut()
        && value.is_str()
      {
        replace_preserving_decor(value, &pinned);
      } else if let Some(entry) = item.as_table_like_mut() {
        for local in LOCAL_KEYS {
          entry.remove(local);
        }
        match entry.get_mut("version").and_then(Item::as_value_mut) {
          Some(value) => replace_preserving_decor(value, &pinned),
          None => {
            entry.insert("version", toml_edit::value(pinned.as_str()));
          }
        }
      } else {
        return Err(ReleaseError::message(format!(
          "Unsupported dependency entry for '{}' in [{}]",
          dep_key, table_name
        )));
      }

      changes.push(PinChange {
        manifest: PathBuf::new(),
        table: table_name.clone(),
        dependency: dep_key,
        pinned,
      });
    }
  }

  Ok((doc.to_string(), changes))
}

/// Re-read a manifest and check every pinned dependency is exact and non-local
pub fn verify_pins(path: &Path, pins: &BTreeMap<String, Version>) -> ReleaseResult<()> {
  let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
  let doc: DocumentMut = content.parse().map_err(|e: toml_edit::TomlError| rewrite_error(path, e.into()))?;

  for (table_name, table) in dependency_tables(&doc) {
    for (key, item) in table.iter() {
      let package = package_name(key, item);
      let Some(version) = pins.get(&package) else { continue };
      if is_workspace_inherited(item) {
        continue;
      }

      let expected = format!("={}", version);
      let declared = match item.as_str() {
        Some(v) => Some(v.to_string()),
        None => item
          .as_table_like()
          .and_then(|t| t.get("version"))
          .and_then(Item::as_str)
          .map(String::from),
      };
      if declared.as_deref() != Some(expected.as_str()) {
        return Err(ReleaseError::ManifestRewrite {
          path: path.to_path_buf(),
          reason: format!(
            "'{}' in [{}] is {:?}, expected \"{}\"",
            key, table_name, declared, expected
          ),
        });
      }
      if let Some(local) = local_key(item) {
        return Err(ReleaseError::ManifestRewrite {
          path: path.to_path_buf(),
          reason: format!("'{}' in [{}] still has `{}`", key, table_name, local),
        });
      }
    }
  }
  Ok(())
}

/// Dependencies on `names` that still resolve locally (path or git)
pub fn local_references(source_dir: &Path, names: &BTreeSet<String>) -> ReleaseResult<Vec<String>> {
  let mut found = Vec::new();
  for path in component_manifests(source_dir)? {
    let doc: DocumentMut = fs::read_to_string(&path)?.parse()?;
    for (table_name, table) in dependency_tables(&doc) {
      for (key, item) in table.iter() {
        if names.contains(&package_name(key, item))
          && let Some(local) = local_key(item)
        {
          found.push(format!("{}: [{}] {} ({})", path.display(), table_name, key, local));
        }
      }
    }
  }
  Ok(found)
}

fn package_name(key: &str, item: &Item) -> String {
  item
    .as_table_like()
    .and_then(|t| t.get("package"))
    .and_then(Item::as_str)
    .unwrap_or(key)
    .to_string()
}

fn is_workspace_inherited(item: &Item) -> bool {
  item
    .as_table_like()
    .and_then(|t| t.get("workspace"))
    .and_then(Item::as_bool)
    .unwrap_or(false)
}

fn local_key(item: &Item) -> Option<&'static str> {
  let table = item.as_table_like()?;
  LOCAL_KEYS.into_iter().find(|k| table.contains_key(k))
}

fn set_package_version(doc: &mut DocumentMut, version: &Version) {
  let version = version.to_string();
  for section in ["package", "workspace"] {
    let Some(table) = doc.get_mut(section).and_then(Item::as_table_like_mut) else { continue };
    let target = if section == "workspace" {
      match table.get_mut("package").and_then(Item::as_table_like_mut) {
        Some(pkg) => pkg,
        None => continue,
      }
    } else {
      table
    };
    if let Some(value) = target.get_mut("version").and_then(Item::as_value_mut)
      && value.is_str()
    {
      replace_preserving_decor(value, &version);
    }
  }
}

fn replace_preserving_decor(value: &mut Value, new: &str) {
  let decor = value.decor().clone();
  *value = Value::from(new);
  *value.decor_mut() = decor;
}

fn dependency_tables(doc: &DocumentMut) -> Vec<(String, &dyn TableLike)> {
  let mut out = Vec::new();
  for (key, item) in doc.as_table().iter() {
    if DEP_TABLES.contains(&key) {
      if let Some(t) = item.as_table_like() {
        out.push((key.to_string(), t));
      }
    } else if key == "target" {
      let Some(targets) = item.as_table_like() else { continue };
      for (cfg, cfg_item) in targets.iter() {
        let Some(cfg_table) = cfg_item.as_table_like() else { continue };
        for (kind, deps) in cfg_table.iter() {
          if DEP_TABLES.contains(&kind)
            && let Some(t) = deps.as_table_like()
          {
            out.push((format!("target.{}.{}", cfg, kind), t));
          }
        }
      }
    } else if key == "workspace"
      && let Some(deps) = item.get("dependencies").and_then(Item::as_table_like)
    {
      out.push(("workspace.dependencies".to_string(), deps));
    }
  }
  out
}

fn dependency_tables_mut(doc: &mut DocumentMut) -> Vec<(String, &mut dyn TableLike)> {
  let mut out = Vec::new();
  for (key, item) in doc.as_table_mut().iter_mut() {
    let key = key.get().to_string();
    if DEP_TABLES.contains(&key.as_str()) {
      if let Some(t) = item.as_table_like_mut() {
        out.push((key, t));
      }
    } else if key == "target" {
      let Some(targets) = item.as_table_like_mut() else { continue };
      for (cfg, cfg_item) in targets.iter_mut() {
        let cfg = cfg.get().to_string();
        let Some(cfg_table) = cfg_item.as_table_like_mut() else { continue };
        for (kind, deps) in cfg_table.iter_mut() {
          let kind = kind.get().to_string();
          if DEP_TABLES.contains(&kind.as_str())
            && let Some(t) = deps.as_table_like_mut()
          {
            out.push((format!("target.{}.{}", cfg, kind), t));
          }
        }
      }
    } else if key == "workspace"
      && let Some(deps) = item.get_mut("dependencies").and_then(Item::as_table_like_mut)
    {
      out.push(("workspace.dependencies".to_string(), deps));
    }
  }
  out
}
