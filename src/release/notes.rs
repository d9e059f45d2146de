//! Release notes from a template
//!
//! Placeholders: `{{version}}`, `{{tag}}`, `{{commit}}`, `{{date}}`,
//! `{{components}}`, `{{artifacts}}`, `{{checksums}}`.

use crate::core::error::{ReleaseResult, ResultExt};
use crate::manifest::{ComponentKind, VersionsManifest};
use std::fs;
use std::path::Path;

pub const DEFAULT_TEMPLATE: &str = "# bllvm {{tag}}

Released {{date}} from commit `{{commit}}`.

## Components

{{components}}

## Artifacts

{{artifacts}}

## Checksums

```
{{checksums}}```
";

/// Values substituted into the template
#[derive(Debug, Clone)]
pub struct NotesContext {
  pub version: String,
  pub tag: String,
  pub commit: String,
  pub date: String,
  /// Markdown list, one line per component
  pub components: String,
  /// Markdown list, one line per archive
  pub artifacts: String,
  pub checksums: String,
}

impl NotesContext {
  /// Component list from the manifest; every component is released at `version`
  pub fn component_list(manifest: &VersionsManifest, version: &str, skipped: &[String]) -> String {
    manifest
      .components
      .iter()
      .map(|c| {
        let kind = match c.kind {
          ComponentKind::Library => "library",
          ComponentKind::Binary => "binary",
        };
        if skipped.contains(&c.name) {
          format!("- {} ({}, not released in this run)", c.name, kind)
        } else {
          format!("- {} {} ({})", c.name, version, kind)
        }
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  pub fn artifact_list(names: &[String]) -> String {
    if names.is_empty() {
      return "_No binary artifacts._".to_string();
    }
    names.iter().map(|n| format!("- `{}`", n)).collect::<Vec<_>>().join("\n")
  }
}

/// Template file, or the built-in default
pub fn load_template(path: Option<&Path>) -> ReleaseResult<String> {
  match path {
    Some(path) => fs::read_to_string(path).with_context(|| format!("Failed to read notes template {}", path.display())),
    None => Ok(DEFAULT_TEMPLATE.to_string()),
  }
}

pub fn render(template: &str, ctx: &NotesContext) -> String {
  let rendered = [
    ("{{version}}", ctx.version.as_str()),
    ("{{tag}}", ctx.tag.as_str()),
    ("{{commit}}", ctx.commit.as_str()),
    ("{{date}}", ctx.date.as_str()),
    ("{{components}}", ctx.components.as_str()),
    ("{{artifacts}}", ctx.artifacts.as_str()),
    ("{{checksums}}", ctx.checksums.as_str()),
  ]
  .iter()
  .fold(template.to_string(), |acc, (key, value)| acc.replace(key, value));

  if let Some(start) = rendered.find("{{")
    && let Some(len) = rendered[start..].find("}}")
  {
    log::warn!("unknown placeholder {} left in release notes", &rendered[start..start + len + 2]);
  }
  rendered
}
