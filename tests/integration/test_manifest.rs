//! Integration tests for `validate`, `version` and `bump`

use crate::helpers::{TestWorkspace, run_release, run_release_raw, stdout};
use anyhow::Result;

#[test]
fn test_validate_accepts_ecosystem() -> Result<()> {
  let ws = TestWorkspace::new()?;

  let output = run_release(&ws.path, &["validate"])?;
  assert!(stdout(&output).contains("Manifest is valid"));

  let output = run_release(&ws.path, &["validate", "--json"])?;
  let report: serde_json::Value = serde_json::from_str(&stdout(&output))?;
  assert_eq!(report["status"], "valid");

  Ok(())
}

#[test]
fn test_validate_reports_dangling_requirement() -> Result<()> {
  let ws = TestWorkspace::with_manifest(
    r#"[versions]
bllvm-protocol = { version = "0.1.0", git_tag = "v0.1.0", requires = ["bllvm-consensus"] }
"#,
  )?;

  let output = run_release_raw(&ws.path, &["validate"])?;
  assert_eq!(output.status.code(), Some(3));
  assert!(stdout(&output).contains("bllvm-consensus"));

  Ok(())
}

#[test]
fn test_validate_reports_cycle() -> Result<()> {
  let ws = TestWorkspace::with_manifest(
    r#"[versions]
a = { version = "0.1.0", git_tag = "v0.1.0", requires = ["b"] }
b = { version = "0.1.0", git_tag = "v0.1.0", requires = ["a"] }
"#,
  )?;

  let output = run_release_raw(&ws.path, &["validate", "--json"])?;
  assert_eq!(output.status.code(), Some(3));
  let report: serde_json::Value = serde_json::from_str(&stdout(&output))?;
  assert_eq!(report["status"], "invalid");

  // Everything that needs a dependency order refuses the manifest
  let output = run_release_raw(&ws.path, &["order"])?;
  assert!(!output.status.success());

  Ok(())
}

#[test]
fn test_validate_warns_on_drift() -> Result<()> {
  let ws = TestWorkspace::with_manifest(
    r#"[versions]
bllvm-consensus = { version = "0.2.0", git_tag = "v0.2.0" }
bllvm-protocol = { version = "0.2.0", git_tag = "v0.2.0", requires = ["bllvm-consensus=0.1.0"] }
"#,
  )?;

  let output = run_release(&ws.path, &["validate", "--json"])?;
  let report: serde_json::Value = serde_json::from_str(&stdout(&output))?;
  assert_eq!(report["status"], "valid_with_warnings");

  Ok(())
}

#[test]
fn test_version_current_and_next() -> Result<()> {
  let ws = TestWorkspace::new()?;

  let output = run_release(&ws.path, &["version"])?;
  assert_eq!(stdout(&output).trim(), "0.1.0");

  let output = run_release(&ws.path, &["version", "--next"])?;
  assert!(stdout(&output).contains("0.1.1"));

  let output = run_release(&ws.path, &["version", "--set", "v0.3.0", "--json"])?;
  let resolution: serde_json::Value = serde_json::from_str(&stdout(&output))?;
  assert_eq!(resolution["next"], "0.3.0");
  assert_eq!(resolution["overridden"], true);

  Ok(())
}

#[test]
fn test_version_rejects_malformed_override() -> Result<()> {
  let ws = TestWorkspace::new()?;

  let output = run_release_raw(&ws.path, &["version", "--set", "1.2"])?;
  assert_eq!(output.status.code(), Some(3));

  Ok(())
}

#[test]
fn test_bump_is_dry_run_by_default() -> Result<()> {
  let ws = TestWorkspace::new()?;
  let before = ws.read_file("versions.toml")?;

  let output = run_release(&ws.path, &["bump", "--version", "0.2.0"])?;
  assert!(stdout(&output).contains("Dry-run"));
  assert_eq!(ws.read_file("versions.toml")?, before);

  Ok(())
}

#[test]
fn test_bump_apply_preserves_formatting() -> Result<()> {
  let ws = TestWorkspace::new()?;

  run_release(&ws.path, &["bump", "--version", "0.2.0", "--apply"])?;
  let after = ws.read_file("versions.toml")?;

  assert!(after.starts_with("# bllvm component versions\n"));
  assert!(after.contains(r#"bllvm-consensus = { version = "0.2.0", git_tag = "v0.2.0" }"#));
  assert!(after.contains(r#"requires = ["bllvm-protocol=0.2.0"]"#));
  assert!(!after.contains("0.1.0"));

  // The bumped manifest is still valid
  run_release(&ws.path, &["validate"])?;

  Ok(())
}

#[test]
fn test_missing_manifest_is_a_user_error() -> Result<()> {
  let ws = TestWorkspace::new()?;
  std::fs::remove_file(ws.path.join("versions.toml"))?;

  let output = run_release_raw(&ws.path, &["order"])?;
  assert_eq!(output.status.code(), Some(1));

  Ok(())
}
