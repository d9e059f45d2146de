//! Integration tests for `order`

use crate::helpers::{TestWorkspace, run_release, run_release_raw, stdout};
use anyhow::Result;

#[test]
fn test_order_is_topological() -> Result<()> {
  // Declared out of dependency order on purpose
  let ws = TestWorkspace::with_manifest(
    r#"[versions]
bllvm-node = { version = "0.1.0", git_tag = "v0.1.0", requires = ["bllvm-protocol"], binaries = ["bllvm-node"] }
bllvm-protocol = { version = "0.1.0", git_tag = "v0.1.0", requires = ["bllvm-consensus"] }
bllvm-consensus = { version = "0.1.0", git_tag = "v0.1.0" }
"#,
  )?;

  let output = run_release(&ws.path, &["order", "--json"])?;
  let entries: Vec<serde_json::Value> = serde_json::from_str(&stdout(&output))?;
  let names: Vec<&str> = entries.iter().filter_map(|e| e["name"].as_str()).collect();
  assert_eq!(names, vec!["bllvm-consensus", "bllvm-protocol", "bllvm-node"]);
  assert_eq!(entries[2]["kind"], "binary");
  assert_eq!(entries[0]["position"], 1);

  Ok(())
}

#[test]
fn test_order_text_and_dot() -> Result<()> {
  let ws = TestWorkspace::new()?;

  let text = stdout(&run_release(&ws.path, &["order"])?);
  let consensus = text.find("bllvm-consensus (library)").unwrap();
  let node = text.find("bllvm-node (binary)").unwrap();
  assert!(consensus < node);

  let dot = stdout(&run_release(&ws.path, &["order", "--dot"])?);
  assert!(dot.contains("digraph"));
  assert!(dot.contains("bllvm-protocol"));

  Ok(())
}

#[test]
fn test_order_affected_by() -> Result<()> {
  let ws = TestWorkspace::new()?;

  let output = run_release(&ws.path, &["order", "--affected-by", "bllvm-protocol", "--json"])?;
  let entries: Vec<serde_json::Value> = serde_json::from_str(&stdout(&output))?;
  let names: Vec<&str> = entries.iter().filter_map(|e| e["name"].as_str()).collect();
  assert_eq!(names, vec!["bllvm-protocol", "bllvm-node"]);
  assert_eq!(entries[0]["requires"], serde_json::json!(["bllvm-consensus"]));
  assert_eq!(entries[0]["dependents"], serde_json::json!(["bllvm-node"]));

  let output = run_release_raw(&ws.path, &["order", "--affected-by", "bllvm-wallet"])?;
  assert!(!output.status.success());

  Ok(())
}

#[test]
fn test_config_rejects_unknown_anchor() -> Result<()> {
  let ws = TestWorkspace::new()?;
  ws.write_file("release.toml", "[release]\nanchor = \"bllvm-sdk\"\n")?;

  let output = run_release_raw(&ws.path, &["order"])?;
  assert_eq!(output.status.code(), Some(1));
  assert!(String::from_utf8_lossy(&output.stderr).contains("bllvm-sdk"));

  Ok(())
}

#[test]
fn test_explicit_manifest_path() -> Result<()> {
  let ws = TestWorkspace::new()?;
  let moved = ws.path.join("release").join("ecosystem.toml");
  std::fs::create_dir_all(moved.parent().unwrap())?;
  std::fs::rename(ws.path.join("versions.toml"), &moved)?;

  let output = run_release(&ws.path, &["--manifest", moved.to_str().unwrap(), "order"])?;
  assert!(stdout(&output).contains("bllvm-node"));

  Ok(())
}
