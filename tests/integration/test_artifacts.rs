//! Integration tests for `collect` and `verify`

use crate::helpers::{TestWorkspace, run_release, run_release_raw, stdout};
use anyhow::Result;

const ARCHIVE_STEM: &str = "bllvm-node-0.2.0-linux-x86_64";

fn collect(ws: &TestWorkspace) -> Result<std::process::Output> {
  ws.write_file("build/bllvm-node", "#!/bin/sh\necho node\n")?;
  run_release(
    &ws.path,
    &[
      "collect",
      "--input",
      "build",
      "--component",
      "bllvm-node",
      "--version",
      "0.2.0",
      "--platform",
      "x86_64-unknown-linux-gnu",
      "--output-dir",
      "out",
      "--json",
    ],
  )
}

#[test]
fn test_collect_writes_both_archives() -> Result<()> {
  let ws = TestWorkspace::new()?;

  let output = collect(&ws)?;
  let artifacts: Vec<serde_json::Value> = serde_json::from_str(&stdout(&output))?;
  assert_eq!(artifacts.len(), 3);
  assert!(artifacts.iter().all(|a| a["sha256"].as_str().map(str::len) == Some(64)));
  assert!(artifacts.iter().all(|a| a["platform"] == "linux-x86_64"));

  assert!(ws.file_exists(&format!("out/{}.tar.gz", ARCHIVE_STEM)));
  assert!(ws.file_exists(&format!("out/{}.zip", ARCHIVE_STEM)));
  let sums = ws.read_file(&format!("out/{}/SHA256SUMS", ARCHIVE_STEM))?;
  assert!(sums.ends_with("  bllvm-node\n"));

  Ok(())
}

#[test]
fn test_collect_is_reproducible() -> Result<()> {
  let ws = TestWorkspace::new()?;

  collect(&ws)?;
  let first = std::fs::read(ws.path.join(format!("out/{}.tar.gz", ARCHIVE_STEM)))?;
  collect(&ws)?;
  let second = std::fs::read(ws.path.join(format!("out/{}.tar.gz", ARCHIVE_STEM)))?;
  assert_eq!(first, second);

  Ok(())
}

#[test]
fn test_verify_collected_archives() -> Result<()> {
  let ws = TestWorkspace::new()?;
  collect(&ws)?;

  let tarball = format!("out/{}.tar.gz", ARCHIVE_STEM);
  let zipball = format!("out/{}.zip", ARCHIVE_STEM);
  let output = run_release(&ws.path, &["verify", &tarball, &zipball, "--json"])?;
  let results: Vec<serde_json::Value> = serde_json::from_str(&stdout(&output))?;
  assert_eq!(results.len(), 2);
  assert_eq!(results[0]["files"], serde_json::json!(["bllvm-node"]));

  Ok(())
}

#[test]
fn test_verify_rejects_corrupt_archive() -> Result<()> {
  let ws = TestWorkspace::new()?;
  ws.write_file("bogus.tar.gz", "not a gzip stream")?;

  let output = run_release_raw(&ws.path, &["verify", "bogus.tar.gz"])?;
  assert!(!output.status.success());
  assert!(stdout(&output).contains("bogus.tar.gz"));

  Ok(())
}

#[test]
fn test_collect_requires_declared_binaries() -> Result<()> {
  let ws = TestWorkspace::new()?;
  std::fs::create_dir_all(ws.path.join("build"))?;

  let output = run_release_raw(
    &ws.path,
    &[
      "collect",
      "--input",
      "build",
      "--component",
      "bllvm-node",
      "--version",
      "0.2.0",
      "--platform",
      "x86_64-unknown-linux-gnu",
      "--output-dir",
      "out",
    ],
  )?;
  // MissingArtifact is a pipeline failure
  assert_eq!(output.status.code(), Some(4));

  Ok(())
}
