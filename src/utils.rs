//! Filesystem helpers shared by manifest rewrites and artifact collection

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Replace `path` with `contents` via a sibling temp file and rename
///
/// Readers observe either the old or the new file, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
  let tmp = temp_sibling(path);
  let result = (|| {
    let mut file = File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
  })();
  if result.is_err() {
    let _ = fs::remove_file(&tmp);
  }
  result
}

fn temp_sibling(path: &Path) -> PathBuf {
  let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
  path.with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
}

/// Empty a directory, creating it if needed
pub fn reset_dir(dir: &Path) -> io::Result<()> {
  if dir.exists() {
    fs::remove_dir_all(dir)?;
  }
  fs::create_dir_all(dir)
}

/// Resolve `path` against `base` unless it is already absolute
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
  if path.is_absolute() {
    path.to_path_buf()
  } else {
    base.join(path)
  }
}

/// File name of a path as an owned string
pub fn file_name(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.display().to_string())
}
