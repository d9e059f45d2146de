//! Artifact staging, checksums and archives
//!
//! Per (component, platform, variant) the binaries are copied into a flat
//! staging directory next to a freshly written `SHA256SUMS`, and the same
//! files are packed into a `.tar.gz` and a `.zip` at the archive root.
//! Archive metadata (mtime, owner, order) is fixed so an unchanged build
//! collects to identical bytes.

use crate::core::config::Variant;
use crate::core::error::{ReleaseError, ReleaseResult, ResultExt};
use crate::release::build::BuildTarget;
use crate::release::platform::archive_stem;
use crate::utils::{file_name, reset_dir, write_atomic};
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use semver::Version;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use zip::write::SimpleFileOptions;

/// Name of the checksum listing, in staging directories and the release root
pub const CHECKSUM_FILE: &str = "SHA256SUMS";

const BINARY_MODE: u32 = 0o755;
const DATA_MODE: u32 = 0o644;

/// A file produced by the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
  pub component: String,
  pub platform: String,
  pub variant: Variant,
  pub path: PathBuf,
  pub sha256: String,
}

/// Everything written for one build target
#[derive(Debug, Clone)]
pub struct Collected {
  pub staging_dir: PathBuf,
  pub checksum_file: PathBuf,
  pub binaries: Vec<Artifact>,
  pub archives: Vec<Artifact>,
}

/// Lowercase hex SHA-256 of a file, read in chunks
pub fn compute_sha256(path: &Path) -> ReleaseResult<String> {
  let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];
  loop {
    let read = file.read(&mut buffer)?;
    if read == 0 {
      break;
    }
    hasher.update(&buffer[..read]);
  }
  Ok(format!("{:x}", hasher.finalize()))
}

fn sha256_bytes(bytes: &[u8]) -> String {
  format!("{:x}", Sha256::digest(bytes))
}

/// `sha256sum`-style listing, sorted by file name
pub fn checksum_listing(files: &[PathBuf]) -> ReleaseResult<String> {
  let mut lines: Vec<(String, String)> = files
    .iter()
    .map(|f| Ok((file_name(f), compute_sha256(f)?)))
    .collect::<ReleaseResult<_>>()?;
  lines.sort();
  Ok(
    lines
      .into_iter()
      .map(|(name, hash)| format!("{}  {}\n", hash, name))
      .collect(),
  )
}

/// Write `SHA256SUMS` in `dir`, always from the current file contents
pub fn write_checksums(dir: &Path, files: &[PathBuf]) -> ReleaseResult<PathBuf> {
  let path = dir.join(CHECKSUM_FILE);
  let listing = checksum_listing(files)?;
  write_atomic(&path, listing.as_bytes()).with_context(|| format!("Failed to write {}", path.display()))?;
  Ok(path)
}

/// Parse a `SHA256SUMS` listing into name -> digest
pub fn parse_checksums(listing: &str) -> ReleaseResult<BTreeMap<String, String>> {
  listing
    .lines()
    .filter(|l| !l.trim().is_empty())
    .map(|line| {
      let (hash, name) = line
        .split_once("  ")
        .ok_or_else(|| ReleaseError::message(format!("Malformed checksum line: '{}'", line)))?;
      Ok((name.trim_start_matches('*').to_string(), hash.to_lowercase()))
    })
    .collect()
}

/// Stage, checksum and archive the binaries of one target
pub fn collect(
  component: &str,
  version: &Version,
  target: &BuildTarget,
  binaries: &[PathBuf],
  output_dir: &Path,
) -> ReleaseResult<Collected> {
  if binaries.is_empty() {
    return Err(ReleaseError::MissingArtifact {
      component: component.to_string(),
      platform: target.label(),
    });
  }

  let stem = archive_stem(component, &version.to_string(), &target.label());
  let staging_dir = output_dir.join(&stem);
  reset_dir(&staging_dir).with_context(|| format!("Failed to prepare {}", staging_dir.display()))?;

  let mut staged = Vec::new();
  for binary in binaries {
    if !binary.is_file() {
      return Err(ReleaseError::MissingArtifact {
        component: component.to_string(),
        platform: target.label(),
      });
    }
    let dest = staging_dir.join(file_name(binary));
    fs::copy(binary, &dest).with_context(|| format!("Failed to stage {}", binary.display()))?;
    staged.push(dest);
  }
  staged.sort();

  let checksum_file = write_checksums(&staging_dir, &staged)?;

  let mut entries: Vec<(String, PathBuf, u32)> = staged
    .iter()
    .map(|p| (file_name(p), p.clone(), BINARY_MODE))
    .collect();
  entries.push((CHECKSUM_FILE.to_string(), checksum_file.clone(), DATA_MODE));

  let tarball = output_dir.join(format!("{}.tar.gz", stem));
  write_tar_gz(&tarball, &entries)?;
  let zipball = output_dir.join(format!("{}.zip", stem));
  write_zip(&zipball, &entries)?;

  let artifact = |path: &Path| -> ReleaseResult<Artifact> {
    Ok(Artifact {
      component: component.to_string(),
      platform: target.label(),
      variant: target.variant,
      path: path.to_path_buf(),
      sha256: compute_sha256(path)?,
    })
  };

  log::info!("collected {} ({} binaries)", stem, staged.len());
  Ok(Collected {
    binaries: staged.iter().map(|p| artifact(p)).collect::<ReleaseResult<_>>()?,
    archives: vec![artifact(&tarball)?, artifact(&zipball)?],
    staging_dir,
    checksum_file,
  })
}

fn write_tar_gz(dest: &Path, entries: &[(String, PathBuf, u32)]) -> ReleaseResult<()> {
  let file = File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
  let encoder = GzBuilder::new().mtime(0).write(file, Compression::default());
  let mut builder = tar::Builder::new(encoder);

  for (name, path, mode) in entries {
    let data = fs::read(path)?;
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(*mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    builder.append_data(&mut header, name, data.as_slice())?;
  }

  builder.into_inner()?.finish()?;
  Ok(())
}

fn write_zip(dest: &Path, entries: &[(String, PathBuf, u32)]) -> ReleaseResult<()> {
  let file = File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
  let mut zip = zip::ZipWriter::new(file);

  for (name, path, mode) in entries {
    let options = SimpleFileOptions::default()
      .compression_method(zip::CompressionMethod::Deflated)
      .last_modified_time(zip::DateTime::default())
      .unix_permissions(*mode);
    zip.start_file(name.as_str(), options)?;
    zip.write_all(&fs::read(path)?)?;
  }

  zip.finish()?;
  Ok(())
}

fn validate_entry_name(archive: &Path, name: &str) -> ReleaseResult<()> {
  let path = Path::new(name);
  let flat = path.components().count() == 1 && matches!(path.components().next(), Some(Component::Normal(_)));
  if !flat {
    return Err(ReleaseError::message(format!(
      "{} contains entry '{}' outside the archive root",
      archive.display(),
      name
    )));
  }
  Ok(())
}

/// Read every entry of a `.tar.gz` or `.zip` into memory
///
/// Entries must sit at the archive root; nested or escaping paths are rejected.
pub fn read_archive(path: &Path) -> ReleaseResult<BTreeMap<String, Vec<u8>>> {
  let name = file_name(path);
  let mut files = BTreeMap::new();

  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    for entry in archive.entries()? {
      let mut entry = entry?;
      let entry_name = entry.path()?.to_string_lossy().into_owned();
      validate_entry_name(path, &entry_name)?;
      let mut data = Vec::new();
      entry.read_to_end(&mut data)?;
      files.insert(entry_name, data);
    }
  } else if name.ends_with(".zip") {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)?;
    for index in 0..archive.len() {
      let mut entry = archive.by_index(index)?;
      let entry_name = entry.name().to_string();
      validate_entry_name(path, &entry_name)?;
      let mut data = Vec::new();
      entry.read_to_end(&mut data)?;
      files.insert(entry_name, data);
    }
  } else {
    return Err(ReleaseError::with_help(
      format!("Unsupported archive format: {}", path.display()),
      "Expected a .tar.gz or .zip file",
    ));
  }

  Ok(files)
}

/// Result of checking an archive against its embedded checksum file
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveVerification {
  pub archive: PathBuf,
  pub files: Vec<String>,
}

/// Check that every binary in an archive matches the embedded `SHA256SUMS`
pub fn verify_archive(path: &Path) -> ReleaseResult<ArchiveVerification> {
  let files = read_archive(path)?;
  let listing = files.get(CHECKSUM_FILE).ok_or_else(|| {
    ReleaseError::message(format!("{} has no {} entry", path.display(), CHECKSUM_FILE))
  })?;
  let listing = std::str::from_utf8(listing)
    .map_err(|e| ReleaseError::message(format!("{}: {} is not UTF-8 ({})", path.display(), CHECKSUM_FILE, e)))?;
  let expected = parse_checksums(listing)?;

  let mut checked = Vec::new();
  for (name, data) in &files {
    if name == CHECKSUM_FILE {
      continue;
    }
    let Some(digest) = expected.get(name) else {
      return Err(ReleaseError::message(format!(
        "{}: '{}' is not listed in {}",
        path.display(),
        name,
        CHECKSUM_FILE
      )));
    };
    if *digest != sha256_bytes(data) {
      return Err(ReleaseError::message(format!(
        "{}: checksum mismatch for '{}'",
        path.display(),
        name
      )));
    }
    checked.push(name.clone());
  }

  if let Some(missing) = expected.keys().find(|n| !files.contains_key(*n)) {
    return Err(ReleaseError::message(format!(
      "{}: '{}' is listed in {} but missing",
      path.display(),
      missing,
      CHECKSUM_FILE
    )));
  }

  Ok(ArchiveVerification {
    archive: path.to_path_buf(),
    files: checked,
  })
}
