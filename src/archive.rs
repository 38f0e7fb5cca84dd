//! Deterministic snapshot packaging.
//!
//! A [`SnapshotTree`] is the staged local file tree produced by the rewrite
//! phase. Packing walks it in lexicographic path order with fully
//! deterministic tar headers, so repeated packaging of an unchanged tree is
//! byte-reproducible. A `snapshot.json` manifest describing every materialized
//! asset is appended as the final entry.

use crate::error::{PackagingError, Result};
use crate::rewrite::AssetRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Component, Path};

/// File name of the manifest inside every snapshot archive.
pub const SNAPSHOT_MANIFEST: &str = "snapshot.json";

/// Schema version for snapshot manifests.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Staged file tree: snapshot-relative path to file bytes.
///
/// Backed by a `BTreeMap` so iteration — and therefore archive entry order —
/// is lexicographic by construction.
#[derive(Debug, Default)]
pub struct SnapshotTree {
  files: BTreeMap<String, Vec<u8>>,
}

impl SnapshotTree {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, path: &str, bytes: Vec<u8>) {
    self.files.insert(path.to_string(), bytes);
  }

  pub fn get(&self, path: &str) -> Option<&[u8]> {
    self.files.get(path).map(|b| b.as_slice())
  }

  pub fn contains(&self, path: &str) -> bool {
    self.files.contains_key(path)
  }

  /// Entries in lexicographic path order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
    self.files.iter().map(|(p, b)| (p.as_str(), b.as_slice()))
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

/// Manifest describing one packed snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
  pub version: u32,
  pub original_url: String,
  pub document: String,
  /// Source URL → local asset metadata, BTreeMap-ordered for determinism.
  pub assets: BTreeMap<String, ManifestAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestAsset {
  pub path: String,
  pub content_type: Option<String>,
}

impl SnapshotManifest {
  pub fn build(original_url: &str, assets: &[AssetRecord]) -> Self {
    let mut map = BTreeMap::new();
    for record in assets {
      map.insert(
        record.source_url.clone(),
        ManifestAsset {
          path: record.local_path.clone(),
          content_type: record.content_type.clone(),
        },
      );
    }
    Self {
      version: SNAPSHOT_VERSION,
      original_url: original_url.to_string(),
      document: "index.html".to_string(),
      assets: map,
    }
  }
}

/// Pack the staged tree into a tar archive written to `out`.
///
/// Entry order is lexicographic by path; headers are fully deterministic
/// (mode 0644, zeroed mtime/uid/gid). Fails with [`PackagingError`] on any
/// malformed staged path and never leaves a partial archive behind.
pub fn pack<W: Write>(tree: &SnapshotTree, manifest: &SnapshotManifest, out: W) -> Result<()> {
  let mut builder = tar::Builder::new(out);
  builder.mode(tar::HeaderMode::Deterministic);

  for (path, bytes) in tree.iter() {
    validate_entry_path(path)?;
    append_tar_entry(&mut builder, path, bytes)?;
  }

  let manifest_bytes = serde_json::to_vec_pretty(manifest).map_err(|e| {
    PackagingError::UnreadableEntry {
      path: SNAPSHOT_MANIFEST.to_string(),
      reason: e.to_string(),
    }
  })?;
  append_tar_entry(&mut builder, SNAPSHOT_MANIFEST, &manifest_bytes)?;

  builder.finish().map_err(PackagingError::Write)?;
  Ok(())
}

/// Pack into a file at `path`, creating parent directories as needed.
///
/// The archive is written to a temporary sibling first and renamed into place,
/// so a packaging failure never leaves a partial archive at the target path.
pub fn pack_to_path(
  tree: &SnapshotTree,
  manifest: &SnapshotManifest,
  path: &Path,
) -> Result<()> {
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      fs::create_dir_all(parent).map_err(PackagingError::Write)?;
    }
  }

  let staging = path.with_extension("tar.partial");
  let file = fs::File::create(&staging).map_err(PackagingError::Write)?;
  match pack(tree, manifest, file) {
    Ok(()) => {
      fs::rename(&staging, path).map_err(PackagingError::Write)?;
      Ok(())
    }
    Err(err) => {
      let _ = fs::remove_file(&staging);
      Err(err)
    }
  }
}

fn validate_entry_path(path: &str) -> std::result::Result<(), PackagingError> {
  let candidate = Path::new(path);
  if candidate.as_os_str().is_empty()
    || candidate.is_absolute()
    || candidate
      .components()
      .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
  {
    return Err(PackagingError::NonRelativePath {
      path: path.to_string(),
    });
  }
  Ok(())
}

fn append_tar_entry<W: Write>(
  builder: &mut tar::Builder<W>,
  path: &str,
  bytes: &[u8],
) -> std::result::Result<(), PackagingError> {
  let mut header = tar::Header::new_gnu();
  header.set_size(bytes.len() as u64);
  header.set_mode(0o644);
  header.set_mtime(0);
  header.set_uid(0);
  header.set_gid(0);
  header.set_path(path).map_err(PackagingError::Write)?;
  header.set_cksum();
  builder.append(&header, bytes).map_err(PackagingError::Write)
}
