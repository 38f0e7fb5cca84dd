//! Deterministic mapping from captured URLs to local snapshot paths.

use crate::cache::normalize_capture_url;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use url::Url;

/// Coarse asset bucket used as the directory component of a local path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetClass {
  Image,
  Style,
  Script,
  Font,
  Media,
  Other,
}

impl AssetClass {
  /// Directory name under `assets/`.
  pub fn dir(self) -> &'static str {
    match self {
      AssetClass::Image => "img",
      AssetClass::Style => "style",
      AssetClass::Script => "script",
      AssetClass::Font => "font",
      AssetClass::Media => "media",
      AssetClass::Other => "other",
    }
  }

  /// Infer the class from a content-type, falling back to the URL extension.
  pub fn infer(content_type: Option<&str>, url: &str) -> Self {
    if let Some(ct_raw) = content_type {
      let ct = ct_raw.to_ascii_lowercase();
      if ct.starts_with("image/") {
        return AssetClass::Image;
      }
      if ct.contains("text/css") {
        return AssetClass::Style;
      }
      if ct.contains("javascript") || ct.contains("ecmascript") {
        return AssetClass::Script;
      }
      if ct.starts_with("font/") || ct.contains("application/font") {
        return AssetClass::Font;
      }
      if ct.starts_with("video/") || ct.starts_with("audio/") {
        return AssetClass::Media;
      }
    }

    match url_extension(url).as_deref() {
      Some("png" | "jpg" | "jpeg" | "gif" | "webp" | "avif" | "svg" | "ico" | "bmp") => {
        AssetClass::Image
      }
      Some("css") => AssetClass::Style,
      Some("js" | "mjs") => AssetClass::Script,
      Some("woff" | "woff2" | "ttf" | "otf" | "eot") => AssetClass::Font,
      Some("mp4" | "webm" | "ogg" | "mp3" | "wav" | "m4a") => AssetClass::Media,
      _ => AssetClass::Other,
    }
  }
}

/// A resolver-assigned local asset path backed by a captured resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
  /// Snapshot-relative path, e.g. `assets/img/3f2a1b9c0d4e.png`.
  pub path: String,
  pub class: AssetClass,
}

/// Maps `(url, content_type)` to a unique local relative path.
///
/// The hash component is the first 12 hex chars of SHA-256 over the
/// normalized URL, so repeated runs against an unchanged capture produce
/// identical paths. Resolutions are memoized per job; the memo also guards
/// against two distinct URLs landing on one path.
#[derive(Debug, Default)]
pub struct AssetResolver {
  by_url: HashMap<String, LocalAsset>,
  claimed_paths: HashMap<String, String>,
}

impl AssetResolver {
  pub fn new() -> Self {
    Self::default()
  }

  /// Resolve a captured URL to its local asset path.
  ///
  /// Returns `None` for URLs that cannot be normalized (non-http schemes and
  /// malformed input never become local assets).
  pub fn resolve(&mut self, url: &str, content_type: Option<&str>) -> Option<LocalAsset> {
    let normalized = normalize_capture_url(url)?;
    if let Some(existing) = self.by_url.get(&normalized) {
      return Some(existing.clone());
    }

    let class = AssetClass::infer(content_type, &normalized);
    let ext = extension_for(content_type, &normalized);
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hash: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();

    // Truncated digests cannot collide in practice, but a snapshot must never
    // silently merge two resources; widen the hash until the path is free.
    let mut path = format!("assets/{}/{}.{}", class.dir(), hash, ext);
    let mut take = 6;
    while let Some(owner) = self.claimed_paths.get(&path) {
      if owner == &normalized {
        break;
      }
      take += 1;
      hash = digest
        .iter()
        .take(take.min(digest.len()))
        .map(|b| format!("{b:02x}"))
        .collect();
      path = format!("assets/{}/{}.{}", class.dir(), hash, ext);
    }

    let asset = LocalAsset { path: path.clone(), class };
    self.claimed_paths.insert(path, normalized.clone());
    self.by_url.insert(normalized, asset.clone());
    Some(asset)
  }
}

/// File extension for a local asset: content-type first, then the URL path
/// extension when it is short enough to be plausible, then `bin`.
fn extension_for(content_type: Option<&str>, url: &str) -> String {
  if let Some(ct_raw) = content_type {
    let ct = ct_raw.to_ascii_lowercase();
    if ct.starts_with("text/html") {
      return "html".to_string();
    }
    if ct.contains("text/css") {
      return "css".to_string();
    }
    if ct.contains("javascript") || ct.contains("ecmascript") {
      return "js".to_string();
    }
    if ct.contains("image/png") {
      return "png".to_string();
    }
    if ct.contains("image/jpeg") {
      return "jpg".to_string();
    }
    if ct.contains("image/gif") {
      return "gif".to_string();
    }
    if ct.contains("image/webp") {
      return "webp".to_string();
    }
    if ct.contains("image/avif") {
      return "avif".to_string();
    }
    if ct.contains("svg") {
      return "svg".to_string();
    }
    if ct.contains("font/woff2") {
      return "woff2".to_string();
    }
    if ct.contains("font/woff") {
      return "woff".to_string();
    }
    if ct.contains("font/ttf") || ct.contains("font/otf") {
      return "ttf".to_string();
    }
    if ct.contains("application/json") {
      return "json".to_string();
    }
  }

  if let Some(ext) = url_extension(url) {
    if ext.len() <= 8 {
      return ext;
    }
  }

  "bin".to_string()
}

fn url_extension(url: &str) -> Option<String> {
  let parsed = Url::parse(url).ok()?;
  Path::new(parsed.path())
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase())
}
