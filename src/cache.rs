//! In-memory store for resources observed during a capture session.
//!
//! One [`ResourceCache`] instance is owned exclusively by one snapshot job.
//! Writes only occur from the single capture session driving that job, so the
//! store needs no internal locking.

use url::Url;

/// A network resource recorded from a completed browser response.
///
/// Identity is the normalized source URL (fragment stripped). The payload and
/// content-type are immutable once stored; `seq` is the discovery order used
/// for deterministic iteration.
#[derive(Debug, Clone)]
pub struct CapturedResource {
  pub url: String,
  pub bytes: Vec<u8>,
  pub content_type: Option<String>,
  pub seq: usize,
}

impl CapturedResource {
  /// Check if this resource appears to be CSS based on content-type
  pub fn is_css(&self) -> bool {
    self
      .content_type
      .as_ref()
      .map(|ct| ct.contains("text/css"))
      .unwrap_or(false)
  }

  /// Check if this resource appears to be an image based on content-type
  pub fn is_image(&self) -> bool {
    self
      .content_type
      .as_ref()
      .map(|ct| ct.starts_with("image/"))
      .unwrap_or(false)
  }
}

/// Normalize a captured URL to its cache identity.
///
/// Parses and re-serializes through the WHATWG URL parser so equivalent
/// spellings collapse (default ports dropped, host lowercased), and strips the
/// fragment, which never reaches the network. Returns `None` for unparseable
/// input and for schemes a capture never stores (`data:`, `blob:`,
/// `javascript:`, ...).
pub fn normalize_capture_url(raw: &str) -> Option<String> {
  let mut parsed = Url::parse(raw.trim()).ok()?;
  if !matches!(parsed.scheme(), "http" | "https") {
    return None;
  }
  parsed.set_fragment(None);
  Some(parsed.to_string())
}

/// Keyed store mapping normalized URLs to captured payloads.
///
/// Pure data structure: no network or filesystem access, no I/O policy.
#[derive(Debug, Default)]
pub struct ResourceCache {
  entries: Vec<CapturedResource>,
}

impl ResourceCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Idempotent upsert. Normalizes the URL first; a later capture of the same
  /// URL overwrites the payload but keeps the original discovery position.
  /// Returns the normalized URL when the resource was stored.
  pub fn put(
    &mut self,
    url: &str,
    bytes: Vec<u8>,
    content_type: Option<String>,
  ) -> Option<String> {
    let normalized = normalize_capture_url(url)?;
    if let Some(existing) = self.entries.iter_mut().find(|r| r.url == normalized) {
      existing.bytes = bytes;
      existing.content_type = content_type;
    } else {
      let seq = self.entries.len();
      self.entries.push(CapturedResource {
        url: normalized.clone(),
        bytes,
        content_type,
        seq,
      });
    }
    Some(normalized)
  }

  /// Look up a resource, normalizing the query URL first.
  pub fn get(&self, url: &str) -> Option<&CapturedResource> {
    let normalized = normalize_capture_url(url)?;
    self.entries.iter().find(|r| r.url == normalized)
  }

  /// All captured resources in discovery order.
  pub fn all(&self) -> impl Iterator<Item = &CapturedResource> {
    self.entries.iter()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
