//! The unit of work: one target URL, one workspace, one lifecycle.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Lifecycle of a snapshot job. Transitions are driven exclusively by the
/// pipeline; `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
  Queued,
  Capturing,
  Rewriting,
  Packaging,
  Done,
  Failed,
}

/// Stable job identifier, derived deterministically from the target URL:
/// a filename-safe site name plus a short hash so distinct pages of one host
/// never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for JobId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// One snapshot job. The pipeline mutates only `state`; workspace lifetime
/// (provisioning, cleanup) belongs to the embedding orchestration layer.
#[derive(Debug)]
pub struct SnapshotJob {
  id: JobId,
  target: Url,
  workspace: PathBuf,
  state: JobState,
}

impl SnapshotJob {
  /// Validate the target and create a queued job.
  ///
  /// Rejects anything that is not a well-formed absolute http(s) URL with
  /// [`Error::InvalidTarget`] before any browser work happens.
  pub fn start(target_url: &str, workspace: &Path) -> Result<Self> {
    let target = Url::parse(target_url.trim()).map_err(|e| Error::InvalidTarget {
      reason: e.to_string(),
    })?;
    if !matches!(target.scheme(), "http" | "https") {
      return Err(Error::InvalidTarget {
        reason: format!("unsupported scheme '{}'", target.scheme()),
      });
    }
    if target.host_str().map(str::is_empty).unwrap_or(true) {
      return Err(Error::InvalidTarget {
        reason: "missing host".to_string(),
      });
    }

    let id = JobId(derive_job_name(&target));
    Ok(Self {
      id,
      target,
      workspace: workspace.to_path_buf(),
      state: JobState::Queued,
    })
  }

  pub fn id(&self) -> &JobId {
    &self.id
  }

  pub fn target(&self) -> &Url {
    &self.target
  }

  pub fn workspace(&self) -> &Path {
    &self.workspace
  }

  pub fn state(&self) -> JobState {
    self.state
  }

  pub(crate) fn set_state(&mut self, state: JobState) {
    self.state = state;
  }

  /// Workspace-relative archive location, named deterministically from the
  /// job identifier.
  pub fn archive_path(&self) -> PathBuf {
    self.workspace.join(format!("{}.tar", self.id))
  }
}

/// Filename-safe job name: host without `www.`, the leading path segments,
/// and a short hash of the full normalized target.
fn derive_job_name(target: &Url) -> String {
  let host = target
    .host_str()
    .unwrap_or("site")
    .trim_start_matches("www.")
    .to_ascii_lowercase();
  let mut name: String = host
    .chars()
    .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
    .collect();

  let path = target.path().trim_matches('/');
  if !path.is_empty() {
    let cleaned: String = path
      .chars()
      .take(30)
      .map(|c| if c.is_alphanumeric() { c } else { '_' })
      .collect();
    name.push('_');
    name.push_str(&cleaned);
  }

  let digest = Sha256::digest(target.as_str().as_bytes());
  let short: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
  format!("{name}-{short}")
}
