//! Error types for sitesnap
//!
//! One top-level [`Error`] wraps the per-subsystem error enums:
//! - Target validation (rejected before any browser work)
//! - Navigation (target unreachable, fatal to the job)
//! - Capture timeouts (advisory only)
//! - Rewrite errors (malformed captured markup/styles)
//! - Packaging errors (workspace corruption, fatal)
//!
//! All errors use the `thiserror` crate for minimal boilerplate and
//! proper error trait implementations.

use thiserror::Error;

/// Result type alias for sitesnap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for sitesnap
///
/// Each variant maps to a stable error kind (see [`Error::kind`]) so the
/// caller driving a job can distinguish "target unreachable" from "internal
/// error" without string matching.
#[derive(Error, Debug)]
pub enum Error {
  /// The target URL was rejected before any browser work started
  #[error("Invalid target: {reason}")]
  InvalidTarget { reason: String },

  /// The browser could not reach the target at all
  #[error("Navigation error: {0}")]
  Navigation(#[from] NavigationError),

  /// A bounded wait (network idle, scroll settle) elapsed.
  ///
  /// Advisory: the capture session logs this and proceeds with whatever was
  /// captured. It never aborts a job on its own.
  #[error("Capture wait timed out after {waited_ms}ms: {what}")]
  CaptureTimeout { what: &'static str, waited_ms: u64 },

  /// The captured document or one of its stylesheets could not be processed
  #[error("Rewrite error: {0}")]
  Rewrite(#[from] RewriteError),

  /// The staged snapshot tree could not be serialized into an archive
  #[error("Packaging error: {0}")]
  Packaging(#[from] PackagingError),

  /// Browser transport failure (CDP connection, protocol error)
  #[error("Browser error: {0}")]
  Browser(String),

  /// I/O error (workspace files, archive output)
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

impl Error {
  /// Stable machine-readable kind, carried by the terminal `failed` progress
  /// event.
  pub fn kind(&self) -> &'static str {
    match self {
      Error::InvalidTarget { .. } => "invalid-target",
      Error::Navigation(_) => "navigation-error",
      Error::CaptureTimeout { .. } => "capture-timeout",
      Error::Rewrite(_) => "rewrite-error",
      Error::Packaging(_) => "packaging-error",
      Error::Browser(_) => "browser-error",
      Error::Io(_) => "io-error",
    }
  }

  /// Whether this error aborts the owning job.
  ///
  /// Capture timeouts degrade completeness but never fail the job; everything
  /// else on a job's main path is structural.
  pub fn is_fatal(&self) -> bool {
    !matches!(self, Error::CaptureTimeout { .. })
  }
}

/// Errors raised while navigating the browser to the target
///
/// These are fatal to the job: if the page never loads there is nothing to
/// snapshot.
#[derive(Error, Debug, Clone)]
pub enum NavigationError {
  /// DNS resolution, TLS handshake, or connection failure
  #[error("Failed to reach {url}: {reason}")]
  Unreachable { url: String, reason: String },

  /// The browser session died while the navigation was in flight
  #[error("Browser session closed during navigation to {url}")]
  SessionClosed { url: String },
}

/// Errors raised while rewriting captured markup or stylesheets
#[derive(Error, Debug, Clone)]
pub enum RewriteError {
  /// The rendered document failed to parse
  #[error("Invalid HTML: {message}")]
  InvalidHtml { message: String },

  /// A captured stylesheet could not be tokenized
  #[error("Invalid CSS in {url}: {message}")]
  InvalidCss { url: String, message: String },

  /// The document has no <head> to receive the corrective stylesheet
  #[error("Document has no head element")]
  MissingHead,
}

/// Errors raised while packing the staged file tree
///
/// Always fatal: a missing or unreadable staged file means the workspace was
/// tampered with or corrupted, and a partial archive must never be emitted.
#[derive(Error, Debug)]
pub enum PackagingError {
  #[error("Staged file missing or unreadable: {path}: {reason}")]
  UnreadableEntry { path: String, reason: String },

  #[error("Archive entry path is not relative: {path}")]
  NonRelativePath { path: String },

  #[error("Failed to write archive: {0}")]
  Write(#[from] std::io::Error),
}
