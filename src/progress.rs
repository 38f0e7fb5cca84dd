//! Lifecycle events surfaced to the embedding front-end.
//!
//! The pipeline emits one event per phase boundary plus a per-resource event
//! during capture. The front-end that streams these to a client lives outside
//! this crate; it only sees the [`ProgressSink`] trait.

use std::path::PathBuf;

/// Discrete lifecycle events for one snapshot job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
  CapturingStarted,
  ResourceCaptured { url: String, size_bytes: usize },
  RewritingStarted,
  PackagingStarted,
  Done { archive_path: PathBuf },
  Failed { kind: &'static str, message: String },
}

/// Receiver for job progress events.
///
/// Implementations must tolerate being called from async contexts without
/// blocking; `emit` is fire-and-forget from the pipeline's point of view.
pub trait ProgressSink: Send + Sync {
  fn emit(&self, event: ProgressEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
  fn emit(&self, _event: ProgressEvent) {}
}

/// Sink backed by an unbounded tokio channel, for front-ends that stream
/// events to a client. Dropped receivers are ignored: a disconnected consumer
/// must not fail the job.
#[derive(Debug, Clone)]
pub struct ChannelSink {
  tx: tokio::sync::mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
  pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

impl ProgressSink for ChannelSink {
  fn emit(&self, event: ProgressEvent) {
    let _ = self.tx.send(event);
  }
}
