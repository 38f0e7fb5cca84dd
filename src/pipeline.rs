//! Phase orchestration for one snapshot job.
//!
//! Capture, rewrite, and packaging run sequentially; each phase is a pure
//! transformation of its predecessor's output and no phase reaches back into
//! an earlier one. The pipeline owns the job's state transitions and the
//! progress-event contract; on a fatal error the job lands in `Failed` with a
//! terminal event and no archive is emitted.

use crate::archive::{self, SnapshotManifest};
use crate::cache::ResourceCache;
use crate::capture::PageCapturer;
use crate::error::Result;
use crate::job::{JobState, SnapshotJob};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::rewrite::scripts::SignatureSet;
use crate::rewrite::MarkupRewriter;
use std::path::PathBuf;

/// Drive `job` through capture → rewrite → package.
///
/// Returns the archive path on success. On failure the job's state is
/// `Failed`, a terminal `Failed` event with a stable error kind has been
/// emitted, and no archive exists at the job's archive path.
pub async fn run_job<C>(
  job: &mut SnapshotJob,
  capturer: &C,
  signatures: &SignatureSet,
  sink: &dyn ProgressSink,
) -> Result<PathBuf>
where
  C: PageCapturer + ?Sized,
{
  match run_phases(job, capturer, signatures, sink).await {
    Ok(archive_path) => {
      job.set_state(JobState::Done);
      sink.emit(ProgressEvent::Done {
        archive_path: archive_path.clone(),
      });
      Ok(archive_path)
    }
    Err(err) => {
      tracing::error!(job = %job.id(), kind = err.kind(), "snapshot failed: {err}");
      job.set_state(JobState::Failed);
      sink.emit(ProgressEvent::Failed {
        kind: err.kind(),
        message: err.to_string(),
      });
      Err(err)
    }
  }
}

async fn run_phases<C>(
  job: &mut SnapshotJob,
  capturer: &C,
  signatures: &SignatureSet,
  sink: &dyn ProgressSink,
) -> Result<PathBuf>
where
  C: PageCapturer + ?Sized,
{
  job.set_state(JobState::Capturing);
  sink.emit(ProgressEvent::CapturingStarted);

  let mut cache = ResourceCache::new();
  let outcome = capturer.capture(job.target(), &mut cache).await?;
  for resource in cache.all() {
    sink.emit(ProgressEvent::ResourceCaptured {
      url: resource.url.clone(),
      size_bytes: resource.bytes.len(),
    });
  }
  tracing::info!(job = %job.id(), resources = cache.len(), "capture phase done");

  job.set_state(JobState::Rewriting);
  sink.emit(ProgressEvent::RewritingStarted);

  let rewriter = MarkupRewriter::new(&cache, signatures);
  let output = rewriter.rewrite(&outcome.rendered_html, &outcome.final_url, &outcome.iframes)?;
  tracing::info!(job = %job.id(), files = output.tree.len(), "rewrite phase done");

  job.set_state(JobState::Packaging);
  sink.emit(ProgressEvent::PackagingStarted);

  let manifest = SnapshotManifest::build(job.target().as_str(), &output.assets);
  let archive_path = job.archive_path();
  archive::pack_to_path(&output.tree, &manifest, &archive_path)?;

  Ok(archive_path)
}
