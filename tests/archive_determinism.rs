//! Repeated packaging of one unchanged capture must be byte-reproducible.

mod common;

use common::StubCapturer;
use sitesnap::progress::NullSink;
use sitesnap::rewrite::scripts::SignatureSet;
use sitesnap::{run_job, SnapshotJob};

const PAGE: &str = r#"<!DOCTYPE html>
<html><head><link rel="stylesheet" href="style.css"></head>
<body><img src="bg.png"></body></html>"#;

fn capturer() -> StubCapturer {
  StubCapturer::new(PAGE)
    .with_resource(
      "https://example.test/style.css",
      b"h1 { background: url(bg.png); }",
      Some("text/css"),
    )
    .with_resource("https://example.test/bg.png", &[9, 9, 9], Some("image/png"))
}

#[tokio::test]
async fn repeated_runs_produce_identical_archives() {
  let signatures = SignatureSet::builtin();

  let ws_a = tempfile::tempdir().unwrap();
  let mut job_a = SnapshotJob::start("https://example.test/", ws_a.path()).unwrap();
  let path_a = run_job(&mut job_a, &capturer(), &signatures, &NullSink)
    .await
    .unwrap();

  let ws_b = tempfile::tempdir().unwrap();
  let mut job_b = SnapshotJob::start("https://example.test/", ws_b.path()).unwrap();
  let path_b = run_job(&mut job_b, &capturer(), &signatures, &NullSink)
    .await
    .unwrap();

  let bytes_a = std::fs::read(&path_a).unwrap();
  let bytes_b = std::fs::read(&path_b).unwrap();
  assert!(!bytes_a.is_empty());
  assert_eq!(bytes_a, bytes_b);

  // Archive names are deterministic too: same target, same file name.
  assert_eq!(path_a.file_name(), path_b.file_name());
}
