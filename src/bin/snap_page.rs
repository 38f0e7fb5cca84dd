//! Snapshot a single page into a self-contained tar archive.

use clap::Parser;
use sitesnap::capture::chromium::ChromiumCapturer;
use sitesnap::capture::{CaptureOptions, PageCapturer};
use sitesnap::progress::{ChannelSink, ProgressEvent};
use sitesnap::rewrite::scripts::SignatureSet;
use sitesnap::{run_job, Result, SnapshotJob};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
  name = "snap_page",
  version,
  about = "Capture a dynamically-rendered page into an offline snapshot archive"
)]
struct Cli {
  /// URL to snapshot (http/https)
  url: String,

  /// Output archive path (.tar). Defaults to a name derived from the target
  /// in the current directory.
  #[arg(long)]
  out: Option<PathBuf>,

  /// Bound on the initial network-idle wait, in seconds
  #[arg(long, default_value = "20")]
  idle_timeout_secs: u64,

  /// Cap on lazy-load scroll increments
  #[arg(long, default_value = "20")]
  max_scroll_steps: usize,

  /// Leave signature-matched hydration/smooth-scroll scripts in place
  #[arg(long)]
  keep_runtime_scripts: bool,

  /// Path to a Chrome/Chromium executable (auto-detected when omitted)
  #[arg(long)]
  chrome: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sitesnap=info")),
    )
    .init();

  let cli = Cli::parse();

  let workspace = std::env::current_dir()?;
  let mut job = SnapshotJob::start(&cli.url, &workspace)?;

  let options = CaptureOptions {
    idle_timeout: Duration::from_secs(cli.idle_timeout_secs),
    max_scroll_steps: cli.max_scroll_steps,
    chrome_path: cli.chrome.clone(),
    ..CaptureOptions::default()
  };

  let signatures = if cli.keep_runtime_scripts {
    SignatureSet::empty()
  } else {
    SignatureSet::builtin()
  };

  let (sink, mut events) = ChannelSink::new();
  let reporter = tokio::spawn(async move {
    while let Some(event) = events.recv().await {
      match event {
        ProgressEvent::CapturingStarted => eprintln!("Capturing..."),
        ProgressEvent::ResourceCaptured { url, size_bytes } => {
          eprintln!("  captured {size_bytes:>8}B  {url}");
        }
        ProgressEvent::RewritingStarted => eprintln!("Rewriting..."),
        ProgressEvent::PackagingStarted => eprintln!("Packaging..."),
        ProgressEvent::Done { archive_path } => {
          eprintln!("Done: {}", archive_path.display());
        }
        ProgressEvent::Failed { kind, message } => {
          eprintln!("Failed ({kind}): {message}");
        }
      }
    }
  });

  let capturer = ChromiumCapturer::launch(options).await?;
  let result = run_job(&mut job, &capturer, &signatures, &sink).await;
  capturer.close().await;
  drop(sink);
  let _ = reporter.await;

  let archive_path = result?;
  if let Some(out) = cli.out {
    if out != archive_path {
      if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
          std::fs::create_dir_all(parent)?;
        }
      }
      std::fs::rename(&archive_path, &out)?;
      println!("{}", out.display());
      return Ok(());
    }
  }
  println!("{}", archive_path.display());
  Ok(())
}
