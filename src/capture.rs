//! Browser-driven resource capture.
//!
//! The capture phase is a blocking, timing-sensitive external dependency, so
//! the whole session sits behind [`PageCapturer`]: the pipeline and rewrite
//! phases only ever see the trait, and tests swap in a deterministic stub that
//! returns a fixed resource set and fixed rendered HTML.

pub mod chromium;
pub mod pool;

use crate::cache::ResourceCache;
use crate::error::Result;
use crate::rewrite::IframeFragment;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Everything a capture session hands to the rewrite phase.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
  /// Post-script-execution DOM serialization — not the original source HTML.
  /// Client-side frameworks only produce correct markup after execution.
  pub rendered_html: String,
  /// The document URL after any redirects, used as the rewrite base.
  pub final_url: Url,
  /// Rendered HTML of each accessible same-origin iframe, keyed by DOM
  /// position. Cross-origin iframes are absent and become placeholders.
  pub iframes: Vec<IframeFragment>,
}

/// Tunables for one capture session.
///
/// Timeouts are per-wait-step, not a single global deadline, so a slow step
/// degrades capture completeness instead of failing the job.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
  pub viewport_width: u32,
  pub viewport_height: u32,
  pub user_agent: String,
  /// Bound on the initial wait for network idle after navigation.
  pub idle_timeout: Duration,
  /// Quiet window with zero in-flight requests that counts as "idle".
  pub idle_quiet_window: Duration,
  /// Shorter idle bound applied again after scrolling settles.
  pub settle_timeout: Duration,
  /// Pause after each scroll increment so triggered requests can fire.
  pub scroll_pause: Duration,
  /// Cap on scroll increments; lazy loaders that keep growing the document
  /// are abandoned after this many steps.
  pub max_scroll_steps: usize,
  /// Path to a Chrome/Chromium executable, if auto-detection is not wanted.
  pub chrome_path: Option<String>,
}

impl Default for CaptureOptions {
  fn default() -> Self {
    Self {
      viewport_width: 1920,
      viewport_height: 1080,
      user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                   (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
        .to_string(),
      idle_timeout: Duration::from_secs(20),
      idle_quiet_window: Duration::from_millis(500),
      settle_timeout: Duration::from_secs(5),
      scroll_pause: Duration::from_millis(600),
      max_scroll_steps: 20,
      chrome_path: None,
    }
  }
}

/// One browser-backed (or stubbed) capture session.
///
/// A session drives a single page through navigation, lazy-content
/// triggering, and DOM serialization, recording every completed network
/// response into the job's cache.
#[async_trait]
pub trait PageCapturer: Send + Sync {
  /// Capture `target`, populating `cache` with every observed resource.
  ///
  /// Fatal only on navigation failure; timed-out waits degrade the capture
  /// and are logged, never propagated.
  async fn capture(&self, target: &Url, cache: &mut ResourceCache) -> Result<CaptureOutcome>;

  /// Tear the session down, aborting any pending waits.
  ///
  /// Used for cancellation while a job is in its capturing phase.
  async fn close(&self);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_options_are_bounded() {
    let opts = CaptureOptions::default();
    assert!(opts.max_scroll_steps > 0);
    assert!(opts.idle_quiet_window < opts.idle_timeout);
    assert!(opts.settle_timeout <= opts.idle_timeout);
  }
}
