//! Deterministic capture double shared by the integration tests.
//!
//! Returns a fixed resource set and fixed rendered HTML so the rewrite and
//! packaging phases can be exercised without a browser engine.

use async_trait::async_trait;
use sitesnap::cache::ResourceCache;
use sitesnap::capture::{CaptureOutcome, PageCapturer};
use sitesnap::error::{Error, NavigationError, Result};
use sitesnap::rewrite::IframeFragment;
use url::Url;

pub struct StubCapturer {
  pub resources: Vec<(&'static str, Vec<u8>, Option<&'static str>)>,
  pub rendered_html: String,
  pub iframes: Vec<IframeFragment>,
  pub fail_navigation: bool,
}

impl StubCapturer {
  pub fn new(rendered_html: &str) -> Self {
    Self {
      resources: Vec::new(),
      rendered_html: rendered_html.to_string(),
      iframes: Vec::new(),
      fail_navigation: false,
    }
  }

  pub fn with_resource(
    mut self,
    url: &'static str,
    bytes: &[u8],
    content_type: Option<&'static str>,
  ) -> Self {
    self.resources.push((url, bytes.to_vec(), content_type));
    self
  }
}

#[async_trait]
impl PageCapturer for StubCapturer {
  async fn capture(&self, target: &Url, cache: &mut ResourceCache) -> Result<CaptureOutcome> {
    if self.fail_navigation {
      return Err(Error::Navigation(NavigationError::Unreachable {
        url: target.to_string(),
        reason: "connection refused".to_string(),
      }));
    }
    for (url, bytes, content_type) in &self.resources {
      cache.put(url, bytes.clone(), content_type.map(str::to_string));
    }
    Ok(CaptureOutcome {
      rendered_html: self.rendered_html.clone(),
      final_url: target.clone(),
      iframes: self.iframes.clone(),
    })
  }

  async fn close(&self) {}
}
