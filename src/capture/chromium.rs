//! Headless-Chromium capture session over the Chrome DevTools Protocol.
//!
//! One [`ChromiumCapturer`] owns one browser process. Each capture drives one
//! page: enable network tracking, navigate, wait for the network to go idle,
//! scroll to trigger lazy-loaded content, wait again, then serialize the
//! rendered DOM and pull every recorded response body into the job's cache.
//!
//! Navigation failure is the only fatal outcome here. Every bounded wait
//! (idle, scroll settle) degrades capture completeness when it elapses and is
//! logged rather than propagated, since a partial snapshot beats no snapshot.

use crate::cache::ResourceCache;
use crate::capture::{CaptureOptions, CaptureOutcome, PageCapturer};
use crate::error::{Error, NavigationError, Result};
use crate::rewrite::IframeFragment;
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
  EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
  EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use url::Url;

/// Destroys known smooth-scroll controllers and unlocks the scroll container
/// so programmatic scrolling reaches the whole document.
const PRE_SCROLL_JS: &str = r#"
() => {
  if (window.lenis) { try { window.lenis.destroy(); } catch (e) {} }
  if (window.locomotiveScroll) { try { window.locomotiveScroll.destroy(); } catch (e) {} }
  document.documentElement.style.scrollBehavior = 'auto';
  document.body.style.scrollBehavior = 'auto';
  if (getComputedStyle(document.body).overflow === 'hidden') {
    document.body.style.overflow = 'auto';
  }
  if (getComputedStyle(document.documentElement).overflow === 'hidden') {
    document.documentElement.style.overflow = 'auto';
  }
}
"#;

/// Serializes every iframe's rendered document where same-origin access
/// allows it; cross-origin frames yield null.
const IFRAME_DUMP_JS: &str = r#"
() => Array.from(document.querySelectorAll('iframe')).map((frame) => {
  try {
    const doc = frame.contentDocument;
    if (!doc || !doc.documentElement) { return null; }
    return {
      url: doc.location ? doc.location.href : null,
      html: doc.documentElement.outerHTML,
    };
  } catch (e) {
    return null;
  }
})
"#;

#[derive(Debug, Deserialize)]
struct FrameDump {
  url: Option<String>,
  html: Option<String>,
}

/// Response metadata recorded while the page loads. Bodies are pulled after
/// the page settles, while the session is still alive.
#[derive(Debug, Clone)]
struct RecordedResponse {
  request_id: RequestId,
  url: String,
  mime_type: String,
  status: i64,
}

/// Shared network-event state for one capture.
#[derive(Default)]
struct NetworkRecorder {
  in_flight: AtomicI64,
  responses: StdMutex<Vec<RecordedResponse>>,
  request_urls: StdMutex<HashMap<RequestId, String>>,
}

impl NetworkRecorder {
  fn quiet(&self) -> bool {
    self.in_flight.load(Ordering::Relaxed) <= 0
  }
}

/// Browser-backed [`PageCapturer`].
pub struct ChromiumCapturer {
  browser: Mutex<Option<Browser>>,
  handler_task: Mutex<Option<JoinHandle<()>>>,
  options: CaptureOptions,
}

impl ChromiumCapturer {
  /// Launch a headless browser process configured for snapshot capture.
  pub async fn launch(options: CaptureOptions) -> Result<Self> {
    let mut builder = BrowserConfig::builder()
      .window_size(options.viewport_width, options.viewport_height)
      .no_sandbox()
      .arg("--headless=new")
      .arg("--disable-gpu")
      .arg("--disable-dev-shm-usage")
      .arg("--disable-background-networking")
      .arg("--mute-audio")
      .arg("--hide-scrollbars");

    if let Some(ref chrome_path) = options.chrome_path {
      builder = builder.chrome_executable(chrome_path);
    }

    let config = builder
      .build()
      .map_err(|e| Error::Browser(format!("Failed to build browser config: {e}")))?;

    let (browser, mut handler) = Browser::launch(config)
      .await
      .map_err(|e| Error::Browser(format!("Failed to launch browser: {e}")))?;

    let handler_task = tokio::spawn(async move {
      while let Some(event) = handler.next().await {
        if let Err(e) = event {
          tracing::debug!("browser handler: {e}");
        }
      }
    });

    Ok(Self {
      browser: Mutex::new(Some(browser)),
      handler_task: Mutex::new(Some(handler_task)),
      options,
    })
  }

  /// Wait until no request has been in flight for the quiet window.
  ///
  /// Returns the advisory [`Error::CaptureTimeout`] when the bound elapses;
  /// callers log it and proceed with whatever was captured.
  async fn wait_for_idle(
    &self,
    recorder: &NetworkRecorder,
    timeout: std::time::Duration,
    what: &'static str,
  ) -> Result<()> {
    let start = Instant::now();
    let mut quiet_since: Option<Instant> = None;

    loop {
      if recorder.quiet() {
        match quiet_since {
          Some(since) if since.elapsed() >= self.options.idle_quiet_window => return Ok(()),
          None => quiet_since = Some(Instant::now()),
          _ => {}
        }
      } else {
        quiet_since = None;
      }

      if start.elapsed() >= timeout {
        return Err(Error::CaptureTimeout {
          what,
          waited_ms: start.elapsed().as_millis() as u64,
        });
      }
      tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
  }

  /// Scroll the viewport to the bottom in fixed increments, pausing after
  /// each so lazy-load requests can fire. Document growth during scrolling
  /// extends the target height, bounded by the step cap.
  async fn scroll_page(&self, page: &Page) -> Result<()> {
    page
      .evaluate_function(PRE_SCROLL_JS)
      .await
      .map_err(|e| Error::Browser(e.to_string()))?;

    let mut total: f64 = eval_number(
      page,
      "Math.max(document.body.scrollHeight, document.documentElement.scrollHeight)",
    )
    .await?;
    let viewport: f64 = eval_number(page, "window.innerHeight").await?;
    if viewport <= 0.0 {
      return Ok(());
    }

    let mut position = 0.0;
    let mut step = 0;
    while position < total && step < self.options.max_scroll_steps {
      page
        .evaluate(format!(
          "window.scrollTo(0, {position}); document.documentElement.scrollTop = {position};"
        ))
        .await
        .map_err(|e| Error::Browser(e.to_string()))?;
      tokio::time::sleep(self.options.scroll_pause).await;

      position += viewport;
      step += 1;

      let grown = eval_number(
        page,
        "Math.max(document.body.scrollHeight, document.documentElement.scrollHeight)",
      )
      .await
      .unwrap_or(total);
      if grown > total {
        total = grown;
      }
    }

    // Back to the top so the serialized DOM reflects initial scroll state.
    page
      .evaluate("window.scrollTo(0, 0)")
      .await
      .map_err(|e| Error::Browser(e.to_string()))?;
    Ok(())
  }

  /// Pull every recorded response body into the cache.
  ///
  /// Individual body fetch failures (redirect hops, evicted bodies) are
  /// advisory and skipped. A redirect chain's payload is stored under both
  /// the original request URL and the final URL so either spelling resolves.
  async fn drain_responses(
    &self,
    page: &Page,
    recorder: &NetworkRecorder,
    cache: &mut ResourceCache,
  ) {
    let recorded: Vec<RecordedResponse> = match recorder.responses.lock() {
      Ok(responses) => responses.clone(),
      Err(_) => return,
    };
    let request_urls: HashMap<RequestId, String> = match recorder.request_urls.lock() {
      Ok(urls) => urls.clone(),
      Err(_) => return,
    };

    for response in recorded {
      if response.status != 200 {
        continue;
      }
      let body = match page
        .execute(GetResponseBodyParams::new(response.request_id.clone()))
        .await
      {
        Ok(result) => result.result,
        Err(e) => {
          tracing::debug!(url = %response.url, "no body available: {e}");
          continue;
        }
      };

      let bytes = if body.base64_encoded {
        match base64::engine::general_purpose::STANDARD.decode(body.body.as_bytes()) {
          Ok(decoded) => decoded,
          Err(e) => {
            tracing::debug!(url = %response.url, "undecodable body: {e}");
            continue;
          }
        }
      } else {
        body.body.into_bytes()
      };

      let content_type = if response.mime_type.is_empty() {
        None
      } else {
        Some(response.mime_type.clone())
      };

      cache.put(&response.url, bytes.clone(), content_type.clone());
      if let Some(request_url) = request_urls.get(&response.request_id) {
        if request_url != &response.url {
          cache.put(request_url, bytes, content_type);
        }
      }
    }
  }
}

async fn eval_number(page: &Page, expr: &str) -> Result<f64> {
  page
    .evaluate(expr)
    .await
    .map_err(|e| Error::Browser(e.to_string()))?
    .into_value::<f64>()
    .map_err(|e| Error::Browser(e.to_string()))
}

/// Subscribe the network-event listeners feeding `recorder`.
async fn spawn_listeners(
  page: &Page,
  recorder: &Arc<NetworkRecorder>,
) -> Result<Vec<JoinHandle<()>>> {
  let mut tasks = Vec::with_capacity(4);

  let mut requests = page
    .event_listener::<EventRequestWillBeSent>()
    .await
    .map_err(|e| Error::Browser(e.to_string()))?;
  let state = Arc::clone(recorder);
  tasks.push(tokio::spawn(async move {
    while let Some(event) = requests.next().await {
      state.in_flight.fetch_add(1, Ordering::Relaxed);
      if let Ok(mut urls) = state.request_urls.lock() {
        urls
          .entry(event.request_id.clone())
          .or_insert_with(|| event.request.url.clone());
      }
    }
  }));

  let mut responses = page
    .event_listener::<EventResponseReceived>()
    .await
    .map_err(|e| Error::Browser(e.to_string()))?;
  let state = Arc::clone(recorder);
  tasks.push(tokio::spawn(async move {
    while let Some(event) = responses.next().await {
      if let Ok(mut recorded) = state.responses.lock() {
        recorded.push(RecordedResponse {
          request_id: event.request_id.clone(),
          url: event.response.url.clone(),
          mime_type: event.response.mime_type.clone(),
          status: event.response.status,
        });
      }
    }
  }));

  let mut finished = page
    .event_listener::<EventLoadingFinished>()
    .await
    .map_err(|e| Error::Browser(e.to_string()))?;
  let state = Arc::clone(recorder);
  tasks.push(tokio::spawn(async move {
    while finished.next().await.is_some() {
      state.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
  }));

  let mut failed = page
    .event_listener::<EventLoadingFailed>()
    .await
    .map_err(|e| Error::Browser(e.to_string()))?;
  let state = Arc::clone(recorder);
  tasks.push(tokio::spawn(async move {
    while failed.next().await.is_some() {
      state.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
  }));

  Ok(tasks)
}

#[async_trait]
impl PageCapturer for ChromiumCapturer {
  async fn capture(&self, target: &Url, cache: &mut ResourceCache) -> Result<CaptureOutcome> {
    // The browser lock is held only long enough to open the page, so a
    // concurrent `close()` can still tear the session down mid-capture;
    // pending waits then fail fast instead of running out their timeouts.
    let page = {
      let browser_guard = self.browser.lock().await;
      let browser = browser_guard.as_ref().ok_or_else(|| {
        Error::Navigation(NavigationError::SessionClosed {
          url: target.to_string(),
        })
      })?;
      browser
        .new_page("about:blank")
        .await
        .map_err(|e| Error::Browser(format!("Failed to open page: {e}")))?
    };
    page
      .set_user_agent(self.options.user_agent.as_str())
      .await
      .map_err(|e| Error::Browser(e.to_string()))?;
    page
      .execute(EnableParams::default())
      .await
      .map_err(|e| Error::Browser(format!("Failed to enable network tracking: {e}")))?;

    let recorder = Arc::new(NetworkRecorder::default());
    let listener_tasks = spawn_listeners(&page, &recorder).await?;

    // Target unreachable (DNS, TLS, refused) is fatal; a slow load is not.
    let navigated = tokio::time::timeout(self.options.idle_timeout, page.goto(target.as_str()))
      .await;
    match navigated {
      Ok(Ok(_)) => {}
      Ok(Err(e)) => {
        for task in &listener_tasks {
          task.abort();
        }
        let _ = page.close().await;
        return Err(Error::Navigation(NavigationError::Unreachable {
          url: target.to_string(),
          reason: e.to_string(),
        }));
      }
      Err(_) => {
        tracing::warn!(url = %target, "navigation still loading at timeout, proceeding");
      }
    }

    if let Err(err) = self
      .wait_for_idle(&recorder, self.options.idle_timeout, "network idle")
      .await
    {
      tracing::warn!(%err, "proceeding with partial capture");
    }

    if let Err(err) = self.scroll_page(&page).await {
      tracing::warn!(%err, "lazy-load scrolling failed, proceeding");
    }

    if let Err(err) = self
      .wait_for_idle(&recorder, self.options.settle_timeout, "scroll settle")
      .await
    {
      tracing::warn!(%err, "proceeding with partial capture");
    }

    self.drain_responses(&page, &recorder, cache).await;

    let rendered_html = page
      .content()
      .await
      .map_err(|e| Error::Browser(format!("Failed to serialize rendered DOM: {e}")))?;

    let final_url = match page.url().await {
      Ok(Some(current)) => Url::parse(&current).unwrap_or_else(|_| target.clone()),
      _ => target.clone(),
    };

    let iframes = match page.evaluate_function(IFRAME_DUMP_JS).await {
      Ok(result) => match result.into_value::<Vec<Option<FrameDump>>>() {
        Ok(dumps) => dumps
          .into_iter()
          .enumerate()
          .filter_map(|(index, dump)| {
            let dump = dump?;
            let html = dump.html?;
            if html.is_empty() {
              return None;
            }
            Some(IframeFragment {
              index,
              url: dump.url.filter(|u| u.starts_with("http")),
              html,
            })
          })
          .collect(),
        Err(e) => {
          tracing::debug!("iframe dump undeserializable: {e}");
          Vec::new()
        }
      },
      Err(e) => {
        tracing::debug!("iframe dump failed: {e}");
        Vec::new()
      }
    };

    for task in &listener_tasks {
      task.abort();
    }
    if let Err(e) = page.close().await {
      tracing::debug!("failed to close page: {e}");
    }

    tracing::info!(
      url = %target,
      resources = cache.len(),
      iframes = iframes.len(),
      "capture complete"
    );

    Ok(CaptureOutcome {
      rendered_html,
      final_url,
      iframes,
    })
  }

  async fn close(&self) {
    if let Some(task) = self.handler_task.lock().await.take() {
      // The handler loop ends on its own once the browser goes away; abort is
      // only a backstop for a wedged connection.
      let mut browser_guard = self.browser.lock().await;
      if let Some(mut browser) = browser_guard.take() {
        if let Err(e) = browser.close().await {
          tracing::warn!("failed to close browser: {e}");
        }
        let _ = browser.wait().await;
      }
      task.abort();
    }
  }
}
