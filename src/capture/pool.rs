//! Process-wide cap on concurrent browser sessions.
//!
//! Launching an unbounded number of Chromium processes takes a host down long
//! before the pipeline itself does, so session acquisition is an explicit
//! bounded resource: jobs queue on the pool instead of spawning browsers.
//! Modeled as a visible object rather than ambient shared state so the limit
//! is testable in isolation.

use crate::capture::chromium::ChromiumCapturer;
use crate::capture::CaptureOptions;
use crate::error::{Error, Result};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded pool of capture sessions.
#[derive(Clone)]
pub struct BrowserPool {
  permits: Arc<Semaphore>,
  options: CaptureOptions,
}

impl BrowserPool {
  pub fn new(max_sessions: usize, options: CaptureOptions) -> Self {
    Self {
      permits: Arc::new(Semaphore::new(max_sessions)),
      options,
    }
  }

  /// Sessions that could start right now without queueing.
  pub fn available(&self) -> usize {
    self.permits.available_permits()
  }

  /// Reserve a session slot, waiting if the pool is exhausted.
  ///
  /// Split from [`BrowserPool::acquire`] so the queueing behavior is testable
  /// without a browser binary.
  pub async fn reserve(&self) -> Result<SessionSlot> {
    let permit = Arc::clone(&self.permits)
      .acquire_owned()
      .await
      .map_err(|_| Error::Browser("browser pool closed".to_string()))?;
    Ok(SessionSlot { _permit: permit })
  }

  /// Reserve a slot and launch a browser session bound to it.
  ///
  /// The session's process is released back to the pool when the returned
  /// [`PooledSession`] is dropped.
  pub async fn acquire(&self) -> Result<PooledSession> {
    let slot = self.reserve().await?;
    let capturer = ChromiumCapturer::launch(self.options.clone()).await?;
    Ok(PooledSession {
      capturer,
      _slot: slot,
    })
  }
}

/// A reserved place in the pool, held until dropped.
pub struct SessionSlot {
  _permit: OwnedSemaphorePermit,
}

/// A live capture session occupying one pool slot.
pub struct PooledSession {
  capturer: ChromiumCapturer,
  _slot: SessionSlot,
}

impl Deref for PooledSession {
  type Target = ChromiumCapturer;

  fn deref(&self) -> &Self::Target {
    &self.capturer
  }
}
