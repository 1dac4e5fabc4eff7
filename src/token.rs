use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Why a token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
  /// The token's deadline elapsed.
  Timeout,
  /// `cancel()` was called.
  Explicit,
}

const REASON_NONE: u8 = 0;
const REASON_TIMEOUT: u8 = 1;
const REASON_EXPLICIT: u8 = 2;

/// A propagating cancellation signal carrying the reason it fired.
///
/// Wraps `tokio_util`'s `CancellationToken` and adds a write-once reason slot
/// and an optional deadline. Cancelling a parent cancels every child; a child
/// never cancels its parent. Once cancelled, a token stays cancelled.
#[derive(Clone)]
pub struct CancelToken {
  inner: CancellationToken,
  reason: Arc<AtomicU8>,
  parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self {
      inner: CancellationToken::new(),
      reason: Arc::new(AtomicU8::new(REASON_NONE)),
      parent: None,
    }
  }

  /// A root token that cancels itself with [`CancelReason::Timeout`] once
  /// `timeout` has elapsed.
  ///
  /// Must be called within a Tokio runtime: the deadline is a spawned timer
  /// task, which exits early if the token is cancelled first.
  pub fn with_timeout(timeout: Duration) -> Self {
    let token = Self::new();
    token.arm_deadline(timeout);
    token
  }

  /// A child of this token. Cancelling `self` cancels the child; when the
  /// cancellation came from above, the child's `reason()` reports the
  /// ancestor's reason.
  pub fn child(&self) -> Self {
    Self {
      inner: self.inner.child_token(),
      reason: Arc::new(AtomicU8::new(REASON_NONE)),
      parent: Some(Arc::new(self.clone())),
    }
  }

  /// A child token with its own deadline on top of the parent link.
  pub fn child_with_timeout(&self, timeout: Duration) -> Self {
    let token = self.child();
    token.arm_deadline(timeout);
    token
  }

  fn arm_deadline(&self, timeout: Duration) {
    let timer = self.clone();
    tokio::spawn(async move {
      tokio::select! {
        biased;
        _ = timer.inner.cancelled() => {}
        _ = tokio::time::sleep(timeout) => {
          trace!(timeout_ms = timeout.as_millis() as u64, "Deadline elapsed, cancelling token.");
          timer.cancel_with(CancelReason::Timeout);
        }
      }
    });
  }

  /// Requests cancellation. Idempotent: the first call records
  /// [`CancelReason::Explicit`], later calls are no-ops.
  pub fn cancel(&self) {
    self.cancel_with(CancelReason::Explicit);
  }

  pub(crate) fn cancel_with(&self, reason: CancelReason) {
    if self.inner.is_cancelled() {
      return;
    }
    let code = match reason {
      CancelReason::Timeout => REASON_TIMEOUT,
      CancelReason::Explicit => REASON_EXPLICIT,
    };
    if self
      .reason
      .compare_exchange(REASON_NONE, code, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      trace!(?reason, "Token cancelled.");
    }
    self.inner.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.is_cancelled()
  }

  /// The reason recorded by the first cancellation, if any. A child cancelled
  /// from above reports the nearest ancestor's reason.
  pub fn reason(&self) -> Option<CancelReason> {
    match self.reason.load(Ordering::Acquire) {
      REASON_TIMEOUT => Some(CancelReason::Timeout),
      REASON_EXPLICIT => Some(CancelReason::Explicit),
      _ => self.parent.as_ref().and_then(|parent| parent.reason()),
    }
  }

  /// Resolves when the token is cancelled. Task bodies may `select!` on this
  /// to abort early.
  pub async fn cancelled(&self) {
    self.inner.cancelled().await;
  }
}

impl Default for CancelToken {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for CancelToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CancelToken")
      .field("cancelled", &self.is_cancelled())
      .field("reason", &self.reason())
      .finish()
  }
}
