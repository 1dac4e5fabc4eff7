use std::error::Error as StdError;

use thiserror::Error;

use crate::token::CancelReason;

/// Boxed opaque error produced by a task body.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// How a dispatched task went wrong.
#[derive(Debug, Error)]
pub enum Fault {
  /// The body ran and returned its own error.
  #[error("task failed: {0}")]
  Failed(BoxError),

  /// The body panicked. The panic was recovered at the execution boundary
  /// and the pool kept running.
  #[error("task panicked: {0}")]
  Panicked(String),
}

impl Fault {
  /// True when this failure is a panic recovered at the execution boundary
  /// rather than an error the body returned.
  pub fn is_recovered_panic(&self) -> bool {
    matches!(self, Fault::Panicked(_))
  }
}

/// The terminal result of one submitted task.
///
/// Every submitted task produces exactly one `Outcome`, including under
/// cancellation, shutdown, and panics.
#[derive(Debug)]
pub enum Outcome<R> {
  /// The body ran to completion and produced a value.
  Success(R),
  /// The body ran and failed, or panicked.
  Failure(Fault),
  /// The task never started, or aborted after observing its token.
  Cancelled(CancelReason),
}

impl<R> Outcome<R> {
  pub fn is_success(&self) -> bool {
    matches!(self, Outcome::Success(_))
  }

  pub fn is_failure(&self) -> bool {
    matches!(self, Outcome::Failure(_))
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Outcome::Cancelled(_))
  }

  /// The success value, if any.
  pub fn success(self) -> Option<R> {
    match self {
      Outcome::Success(value) => Some(value),
      _ => None,
    }
  }
}
