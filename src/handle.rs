use std::fmt;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::PoolError;
use crate::outcome::Outcome;
use crate::token::CancelToken;

/// A handle to a task submitted to a [`crate::WorkerPool`].
///
/// Allows requesting cooperative cancellation of the task and awaiting its
/// terminal [`Outcome`].
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) token: CancelToken,
  pub(crate) outcome_rx: Option<oneshot::Receiver<Outcome<R>>>,
}

impl<R: Send + 'static> TaskHandle<R> {
  /// The unique id of this task.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// A clone of the task's cancellation token.
  pub fn token(&self) -> CancelToken {
    self.token.clone()
  }

  /// Whether cancellation has been requested for this task.
  pub fn is_cancel_requested(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Requests cooperative cancellation.
  ///
  /// A task still queued is never started. A body already running aborts
  /// only when it checks its token; otherwise it finishes naturally.
  pub fn cancel(&self) {
    debug!(task_id = %self.task_id, "Handle: cancellation requested.");
    self.token.cancel();
  }

  /// Awaits the task's terminal outcome.
  ///
  /// # Errors
  /// Returns `PoolError::ResultChannelClosed` if the pool dropped the sending
  /// half without delivering an outcome (e.g. the pool was dropped with the
  /// task still queued), or `PoolError::ResultUnavailable` if the outcome was
  /// already taken.
  pub async fn outcome(mut self) -> Result<Outcome<R>, PoolError> {
    match self.outcome_rx.take() {
      Some(rx) => match rx.await {
        Ok(outcome) => Ok(outcome),
        Err(recv_error) => {
          warn!(task_id = %self.task_id, "Outcome channel receive error: {}", recv_error);
          Err(PoolError::ResultChannelClosed(format!(
            "task {} outcome channel closed before delivery: {}",
            self.task_id, recv_error
          )))
        }
      },
      None => Err(PoolError::ResultUnavailable),
    }
  }
}

impl<R: Send + 'static> fmt::Debug for TaskHandle<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandle")
      .field("task_id", &self.task_id)
      .field("token", &self.token)
      .finish_non_exhaustive()
  }
}
