use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::outcome::{BoxError, Outcome};
use crate::token::CancelToken;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_task_id() -> u64 {
  NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// How a task body terminates when it does not produce a value.
#[derive(Debug, Error)]
pub enum TaskError {
  /// The body observed its token and aborted cooperatively.
  #[error("task aborted after observing cancellation")]
  Cancelled,

  /// The body's own business failure.
  #[error("{0}")]
  Other(BoxError),
}

impl TaskError {
  /// Wraps an arbitrary error as a business failure.
  pub fn other<E: Into<BoxError>>(err: E) -> Self {
    TaskError::Other(err.into())
  }
}

impl From<BoxError> for TaskError {
  fn from(err: BoxError) -> Self {
    TaskError::Other(err)
  }
}

/// The boxed future a task body produces.
pub type TaskFuture<R> = Pin<Box<dyn Future<Output = Result<R, TaskError>> + Send + 'static>>;

/// A unit of work: a function from a cancellation token to a future that
/// produces a value or a [`TaskError`].
///
/// The token reaches the body as an argument rather than through shared
/// closure capture, so every task carries exactly the state it was given.
/// Bodies that never look at the token simply run to completion.
pub struct Task<R: Send + 'static> {
  body: Box<dyn FnOnce(CancelToken) -> TaskFuture<R> + Send + 'static>,
}

impl<R: Send + 'static> Task<R> {
  pub fn new<F, Fut>(body: F) -> Self
  where
    F: FnOnce(CancelToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
  {
    Self {
      body: Box::new(move |token| Box::pin(body(token))),
    }
  }

  pub(crate) fn into_future(self, token: CancelToken) -> TaskFuture<R> {
    (self.body)(token)
  }
}

impl<R: Send + 'static> fmt::Debug for Task<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task").finish_non_exhaustive()
  }
}

/// Internal form of a task waiting in the pool's work queue.
pub(crate) struct QueuedTask<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) task: Task<R>,
  pub(crate) token: CancelToken,
  pub(crate) outcome_tx: Option<oneshot::Sender<Outcome<R>>>,
}

impl<R: Send + 'static> fmt::Debug for QueuedTask<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueuedTask")
      .field("task_id", &self.task_id)
      .field("token", &self.token)
      .finish_non_exhaustive()
  }
}
