use thiserror::Error;

/// Errors produced by the pool's own plumbing.
///
/// These never describe the outcome of a task body; task-level failures and
/// cancellations travel as [`crate::Outcome`] variants instead.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
  #[error("pool is shutting down or already shut down, cannot accept new tasks")]
  PoolShuttingDown,

  #[error("pool's internal work queue was closed unexpectedly")]
  QueueClosed,

  #[error("task outcome channel closed before an outcome was delivered: {0}")]
  ResultChannelClosed(String),

  #[error("task outcome already taken or channel was not available")]
  ResultUnavailable,
}
