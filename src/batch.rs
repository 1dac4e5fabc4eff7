use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, trace};

use crate::aggregator::Aggregator;
use crate::outcome::{Fault, Outcome};
use crate::pool::WorkerPool;
use crate::task::Task;
use crate::token::{CancelReason, CancelToken};

/// Batch-level summary of a finished [`run_batch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
  /// Every task ran to a `Success` or `Failure`; nothing was cancelled.
  AllCompleted,
  /// At least one task was cancelled, or the batch token was cancelled
  /// explicitly.
  PartiallyCancelled,
  /// The batch token's deadline fired.
  TimedOut,
}

impl BatchStatus {
  /// Derives the batch status from its outcomes and the batch token.
  pub fn of<R>(outcomes: &[Outcome<R>], token: &CancelToken) -> Self {
    let any_cancelled = outcomes.iter().any(Outcome::is_cancelled);
    match token.reason() {
      Some(CancelReason::Timeout) => BatchStatus::TimedOut,
      _ if any_cancelled => BatchStatus::PartiallyCancelled,
      _ => BatchStatus::AllCompleted,
    }
  }
}

/// Runs a batch of tasks on the pool under one shared cancellation scope and
/// returns one terminal [`Outcome`] per task, index-aligned with the input.
///
/// Completion order across workers is nondeterministic; the returned vector
/// is not: index `i` of the output corresponds to index `i` of `tasks`.
///
/// Cancelling `token` mid-batch marks every task that has not started as
/// `Cancelled` without invoking its body — whether it is still waiting to be
/// submitted (a full queue parks the fan-out here) or already queued. Tasks
/// whose bodies are running finish on their own terms; the pool never
/// interrupts them.
pub async fn run_batch<R: Send + 'static>(
  pool: &WorkerPool<R>,
  tasks: Vec<Task<R>>,
  token: &CancelToken,
) -> Vec<Outcome<R>> {
  let total = tasks.len();
  let aggregator = Aggregator::new(total);
  info!(pool_name = %pool.name(), total, "Running batch.");

  let mut in_flight = FuturesUnordered::new();

  for (index, task) in tasks.into_iter().enumerate() {
    if token.is_cancelled() {
      let reason = token.reason().unwrap_or(CancelReason::Explicit);
      trace!(index, ?reason, "Batch cancelled before dispatch; marking task cancelled.");
      aggregator.record(index, Outcome::Cancelled(reason));
      continue;
    }

    // Submission itself can park on a full queue; racing the batch token
    // keeps a cancelled batch from blocking the fan-out.
    let submitted = tokio::select! {
      biased;
      _ = token.cancelled() => None,
      submitted = pool.submit_with_token(task, token.child()) => Some(submitted),
    };

    match submitted {
      None => {
        let reason = token.reason().unwrap_or(CancelReason::Explicit);
        trace!(index, ?reason, "Batch cancelled while submitting; marking task cancelled.");
        aggregator.record(index, Outcome::Cancelled(reason));
      }
      Some(Ok(handle)) => {
        in_flight.push(async move { (index, handle.outcome().await) });
      }
      Some(Err(pool_error)) => {
        debug!(index, error = %pool_error, "Submission failed; recording failure for this slot.");
        aggregator.record(index, Outcome::Failure(Fault::Failed(Box::new(pool_error))));
      }
    }
  }

  // Fan-in: record outcomes as they complete, in whatever order the workers
  // finish.
  while let Some((index, delivered)) = in_flight.next().await {
    let outcome = match delivered {
      Ok(outcome) => outcome,
      Err(pool_error) => Outcome::Failure(Fault::Failed(Box::new(pool_error))),
    };
    aggregator.record(index, outcome);
  }

  debug_assert!(aggregator.is_complete());
  let outcomes = aggregator.collect();
  info!(pool_name = %pool.name(), total, "Batch finished.");
  outcomes
}
