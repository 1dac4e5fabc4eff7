use futures_brigade::{run_batch, BatchStatus, CancelToken, ShutdownMode, Task, WorkerPool};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Batch Timeout Example ---");

  let pool = WorkerPool::<usize>::new(3, 16, Handle::current(), "batch_timeout_pool");

  // Ten slow tasks against a 150ms batch deadline: the three in-flight bodies
  // finish naturally, everything still queued is marked cancelled without
  // ever starting.
  let tasks: Vec<Task<usize>> = (0..10)
    .map(|i| {
      Task::new(move |_token| async move {
        info!("Task {} starting (600ms of work)", i);
        tokio::time::sleep(Duration::from_millis(600)).await;
        info!("Task {} finished", i);
        Ok(i)
      })
    })
    .collect();

  let token = CancelToken::with_timeout(Duration::from_millis(150));
  let outcomes = run_batch(&pool, tasks, &token).await;

  for (i, outcome) in outcomes.iter().enumerate() {
    info!("Slot {}: {:?}", i, outcome);
  }

  let successes = outcomes.iter().filter(|o| o.is_success()).count();
  let cancelled = outcomes.iter().filter(|o| o.is_cancelled()).count();
  info!(
    "Batch status: {:?} ({} succeeded, {} cancelled)",
    BatchStatus::of(&outcomes, &token),
    successes,
    cancelled
  );

  pool.shutdown(ShutdownMode::Drain).await.expect("Pool shutdown failed");
  info!("--- Batch Timeout Example End ---");
}
