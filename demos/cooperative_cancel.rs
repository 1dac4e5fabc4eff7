use futures_brigade::{run_batch, BatchStatus, CancelToken, ShutdownMode, Task, TaskError, WorkerPool};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Cooperative Cancellation Example ---");

  let pool = WorkerPool::<String>::new(2, 10, Handle::current(), "cooperative_pool");

  // Bodies select on the token, so a cancel cuts them off at the next await
  // point instead of waiting out the full sleep.
  let tasks: Vec<Task<String>> = (0..4)
    .map(|i| {
      Task::new(move |token| async move {
        info!("Task {} starting", i);
        tokio::select! {
          _ = token.cancelled() => {
            info!("Task {} observed cancellation, aborting early", i);
            Err(TaskError::Cancelled)
          }
          _ = tokio::time::sleep(Duration::from_secs(5)) => {
            info!("Task {} ran to completion", i);
            Ok(format!("task_{}_done", i))
          }
        }
      })
    })
    .collect();

  let token = CancelToken::new();
  {
    let token = token.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(300)).await;
      info!("Cancelling the batch token...");
      token.cancel();
    });
  }

  let outcomes = run_batch(&pool, tasks, &token).await;
  for (i, outcome) in outcomes.iter().enumerate() {
    info!("Slot {}: {:?}", i, outcome);
  }
  info!("Batch status: {:?}", BatchStatus::of(&outcomes, &token));

  pool.shutdown(ShutdownMode::Drain).await.expect("Pool shutdown failed");
  info!("--- Cooperative Cancellation Example End ---");
}
