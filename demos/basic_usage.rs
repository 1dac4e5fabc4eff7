use futures_brigade::{ShutdownMode, Task, TaskHandle, WorkerPool};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn my_task_fn(id: usize, delay_ms: u64) -> String {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  result
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let pool = WorkerPool::<String>::new(
    2,  // Worker slots
    10, // Queue capacity
    Handle::current(),
    "basic_pool",
  );

  let mut handles: Vec<TaskHandle<String>> = Vec::new();

  for i in 0..5 {
    let task_id: usize = i;
    // Alternate sleep times for variety
    let sleep_duration: u64 = 500 + (i as u64 % 3 * 250);
    let task = Task::new(move |_token| async move { Ok(my_task_fn(task_id, sleep_duration).await) });
    match pool.submit(task).await {
      Ok(handle) => {
        info!("Submitted task {} with handle id {}", task_id, handle.id());
        handles.push(handle);
      }
      Err(e) => {
        tracing::error!("Failed to submit task {}: {:?}", task_id, e);
      }
    }
  }

  info!("All tasks submitted. Awaiting outcomes...");

  for handle in handles {
    let task_id = handle.id();
    match handle.outcome().await {
      Ok(outcome) => info!("Outcome for task {}: {:?}", task_id, outcome),
      Err(e) => info!("Error for task {}: {:?}", task_id, e),
    }
  }

  info!("All task outcomes processed. Shutting down pool.");
  pool
    .shutdown(ShutdownMode::Drain)
    .await
    .expect("Pool shutdown failed");
  info!("Pool shutdown complete.");
  info!("--- Basic Usage Example End ---");
}
