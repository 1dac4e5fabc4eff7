use futures_brigade::{ShutdownMode, Task, TaskError, TaskHandle, WorkerPool};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

fn work_task(id: usize, duration_ms: u64) -> Task<String> {
  Task::new(move |token| async move {
    info!("Task {} starting (will run for {}ms)", id, duration_ms);
    let mut elapsed = 0u64;
    while elapsed < duration_ms {
      if token.is_cancelled() {
        info!("Task {} observed cancellation, aborting", id);
        return Err(TaskError::Cancelled);
      }
      tokio::time::sleep(Duration::from_millis(25)).await;
      elapsed += 25;
    }
    info!("Task {} finished", id);
    Ok(format!("Task {} finished after {}ms", id, duration_ms))
  })
}

async fn submit_five(pool: &std::sync::Arc<WorkerPool<String>>) -> Vec<TaskHandle<String>> {
  let mut handles = Vec::new();
  for i in 0..5 {
    match pool.submit(work_task(i, 2000)).await {
      Ok(handle) => {
        info!("Submitted task {} (handle id {})", i, handle.id());
        handles.push(handle);
      }
      Err(e) => tracing::error!("Failed to submit task {}: {:?}", i, e),
    }
  }
  handles
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Drain Shutdown ---");
  {
    let pool = WorkerPool::<String>::new(2, 10, Handle::current(), "drain_pool");
    let handles = submit_five(&pool).await;
    info!(
      "Queued: {}, active: {}. Initiating DRAIN shutdown...",
      pool.queued_task_count(),
      pool.active_task_count()
    );

    // Drain waits for queued and in-flight tasks alike.
    pool.clone().shutdown(ShutdownMode::Drain).await.expect("drain shutdown failed");
    info!("Drain shutdown returned; every task has an outcome.");

    for handle in handles {
      let id = handle.id();
      info!("Task {} outcome: {:?}", id, handle.outcome().await);
    }
  }

  info!("--- Immediate Shutdown ---");
  {
    let pool = WorkerPool::<String>::new(2, 10, Handle::current(), "immediate_pool");
    let handles = submit_five(&pool).await;
    tokio::time::sleep(Duration::from_millis(100)).await; // Let two tasks start

    // Immediate cancels in-flight tokens and marks queued tasks cancelled.
    pool.clone().shutdown(ShutdownMode::Immediate).await.expect("immediate shutdown failed");
    info!("Immediate shutdown returned without waiting for running bodies.");

    // Try submitting after shutdown (should fail)
    match pool.submit(work_task(99, 100)).await {
      Ok(_) => tracing::error!("LATE SUBMISSION SUCCEEDED (UNEXPECTED!)"),
      Err(e) => info!("Late submission correctly failed: {:?}", e),
    }

    for handle in handles {
      let id = handle.id();
      info!("Task {} outcome: {:?}", id, handle.outcome().await);
    }
  }

  info!("--- Shutdown Modes Example End ---");
}
