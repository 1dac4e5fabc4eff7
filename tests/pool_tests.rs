use futures_brigade::{
  CancelReason, CancelToken, CompletionKind, Outcome, PoolError, ShutdownMode, Task, TaskError, WorkerPool,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

fn setup_tracing() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,futures_brigade=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Cooperative task body: polls its token every 10ms while "working" for
// `duration_ms`, then optionally panics or flags completion.
fn create_task(
  task_num: usize,
  duration_ms: u64,
  output_value: String,
  should_panic: bool,
  completion_flag: Option<Arc<AtomicBool>>,
  invocations: Option<Arc<AtomicUsize>>,
) -> Task<String> {
  Task::new(move |token| async move {
    if let Some(counter) = &invocations {
      counter.fetch_add(1, Ordering::SeqCst);
    }

    let check_interval_ms = 10u64;
    let mut elapsed = 0u64;
    while elapsed < duration_ms {
      if token.is_cancelled() {
        tracing::info!("Task {} observed cancellation, aborting.", task_num);
        return Err(TaskError::Cancelled);
      }
      sleep(Duration::from_millis(check_interval_ms)).await;
      elapsed += check_interval_ms;
    }

    if should_panic {
      tracing::info!("Task {} panicking as requested.", task_num);
      panic!("Task {} intentionally panicked!", task_num);
    }

    if let Some(flag) = completion_flag {
      flag.store(true, Ordering::SeqCst);
    }
    tracing::info!("Task {} completed successfully.", task_num);
    Ok(output_value)
  })
}

#[tokio::test]
async fn submit_and_await_basic_task() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(2, 5, tokio::runtime::Handle::current(), "test_pool_basic_submit");

  let task = create_task(1, 50, "task1_done".to_string(), false, None, None);
  let handle = pool.submit(task).await.unwrap();

  let outcome = handle.outcome().await.unwrap();
  assert_eq!(outcome.success(), Some("task1_done".to_string()));

  pool.shutdown(ShutdownMode::Drain).await.unwrap();
}

#[tokio::test]
async fn panicking_task_is_isolated_from_the_pool() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(1, 5, tokio::runtime::Handle::current(), "test_pool_panic_isolation");

  let panic_task = create_task(1, 50, "wont_complete".to_string(), true, None, None);
  let panic_handle = pool.submit(panic_task).await.unwrap();

  match panic_handle.outcome().await.unwrap() {
    Outcome::Failure(fault) => assert!(fault.is_recovered_panic(), "expected a recovered panic, got {fault:?}"),
    other => panic!("expected Failure from a panicking task, got {other:?}"),
  }

  // The pool must keep processing subsequent tasks.
  let normal_task = create_task(2, 50, "task2_done".to_string(), false, None, None);
  let normal_handle = pool.submit(normal_task).await.unwrap();
  assert_eq!(normal_handle.outcome().await.unwrap().success(), Some("task2_done".to_string()));

  pool.shutdown(ShutdownMode::Drain).await.unwrap();
}

#[tokio::test]
async fn cooperative_cancellation_via_handle() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(1, 5, tokio::runtime::Handle::current(), "test_pool_cancel_via_handle");

  let task = create_task(1, 5000, "output_if_not_cancelled".to_string(), false, None, None);
  let handle = pool.submit(task).await.unwrap();

  sleep(Duration::from_millis(50)).await;
  handle.cancel();
  assert!(handle.is_cancel_requested());

  match handle.outcome().await.unwrap() {
    Outcome::Cancelled(CancelReason::Explicit) => {}
    other => panic!("expected Cancelled(Explicit), got {other:?}"),
  }

  pool.shutdown(ShutdownMode::Drain).await.unwrap();
}

#[tokio::test]
async fn non_cooperative_task_finishes_despite_cancel_request() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(1, 5, tokio::runtime::Handle::current(), "test_pool_non_cooperative");

  // This body never looks at its token; a cancel request must not interrupt
  // it. The pool only prevents new dispatch, it never aborts a running body.
  let task = Task::new(move |_token| async move {
    sleep(Duration::from_millis(100)).await;
    Ok("finished_naturally".to_string())
  });
  let handle = pool.submit(task).await.unwrap();

  sleep(Duration::from_millis(20)).await;
  handle.cancel();

  assert_eq!(handle.outcome().await.unwrap().success(), Some("finished_naturally".to_string()));

  pool.shutdown(ShutdownMode::Drain).await.unwrap();
}

#[tokio::test]
async fn cancel_of_a_queued_task_skips_its_body() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(1, 5, tokio::runtime::Handle::current(), "test_pool_cancel_queued");

  let blocker = create_task(1, 200, "blocker_done".to_string(), false, None, None);
  let blocker_handle = pool.submit(blocker).await.unwrap();

  let invocations = Arc::new(AtomicUsize::new(0));
  let queued = create_task(2, 50, "queued_wont_run".to_string(), false, None, Some(invocations.clone()));
  let queued_handle = pool.submit(queued).await.unwrap();

  sleep(Duration::from_millis(30)).await;
  queued_handle.cancel();

  match queued_handle.outcome().await.unwrap() {
    Outcome::Cancelled(CancelReason::Explicit) => {}
    other => panic!("expected Cancelled(Explicit) for the queued task, got {other:?}"),
  }
  assert_eq!(invocations.load(Ordering::SeqCst), 0, "queued task body must never run");

  assert_eq!(blocker_handle.outcome().await.unwrap().success(), Some("blocker_done".to_string()));
  pool.shutdown(ShutdownMode::Drain).await.unwrap();
}

#[tokio::test]
async fn drain_shutdown_completes_queued_tasks() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(1, 5, tokio::runtime::Handle::current(), "test_pool_drain_shutdown");

  let flags: Vec<Arc<AtomicBool>> = (0..3).map(|_| Arc::new(AtomicBool::new(false))).collect();
  let mut handles = Vec::new();
  for (i, flag) in flags.iter().enumerate() {
    let task = create_task(i, 100, format!("task_{i}_done"), false, Some(flag.clone()), None);
    handles.push(pool.submit(task).await.unwrap());
  }

  sleep(Duration::from_millis(30)).await;
  assert_eq!(pool.active_task_count(), 1);
  assert_eq!(pool.queued_task_count(), 2);

  pool.clone().shutdown(ShutdownMode::Drain).await.unwrap();

  for (i, handle) in handles.into_iter().enumerate() {
    assert_eq!(handle.outcome().await.unwrap().success(), Some(format!("task_{i}_done")));
  }
  for flag in &flags {
    assert!(flag.load(Ordering::SeqCst), "drain shutdown must let queued tasks finish");
  }
  assert_eq!(pool.active_task_count(), 0);
}

#[tokio::test]
async fn immediate_shutdown_cancels_active_and_queued_tasks() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(1, 5, tokio::runtime::Handle::current(), "test_pool_immediate_shutdown");

  let active_task = create_task(1, 5000, "active_wont_finish".to_string(), false, None, None);
  let active_handle = pool.submit(active_task).await.unwrap();

  let queued_invocations = Arc::new(AtomicUsize::new(0));
  let queued_task = create_task(2, 50, "queued_wont_run".to_string(), false, None, Some(queued_invocations.clone()));
  let queued_handle = pool.submit(queued_task).await.unwrap();

  sleep(Duration::from_millis(30)).await;
  assert_eq!(pool.active_task_count(), 1);

  let started = Instant::now();
  pool.clone().shutdown(ShutdownMode::Immediate).await.unwrap();
  assert!(
    started.elapsed() < Duration::from_millis(500),
    "immediate shutdown must not wait for running bodies"
  );

  match active_handle.outcome().await.unwrap() {
    Outcome::Cancelled(CancelReason::Explicit) => {}
    other => panic!("expected the active task to abort cooperatively, got {other:?}"),
  }
  match queued_handle.outcome().await.unwrap() {
    Outcome::Cancelled(_) => {}
    other => panic!("expected the queued task to be marked cancelled, got {other:?}"),
  }
  assert_eq!(queued_invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn submit_to_shutting_down_pool_fails() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(1, 1, tokio::runtime::Handle::current(), "test_pool_submit_after_shutdown");

  pool.clone().shutdown(ShutdownMode::Drain).await.unwrap();

  let task = create_task(1, 50, "too_late".to_string(), false, None, None);
  let submit_result = pool.submit(task).await;
  match submit_result {
    Err(PoolError::PoolShuttingDown) => {}
    other => panic!("expected PoolShuttingDown, got {other:?}"),
  }
}

#[tokio::test]
async fn single_worker_executes_in_submission_order() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(1, 5, tokio::runtime::Handle::current(), "test_pool_fifo_order");
  let completion_order = Arc::new(parking_lot::Mutex::new(Vec::new()));

  let mut handles = Vec::new();
  for i in 0..3 {
    let task_num = i + 1;
    let completion_order = completion_order.clone();
    let task = Task::new(move |_token| async move {
      sleep(Duration::from_millis(50)).await;
      completion_order.lock().push(task_num);
      Ok(format!("task_{task_num}_done"))
    });
    handles.push(pool.submit(task).await.unwrap());
  }

  for handle in handles {
    handle.outcome().await.unwrap();
  }

  assert_eq!(*completion_order.lock(), vec![1, 2, 3], "one worker must preserve FIFO order");
  pool.shutdown(ShutdownMode::Drain).await.unwrap();
}

#[tokio::test]
async fn backpressure_blocks_the_submitter_until_a_slot_frees() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(1, 1, tokio::runtime::Handle::current(), "test_pool_backpressure");

  let first = create_task(1, 200, "first_done".to_string(), false, None, None);
  let first_handle = pool.submit(first).await.unwrap();
  sleep(Duration::from_millis(20)).await;

  let second = create_task(2, 20, "second_done".to_string(), false, None, None);
  let second_handle = pool.submit(second).await.unwrap();

  // Worker busy, queue full: the third submission must park, not error.
  let third = create_task(3, 20, "third_done".to_string(), false, None, None);
  let submit_future = pool.submit(third);
  tokio::pin!(submit_future);

  tokio::select! {
    _ = &mut submit_future => panic!("submit should have blocked while the queue was full"),
    _ = sleep(Duration::from_millis(50)) => {}
  }

  // Once the first task finishes a slot frees and the parked submit lands.
  let third_handle = tokio::time::timeout(Duration::from_millis(1000), submit_future)
    .await
    .expect("submit did not unblock after a slot freed")
    .unwrap();

  assert_eq!(first_handle.outcome().await.unwrap().success(), Some("first_done".to_string()));
  assert_eq!(second_handle.outcome().await.unwrap().success(), Some("second_done".to_string()));
  assert_eq!(third_handle.outcome().await.unwrap().success(), Some("third_done".to_string()));

  pool.clone().shutdown(ShutdownMode::Drain).await.unwrap();
}

#[tokio::test]
async fn completion_events_reach_registered_handlers() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(2, 5, tokio::runtime::Handle::current(), "test_pool_completion_events");

  let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
  {
    let seen = seen.clone();
    pool.on_completion(move |event| {
      seen.lock().push((event.task_id, event.kind));
    });
  }

  let ok_task = create_task(1, 30, "ok_done".to_string(), false, None, None);
  let ok_handle = pool.submit(ok_task).await.unwrap();

  let panic_task = create_task(2, 30, "panic_never".to_string(), true, None, None);
  let panic_handle = pool.submit(panic_task).await.unwrap();

  let cancelled_token = CancelToken::new();
  cancelled_token.cancel();
  let cancelled_task = create_task(3, 30, "cancelled_never".to_string(), false, None, None);
  let cancelled_handle = pool.submit_with_token(cancelled_task, cancelled_token).await.unwrap();

  let ok_id = ok_handle.id();
  let panic_id = panic_handle.id();
  let cancelled_id = cancelled_handle.id();

  ok_handle.outcome().await.unwrap();
  panic_handle.outcome().await.unwrap();
  cancelled_handle.outcome().await.unwrap();

  pool.clone().shutdown(ShutdownMode::Drain).await.unwrap();
  // Handler invocations are spawned; give them a beat to land.
  sleep(Duration::from_millis(100)).await;

  let events = seen.lock();
  assert!(events.contains(&(ok_id, CompletionKind::Success)));
  assert!(events.contains(&(panic_id, CompletionKind::Panicked)));
  assert!(events.contains(&(cancelled_id, CompletionKind::Cancelled)));
}

#[tokio::test]
async fn panicking_completion_handler_does_not_break_delivery() {
  setup_tracing();
  let pool = WorkerPool::<String>::new(1, 5, tokio::runtime::Handle::current(), "test_pool_handler_panic");

  let delivered = Arc::new(AtomicUsize::new(0));
  pool.on_completion(|_event| panic!("handler blows up"));
  {
    let delivered = delivered.clone();
    pool.on_completion(move |_event| {
      delivered.fetch_add(1, Ordering::SeqCst);
    });
  }

  for i in 0..3 {
    let task = create_task(i, 20, format!("task_{i}_done"), false, None, None);
    pool.submit(task).await.unwrap().outcome().await.unwrap();
  }

  pool.clone().shutdown(ShutdownMode::Drain).await.unwrap();
  sleep(Duration::from_millis(100)).await;

  assert_eq!(delivered.load(Ordering::SeqCst), 3, "well-behaved handler must see every event");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn jittered_load_completes_every_task() {
  use rand::Rng;

  setup_tracing();
  let pool = WorkerPool::<String>::new(4, 8, tokio::runtime::Handle::current(), "test_pool_jitter");

  let durations: Vec<u64> = {
    let mut rng = rand::rng();
    (0..20).map(|_| rng.random_range(10..60)).collect()
  };

  let mut handles = Vec::new();
  for (i, duration_ms) in durations.into_iter().enumerate() {
    let task = create_task(i, duration_ms, format!("task_{i}_done"), false, None, None);
    handles.push(pool.submit(task).await.unwrap());
  }

  for (i, handle) in handles.into_iter().enumerate() {
    assert_eq!(handle.outcome().await.unwrap().success(), Some(format!("task_{i}_done")));
  }

  pool.shutdown(ShutdownMode::Drain).await.unwrap();
}
