use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use futures::FutureExt;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::error::PoolError;
use crate::events::{event_channel, CompletionEvent, CompletionKind, CompletionNotifier, EventSender};
use crate::handle::TaskHandle;
use crate::outcome::{Fault, Outcome};
use crate::queue::{work_queue, QueueConsumer, QueueProducer};
use crate::task::{next_task_id, QueuedTask, Task, TaskError};
use crate::token::{CancelReason, CancelToken};

/// Defines how the pool behaves upon shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Stops accepting submissions, then waits for queued and in-flight tasks
  /// to finish.
  Drain,
  /// Stops accepting submissions, cancels the tokens of in-flight tasks,
  /// marks still-queued tasks `Cancelled`, and returns without waiting for
  /// running bodies.
  Immediate,
}

/// A fixed-size pool of concurrent task executors fed by a bounded FIFO
/// queue.
///
/// Worker slots are semaphore permits: a single dispatcher loop acquires a
/// permit, dequeues the next task, and spawns its body on the runtime handle
/// with the permit held for the task's duration. At most `workers` bodies run
/// at once; a full queue pushes back on submitters instead of dropping work.
///
/// Cancellation of a running body is cooperative only: the pool hands each
/// body its token and never interrupts execution. A task whose token is
/// already cancelled at dequeue time is marked `Cancelled` without its body
/// ever being invoked.
pub struct WorkerPool<R: Send + 'static> {
  pool_name: Arc<String>,
  workers: usize,
  semaphore: Arc<Semaphore>,
  queue_tx: StdMutex<Option<QueueProducer<R>>>,
  active_tasks: Arc<DashMap<u64, CancelToken>>,
  close_token: CancellationToken,
  abort_token: CancellationToken,
  notifier: Arc<CompletionNotifier>,
  dispatcher_join: StdMutex<Option<JoinHandle<()>>>,
}

impl<R: Send + 'static> WorkerPool<R> {
  pub fn new(workers: usize, queue_capacity: usize, tokio_handle: TokioHandle, pool_name: &str) -> Arc<Self> {
    let workers = workers.max(1);
    let (queue_tx, queue_rx) = work_queue(queue_capacity.max(1));
    let close_token = CancellationToken::new();
    let abort_token = CancellationToken::new();
    let semaphore = Arc::new(Semaphore::new(workers));
    let active_tasks: Arc<DashMap<u64, CancelToken>> = Arc::new(DashMap::new());
    let (event_tx, event_rx) = event_channel();

    let name = Arc::new(pool_name.to_string());
    let notifier = CompletionNotifier::new(event_rx, tokio_handle.clone(), name.clone());
    notifier.start();

    let pool = Arc::new(Self {
      pool_name: name,
      workers,
      semaphore: semaphore.clone(),
      queue_tx: StdMutex::new(Some(queue_tx)),
      active_tasks: active_tasks.clone(),
      close_token,
      abort_token: abort_token.clone(),
      notifier,
      dispatcher_join: StdMutex::new(None),
    });

    let dispatcher_join = tokio_handle.clone().spawn(
      Self::run_dispatcher_loop(
        pool.pool_name.clone(),
        workers,
        semaphore,
        queue_rx,
        tokio_handle,
        active_tasks,
        abort_token,
        event_tx,
      )
      .instrument(info_span!("pool_dispatcher_loop", name = %pool_name)),
    );
    *pool.dispatcher_join.lock().unwrap() = Some(dispatcher_join);

    pool
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  /// The fixed number of worker slots, constant for the pool's lifetime.
  pub fn worker_count(&self) -> usize {
    self.workers
  }

  /// Worker slots not currently executing a task.
  pub fn idle_worker_count(&self) -> usize {
    self.semaphore.available_permits()
  }

  pub fn active_task_count(&self) -> usize {
    self.active_tasks.len()
  }

  /// The current number of tasks waiting in the queue.
  pub fn queued_task_count(&self) -> usize {
    self.queue_tx.lock().unwrap().as_ref().map_or(0, |producer| producer.len())
  }

  /// Registers a handler invoked for every task that reaches a terminal
  /// outcome on this pool.
  pub fn on_completion(&self, handler: impl Fn(CompletionEvent) + Send + Sync + 'static) {
    self.notifier.add_handler(handler);
  }

  /// Submits a task with a fresh cancellation token.
  pub async fn submit(&self, task: Task<R>) -> Result<TaskHandle<R>, PoolError> {
    self.submit_with_token(task, CancelToken::new()).await
  }

  /// Submits a task under a caller-supplied token, letting several tasks
  /// share one cancellation scope (the batch coordinator submits children of
  /// its batch token here).
  ///
  /// Waits for a queue slot when the queue is full.
  pub async fn submit_with_token(&self, task: Task<R>, token: CancelToken) -> Result<TaskHandle<R>, PoolError> {
    if self.close_token.is_cancelled() {
      warn!(pool_name = %*self.pool_name, "Submit: attempted to submit to a pool that is shutting down.");
      return Err(PoolError::PoolShuttingDown);
    }

    let producer = {
      let guard = self.queue_tx.lock().unwrap();
      match guard.as_ref() {
        Some(producer) => producer.clone(),
        None => return Err(PoolError::PoolShuttingDown),
      }
    };

    let task_id = next_task_id();
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let queued = QueuedTask {
      task_id,
      task,
      token: token.clone(),
      outcome_tx: Some(outcome_tx),
    };

    debug!(pool_name = %*self.pool_name, %task_id, "Submitting task to queue.");
    producer.send(queued, &self.close_token).await?;

    Ok(TaskHandle {
      task_id,
      token,
      outcome_rx: Some(outcome_rx),
    })
  }

  /// Shuts the pool down. Idempotent; the first call picks the mode.
  pub async fn shutdown(self: Arc<Self>, mode: ShutdownMode) -> Result<(), PoolError> {
    let already_initiated = self.close_token.is_cancelled();

    if !already_initiated {
      info!(pool_name = %*self.pool_name, ?mode, "Initiating pool shutdown.");
      self.close_token.cancel();
      drop(self.queue_tx.lock().unwrap().take());

      match mode {
        ShutdownMode::Immediate => {
          self.abort_token.cancel();
          let in_flight: Vec<(u64, CancelToken)> = self
            .active_tasks
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
          if in_flight.is_empty() {
            info!(pool_name = %*self.pool_name, "Immediate shutdown: no in-flight tasks to cancel.");
          } else {
            for (task_id, token) in in_flight {
              debug!(pool_name = %*self.pool_name, %task_id, "Cancelling in-flight task token during immediate shutdown.");
              token.cancel();
            }
          }
        }
        ShutdownMode::Drain => {
          info!(pool_name = %*self.pool_name, "Drain shutdown: waiting for queued and in-flight tasks.");
        }
      }
    } else {
      info!(pool_name = %*self.pool_name, "Shutdown already in progress or initiated by another call/Drop.");
    }

    let join = { self.dispatcher_join.lock().unwrap().take() };
    if let Some(handle) = join {
      info!(pool_name = %*self.pool_name, "Waiting for dispatcher loop to join.");
      match handle.await {
        Ok(()) => info!(pool_name = %*self.pool_name, "Dispatcher loop joined."),
        Err(join_error) => {
          error!(pool_name = %*self.pool_name, "Error joining dispatcher loop during shutdown: {:?}", join_error);
        }
      }
    } else {
      trace!(pool_name = %*self.pool_name, "Dispatcher join handle already taken.");
    }

    if mode == ShutdownMode::Drain {
      self.notifier.await_shutdown().await;
    }

    Ok(())
  }

  #[allow(clippy::too_many_arguments)]
  async fn run_dispatcher_loop(
    pool_name: Arc<String>,
    workers: usize,
    semaphore: Arc<Semaphore>,
    mut queue_rx: QueueConsumer<R>,
    tasks_handle: TokioHandle,
    active_tasks: Arc<DashMap<u64, CancelToken>>,
    abort_token: CancellationToken,
    event_tx: EventSender,
  ) {
    info!(name = %*pool_name, "Dispatcher loop started.");

    // `true` means the queue closed normally and in-flight tasks must be
    // awaited before the loop returns; `false` means abort.
    let drained = loop {
      tokio::select! {
        biased;

        _ = abort_token.cancelled() => {
          info!(name = %*pool_name, "Abort signal received. Dispatcher loop terminating.");
          break false;
        }

        permit_acquisition = semaphore.clone().acquire_owned() => {
          let permit = match permit_acquisition {
            Ok(permit) => permit,
            Err(_) => {
              error!(name = %*pool_name, "Semaphore closed. Dispatcher loop exiting.");
              break false;
            }
          };
          trace!(name = %*pool_name, "Acquired worker permit. Available: {}", semaphore.available_permits());

          let (queued, permit_for_task) = tokio::select! {
            biased;
            _ = abort_token.cancelled() => {
              info!(name = %*pool_name, "Abort signal received while waiting for work. Releasing permit.");
              drop(permit);
              break false;
            }
            received = queue_rx.recv() => match received {
              Some(task) => (task, permit),
              None => {
                info!(name = %*pool_name, "Work queue closed and empty. Releasing permit.");
                drop(permit);
                break true;
              }
            }
          };

          if queued.token.is_cancelled() {
            let reason = queued.token.reason().unwrap_or(CancelReason::Explicit);
            debug!(
              name = %*pool_name,
              task_id = queued.task_id,
              ?reason,
              "Dequeued task already cancelled; not dispatching."
            );
            Self::deliver(&pool_name, queued.task_id, queued.outcome_tx, Outcome::Cancelled(reason), &event_tx);
            drop(permit_for_task);
            continue;
          }

          let task_id = queued.task_id;
          let token = queued.token.clone();
          let task = queued.task;
          let outcome_tx = queued.outcome_tx;

          active_tasks.insert(task_id, token.clone());
          debug!(name = %*pool_name, %task_id, "Dequeued task. Spawning with permit.");

          let active_tasks_cleanup = active_tasks.clone();
          let pool_name_for_execution = pool_name.clone();
          let pool_name_for_span = pool_name.clone();
          let events = event_tx.clone();

          tasks_handle.spawn({
            let permit_guard = permit_for_task;
            async move {
              let _local_permit_guard = permit_guard;

              let token_for_body = token.clone();
              let execution = AssertUnwindSafe(async move { task.into_future(token_for_body).await }).catch_unwind();

              let outcome = match execution.await {
                Ok(Ok(value)) => {
                  trace!(pool_name = %*pool_name_for_execution, %task_id, "Task executed successfully.");
                  Outcome::Success(value)
                }
                Ok(Err(TaskError::Cancelled)) => {
                  let reason = token.reason().unwrap_or(CancelReason::Explicit);
                  debug!(pool_name = %*pool_name_for_execution, %task_id, ?reason, "Task aborted after observing its token.");
                  Outcome::Cancelled(reason)
                }
                Ok(Err(TaskError::Other(err))) => {
                  debug!(pool_name = %*pool_name_for_execution, %task_id, error = %err, "Task returned an error.");
                  Outcome::Failure(Fault::Failed(err))
                }
                Err(panic_payload) => {
                  let message = panic_message(panic_payload);
                  error!(pool_name = %*pool_name_for_execution, %task_id, "Task panicked during execution: {}", message);
                  Outcome::Failure(Fault::Panicked(message))
                }
              };

              Self::deliver(&pool_name_for_execution, task_id, outcome_tx, outcome, &events);
            }
            .instrument(info_span!("pool_task", pool_name = %*pool_name_for_span, %task_id))
            .then(move |_| {
              active_tasks_cleanup.remove(&task_id);
              trace!(%task_id, "Task finished processing, removed from active registry.");
              async {}
            })
          });
        }
      }
    };

    if drained {
      // Every queued task has been dispatched; reacquiring the full permit
      // set means every in-flight body has finished.
      match semaphore.acquire_many_owned(workers as u32).await {
        Ok(_all_permits) => {
          info!(name = %*pool_name, "All in-flight tasks finished. Dispatcher loop stopped.");
        }
        Err(_) => {
          error!(name = %*pool_name, "Semaphore closed while waiting for in-flight tasks.");
        }
      }
    } else {
      for queued in queue_rx.drain() {
        let reason = queued.token.reason().unwrap_or(CancelReason::Explicit);
        debug!(name = %*pool_name, task_id = queued.task_id, ?reason, "Marking queued task cancelled at abort.");
        Self::deliver(&pool_name, queued.task_id, queued.outcome_tx, Outcome::Cancelled(reason), &event_tx);
      }
      info!(
        name = %*pool_name,
        "Dispatcher loop stopped. In-flight tasks left to finish on their own: {}",
        active_tasks.len()
      );
    }
  }

  /// Sends the terminal outcome to the handle and emits a completion event.
  fn deliver(
    pool_name: &Arc<String>,
    task_id: u64,
    outcome_tx: Option<oneshot::Sender<Outcome<R>>>,
    outcome: Outcome<R>,
    events: &EventSender,
  ) {
    let kind = CompletionKind::of(&outcome);
    if let Some(tx) = outcome_tx {
      if tx.send(outcome).is_err() {
        warn!(pool_name = %**pool_name, %task_id, "Outcome receiver dropped; task outcome discarded.");
      }
    }
    events.notify(pool_name.clone(), task_id, kind);
  }
}

impl<R: Send + 'static> Drop for WorkerPool<R> {
  fn drop(&mut self) {
    if !self.close_token.is_cancelled() {
      info!(
        pool_name = %*self.pool_name,
        "WorkerPool dropped without explicit shutdown; signalling dispatcher and closing queue."
      );
      self.close_token.cancel();
      if let Ok(mut guard) = self.queue_tx.lock() {
        drop(guard.take());
      }
      // The dispatcher join handle is deliberately not awaited: Drop must not
      // block. The loop drains the queue and exits on its own.
    } else {
      trace!(pool_name = %*self.pool_name, "Drop: shutdown already initiated. No new signals sent.");
    }
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
