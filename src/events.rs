use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, Once};
use std::time::SystemTime;

use parking_lot::RwLock;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::outcome::{Fault, Outcome};

/// Terminal state of a task, as reported to completion handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
  Success,
  Failure,
  Panicked,
  Cancelled,
}

impl CompletionKind {
  pub(crate) fn of<R>(outcome: &Outcome<R>) -> Self {
    match outcome {
      Outcome::Success(_) => CompletionKind::Success,
      Outcome::Failure(Fault::Panicked(_)) => CompletionKind::Panicked,
      Outcome::Failure(_) => CompletionKind::Failure,
      Outcome::Cancelled(_) => CompletionKind::Cancelled,
    }
  }
}

/// Delivered to every registered completion handler when a task reaches a
/// terminal outcome.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
  pub task_id: u64,
  pub pool_name: Arc<String>,
  pub kind: CompletionKind,
  pub completed_at: SystemTime,
}

/// The sending side of the completion event stream. One clone travels with
/// every dispatched task.
#[derive(Clone)]
pub(crate) struct EventSender {
  tx: mpsc::UnboundedSender<CompletionEvent>,
}

impl EventSender {
  pub(crate) fn notify(&self, pool_name: Arc<String>, task_id: u64, kind: CompletionKind) {
    let event = CompletionEvent {
      task_id,
      pool_name,
      kind,
      completed_at: SystemTime::now(),
    };
    if self.tx.send(event).is_err() {
      trace!(%task_id, "Completion event dropped; event worker already stopped.");
    }
  }
}

pub(crate) fn event_channel() -> (EventSender, UnboundedReceiver<CompletionEvent>) {
  let (tx, rx) = mpsc::unbounded_channel();
  (EventSender { tx }, rx)
}

type HandlerList = Arc<RwLock<Vec<Arc<dyn Fn(CompletionEvent) + Send + Sync + 'static>>>>;

struct NotifierInit {
  rx: Option<UnboundedReceiver<CompletionEvent>>,
  tokio_handle: TokioHandle,
  pool_name: Arc<String>,
  worker_join: Option<JoinHandle<()>>,
}

/// Fans completion events out to registered handlers on a dedicated worker.
///
/// The worker starts with the pool and drains the event channel until every
/// sender is gone, so events never pile up while nobody listens; with no
/// handlers registered an event is dropped on receipt.
pub(crate) struct CompletionNotifier {
  handlers: HandlerList,
  init_once: Once,
  init_state: StdMutex<NotifierInit>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let handler_count = self.handlers.try_read().map_or(0, |guard| guard.len());
    f.debug_struct("CompletionNotifier")
      .field("handler_count", &handler_count)
      .field("started", &self.init_once.is_completed())
      .finish_non_exhaustive()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(
    rx: UnboundedReceiver<CompletionEvent>,
    tokio_handle: TokioHandle,
    pool_name: Arc<String>,
  ) -> Arc<Self> {
    Arc::new(Self {
      handlers: Arc::new(RwLock::new(Vec::new())),
      init_once: Once::new(),
      init_state: StdMutex::new(NotifierInit {
        rx: Some(rx),
        tokio_handle,
        pool_name,
        worker_join: None,
      }),
    })
  }

  /// Starts the event worker. Idempotent.
  pub(crate) fn start(&self) {
    self.init_once.call_once(|| {
      let mut state = self.init_state.lock().unwrap();
      match state.rx.take() {
        Some(rx) => {
          info!(pool_name = %*state.pool_name, "Starting completion event worker.");
          let handlers = self.handlers.clone();
          let handler_handle = state.tokio_handle.clone();
          let join = state.tokio_handle.spawn(
            Self::run_event_loop(rx, handlers, handler_handle)
              .instrument(info_span!("completion_event_loop", pool_name = %*state.pool_name)),
          );
          state.worker_join = Some(join);
        }
        None => {
          warn!(pool_name = %*state.pool_name, "Event worker receiver already taken; worker not started.");
        }
      }
    });
  }

  pub(crate) fn add_handler(&self, handler: impl Fn(CompletionEvent) + Send + Sync + 'static) {
    self.start();
    let mut handlers = self.handlers.write();
    handlers.push(Arc::new(handler));
    debug!("Registered completion handler. Total handlers: {}", handlers.len());
  }

  async fn run_event_loop(
    mut rx: UnboundedReceiver<CompletionEvent>,
    handlers: HandlerList,
    handler_handle: TokioHandle,
  ) {
    info!("Completion event worker started; runs until every event sender is gone.");

    while let Some(event) = rx.recv().await {
      let snapshot: Vec<_> = {
        let guard = handlers.read();
        if guard.is_empty() {
          trace!(task_id = %event.task_id, "No completion handlers registered, dropping event.");
          continue;
        }
        guard.iter().cloned().collect()
      };

      debug!(
        task_id = %event.task_id,
        "Dispatching completion event to {} handlers.",
        snapshot.len()
      );

      for handler in snapshot {
        let event = event.clone();
        handler_handle.spawn(async move {
          let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event.clone())));
          if result.is_err() {
            error!(
              task_id = %event.task_id,
              pool_name = %*event.pool_name,
              "A completion handler panicked during execution."
            );
          }
        });
      }
    }

    info!("Completion event worker stopped (event channel closed and drained).");
  }

  pub(crate) async fn await_shutdown(&self) {
    let (join, pool_name) = {
      let mut state = self.init_state.lock().unwrap();
      (state.worker_join.take(), state.pool_name.clone())
    };

    if let Some(join) = join {
      info!(pool_name = %*pool_name, "Waiting for completion event worker to join.");
      if let Err(join_error) = join.await {
        error!(pool_name = %*pool_name, "Error joining completion event worker: {:?}", join_error);
      }
    } else {
      trace!(pool_name = %*pool_name, "Event worker not started or already joined.");
    }
  }
}
