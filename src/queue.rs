use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;
use crate::task::QueuedTask;

/// A bounded FIFO work queue, split into producer and consumer halves.
///
/// Backpressure comes from the bounded channel itself: `send` parks the
/// submitter until a slot frees, it never drops work.
pub(crate) fn work_queue<R: Send + 'static>(capacity: usize) -> (QueueProducer<R>, QueueConsumer<R>) {
  let (tx, rx) = mpsc::channel(capacity.max(1));
  (QueueProducer { tx }, QueueConsumer { rx })
}

/// The producer half. Cloned into each submission site.
pub(crate) struct QueueProducer<R: Send + 'static> {
  tx: mpsc::Sender<QueuedTask<R>>,
}

impl<R: Send + 'static> Clone for QueueProducer<R> {
  fn clone(&self) -> Self {
    Self { tx: self.tx.clone() }
  }
}

impl<R: Send + 'static> QueueProducer<R> {
  /// Sends one task, waiting for a queue slot when the queue is full.
  ///
  /// The wait races the pool's close signal so a blocked submitter cannot
  /// hang across shutdown.
  pub(crate) async fn send(
    &self,
    task: QueuedTask<R>,
    close_token: &CancellationToken,
  ) -> Result<(), PoolError> {
    if close_token.is_cancelled() || self.tx.is_closed() {
      return Err(PoolError::PoolShuttingDown);
    }

    tokio::select! {
      biased;
      _ = close_token.cancelled() => Err(PoolError::PoolShuttingDown),
      sent = self.tx.send(task) => sent.map_err(|_| PoolError::QueueClosed),
    }
  }

  /// Number of tasks currently waiting in the queue.
  pub(crate) fn len(&self) -> usize {
    self.tx.max_capacity() - self.tx.capacity()
  }
}

/// The consumer half. Not `Clone`: a single dispatcher drains it.
pub(crate) struct QueueConsumer<R: Send + 'static> {
  rx: mpsc::Receiver<QueuedTask<R>>,
}

impl<R: Send + 'static> QueueConsumer<R> {
  /// Resolves to `None` once every producer handle is gone and the queue is
  /// empty.
  pub(crate) async fn recv(&mut self) -> Option<QueuedTask<R>> {
    self.rx.recv().await
  }

  /// Non-blocking drain of whatever is left in the queue.
  pub(crate) fn drain(&mut self) -> Vec<QueuedTask<R>> {
    let mut rest = Vec::new();
    loop {
      match self.rx.try_recv() {
        Ok(task) => rest.push(task),
        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
      }
    }
    rest
  }
}
