use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::outcome::Outcome;

/// Collects one outcome per submission index, preserving submission order no
/// matter the completion order.
///
/// Writes are exactly-once per index. Writing an index twice, writing out of
/// range, or collecting before every index is recorded are contract
/// violations, not runtime conditions, and panic.
pub struct Aggregator<R> {
  total: usize,
  slots: Mutex<Vec<Option<Outcome<R>>>>,
  recorded: AtomicUsize,
}

impl<R> Aggregator<R> {
  /// Pre-sizes storage for `total` outcomes.
  pub fn new(total: usize) -> Self {
    let mut slots = Vec::with_capacity(total);
    slots.resize_with(total, || None);
    Self {
      total,
      slots: Mutex::new(slots),
      recorded: AtomicUsize::new(0),
    }
  }

  /// Stores `outcome` at `index`.
  ///
  /// # Panics
  /// If `index` is out of range or already holds an outcome.
  pub fn record(&self, index: usize, outcome: Outcome<R>) {
    let mut slots = self.slots.lock();
    let slot = match slots.get_mut(index) {
      Some(slot) => slot,
      None => panic!("outcome index {} out of range for batch of {}", index, self.total),
    };
    if slot.is_some() {
      panic!("outcome index {} recorded twice", index);
    }
    *slot = Some(outcome);
    self.recorded.fetch_add(1, Ordering::Release);
  }

  /// Number of indices recorded so far.
  pub fn recorded(&self) -> usize {
    self.recorded.load(Ordering::Acquire)
  }

  /// The batch size this aggregator was created for.
  pub fn total(&self) -> usize {
    self.total
  }

  /// True once every index holds an outcome.
  pub fn is_complete(&self) -> bool {
    self.recorded() == self.total
  }

  /// Consumes the aggregator and returns the outcomes in submission order.
  ///
  /// # Panics
  /// If any index is still unrecorded.
  pub fn collect(self) -> Vec<Outcome<R>> {
    assert!(
      self.is_complete(),
      "collect() called before every outcome was recorded ({}/{} recorded)",
      self.recorded(),
      self.total
    );
    self
      .slots
      .into_inner()
      .into_iter()
      .map(|slot| slot.expect("complete aggregator had an empty slot"))
      .collect()
  }
}

impl<R> fmt::Debug for Aggregator<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Aggregator")
      .field("total", &self.total)
      .field("recorded", &self.recorded())
      .finish_non_exhaustive()
  }
}
