//! The capability table a benchmarking harness drives an engine through.

use std::{pin::Pin, ptr::NonNull, time::Duration};

use crate::{EngineError, IoUnit};

/// Result of handing one unit to an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
  /// The unit finished during submission. It is reported by the next
  /// `getevents` without waiting.
  Completed,
  /// The unit is in flight and will be reported once it completes.
  Queued,
}

/// Operations a harness calls on an I/O engine.
///
/// Construction (the harness's `init` hook) is the implementor's own
/// constructor, and `cleanup` consumes the engine.
///
/// The call sequence for a unit is `prep`, `queue`, then one or more
/// `getevents` until the unit shows up through `event`.
pub trait IoEngineOps {
  /// Engine name as the harness lists it.
  fn name(&self) -> &'static str;

  /// Prepares `unit` for submission. Performs no I/O.
  fn prep(&mut self, unit: Pin<&mut IoUnit>);

  /// Submits a prepared unit.
  ///
  /// # Safety
  /// When this returns [`QueueStatus::Queued`], the unit and its buffer must
  /// stay alive and untouched until the unit is returned by [`event`]. The
  /// caller must not have more units outstanding than the engine's depth.
  ///
  /// [`event`]: IoEngineOps::event
  unsafe fn queue(
    &mut self,
    unit: Pin<&mut IoUnit>,
  ) -> Result<QueueStatus, EngineError>;

  /// Collects at least `min` completed units, blocking if needed, and
  /// returns how many were collected.
  ///
  /// `max` and `timeout` are part of the harness interface; implementations
  /// may ignore them.
  fn getevents(
    &mut self,
    min: usize,
    max: usize,
    timeout: Option<Duration>,
  ) -> Result<usize, EngineError>;

  /// The `index`th unit of the last successful `getevents`.
  ///
  /// # Panics
  /// If `index` is not below the count that call returned.
  fn event(&self, index: usize) -> NonNull<IoUnit>;

  /// Tears the engine down.
  fn cleanup(self)
  where
    Self: Sized;
}
