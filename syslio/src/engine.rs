//! The `syslet-rw` engine.
//!
//! Units are executed through a [`Facility`]. A unit that completes during
//! submission goes straight into the harvest accumulator; one that detaches
//! is published on the completion ring later, and `getevents` drains the ring
//! behind it. Synchronous completions therefore always precede ring
//! completions within one harvest.

use std::{io, mem, pin::Pin, ptr::NonNull, sync::Arc, time::Duration};

use syslio_atom::{
  AtomPtr, CompletionRing, Exec, Facility, RingCursor, ThreadedConfig,
  ThreadedFacility,
};

use crate::{
  EngineConfig, EngineError, IoEngineOps, IoUnit, QueueStatus, prep,
};

/// Engine name reported to the harness.
pub const ENGINE_NAME: &str = "syslet-rw";

/// The `syslet-rw` engine over facility `F`. One instance per harness thread.
pub struct SysletEngine<F: Facility> {
  facility: F,
  /// `None` once torn down.
  handle: Option<F::Handle>,
  ring: Arc<CompletionRing>,
  cursor: RingCursor,

  /// Completed units for the harvest in progress.
  events: Vec<NonNull<IoUnit>>,
  /// Units returned by the last successful harvest.
  batch: Vec<NonNull<IoUnit>>,
  in_flight: usize,
  last_error: Option<i32>,
}

impl<F: Facility> std::fmt::Debug for SysletEngine<F> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SysletEngine")
      .field("ring", &self.ring)
      .field("cursor", &self.cursor)
      .field("pending", &self.events.len())
      .field("batch", &self.batch.len())
      .field("in_flight", &self.in_flight)
      .field("last_error", &self.last_error)
      .finish_non_exhaustive()
  }
}

impl SysletEngine<ThreadedFacility> {
  /// An engine backed by the threaded facility with default tuning.
  pub fn threaded(config: &EngineConfig) -> Result<Self, EngineError> {
    Self::init(config, ThreadedFacility::new(ThreadedConfig::default()))
  }
}

impl<F: Facility> SysletEngine<F> {
  /// Allocates the completion ring and registers it with `facility`.
  ///
  /// A facility that refuses registration yields
  /// [`EngineError::Unavailable`]; nothing is kept alive in that case.
  pub fn init(config: &EngineConfig, facility: F) -> Result<Self, EngineError> {
    let depth = config.validate()?.get();
    let ring = Arc::new(CompletionRing::with_capacity(depth));

    let handle = match facility.register(Arc::clone(&ring)) {
      Ok(handle) => handle,
      Err(source) => {
        tracing::warn!(error = %source, "syslet likely not supported");
        return Err(EngineError::Unavailable { source });
      }
    };

    tracing::debug!(
      iodepth = depth,
      ring_bytes = ring.size_bytes(),
      "syslet engine initialized"
    );
    Ok(Self {
      facility,
      handle: Some(handle),
      ring,
      cursor: RingCursor::default(),
      events: Vec::with_capacity(depth),
      batch: Vec::with_capacity(depth),
      in_flight: 0,
      last_error: None,
    })
  }

  pub fn facility(&self) -> &F {
    &self.facility
  }

  /// Ring capacity, equal to the configured depth.
  pub fn capacity(&self) -> usize {
    self.ring.capacity()
  }

  /// Units queued asynchronously and not yet harvested.
  pub fn in_flight(&self) -> usize {
    self.in_flight
  }

  /// Completed units waiting for the next `getevents`.
  pub fn pending(&self) -> usize {
    self.events.len()
  }

  /// The most recent per-request failure.
  pub fn last_error(&self) -> Option<io::Error> {
    self.last_error.map(io::Error::from_raw_os_error)
  }

  fn handle(&self) -> Result<&F::Handle, EngineError> {
    self.handle.as_ref().ok_or_else(|| EngineError::Submit {
      source: io::Error::new(io::ErrorKind::NotConnected, "engine torn down"),
    })
  }

  /// Records `ret` on a finished unit and queues it for the harvest.
  fn complete(&mut self, unit: &mut IoUnit, ret: i64) {
    unit.set_result(ret);
    if unit.error() != 0 {
      tracing::warn!(
        fd = unit.fd(),
        ddir = ?unit.ddir(),
        offset = unit.offset(),
        errno = unit.error(),
        "syslet request failed"
      );
      self.last_error = Some(unit.error());
    }
    self.events.push(NonNull::from(unit));
  }

  /// Moves every published atom into the accumulator, in ring order.
  fn reap(&mut self) -> usize {
    let mut reaped = 0;
    while let Some(atom) = self.ring.take(&mut self.cursor) {
      // SAFETY: the unit was pinned and kept alive by the caller of `queue`
      // until it is harvested, which is now.
      let atom = unsafe { atom.as_ref() };
      let unit = unsafe { &mut *atom.private().cast::<IoUnit>() };
      let ret = unsafe { atom.result() };

      debug_assert!(self.in_flight > 0, "ring published an unknown atom");
      self.in_flight = self.in_flight.saturating_sub(1);
      self.complete(unit, ret);
      reaped += 1;
    }

    if reaped > 0 {
      tracing::trace!(reaped, in_flight = self.in_flight, "drained ring");
    }
    reaped
  }

  fn teardown(&mut self) {
    let Some(handle) = self.handle.take() else {
      return;
    };
    if let Err(err) = self.facility.unregister(handle) {
      tracing::warn!(error = %err, "failed to unregister completion ring");
    }
    tracing::debug!(in_flight = self.in_flight, "syslet engine torn down");
  }
}

impl<F: Facility> IoEngineOps for SysletEngine<F> {
  fn name(&self) -> &'static str {
    ENGINE_NAME
  }

  fn prep(&mut self, unit: Pin<&mut IoUnit>) {
    prep::prep(unit);
  }

  /// # Panics
  /// If as many units as the ring holds are already in flight.
  unsafe fn queue(
    &mut self,
    unit: Pin<&mut IoUnit>,
  ) -> Result<QueueStatus, EngineError> {
    assert!(
      self.in_flight < self.ring.capacity(),
      "syslet ring overrun: {} units already in flight with iodepth {}",
      self.in_flight,
      self.ring.capacity()
    );

    // SAFETY: the unit is only updated in place.
    let unit = unsafe { unit.get_unchecked_mut() };
    let atom = AtomPtr::from(&mut unit.atom);
    let handle = self.handle()?;

    match unsafe { self.facility.exec(handle, atom) } {
      Ok(Exec::Completed) => {
        // SAFETY: the facility stored the result through the atom.
        let ret = unsafe { unit.atom.result() };
        self.complete(unit, ret);
        Ok(QueueStatus::Completed)
      }
      Ok(Exec::Queued) => {
        self.in_flight += 1;
        Ok(QueueStatus::Queued)
      }
      Err(source) => Err(EngineError::Submit { source }),
    }
  }

  /// Harvests at least `min` units.
  ///
  /// `max` and `timeout` are not enforced: every ready unit is returned and
  /// the call blocks until `min` are available. A failed wait fails the whole
  /// call; units collected so far are returned by the next call instead.
  fn getevents(
    &mut self,
    min: usize,
    _max: usize,
    _timeout: Option<Duration>,
  ) -> Result<usize, EngineError> {
    loop {
      self.reap();

      if self.events.len() >= min {
        mem::swap(&mut self.batch, &mut self.events);
        self.events.clear();
        return Ok(self.batch.len());
      }

      let want = min - self.events.len();
      tracing::trace!(want, in_flight = self.in_flight, "waiting for completions");
      let handle = self.handle()?;
      self
        .facility
        .wait(handle, want)
        .map_err(|source| EngineError::Wait { source })?;
    }
  }

  fn event(&self, index: usize) -> NonNull<IoUnit> {
    self.batch[index]
  }

  fn cleanup(mut self) {
    self.teardown();
  }
}

impl<F: Facility> Drop for SysletEngine<F> {
  fn drop(&mut self) {
    self.teardown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use syslio_atom::{Outcome, SimFacility, Unsupported};

  fn engine(depth: usize, sim: &SimFacility) -> SysletEngine<SimFacility> {
    SysletEngine::init(&EngineConfig::new().iodepth(depth), sim.clone())
      .unwrap()
  }

  fn submit(
    engine: &mut SysletEngine<SimFacility>,
    unit: &mut Pin<Box<IoUnit>>,
  ) -> QueueStatus {
    engine.prep(unit.as_mut());
    unsafe { engine.queue(unit.as_mut()) }.unwrap()
  }

  #[test]
  fn test_name() {
    let sim = SimFacility::new();
    assert_eq!(engine(1, &sim).name(), "syslet-rw");
  }

  #[test]
  fn test_zero_depth_is_rejected_before_registration() {
    let sim = SimFacility::new();
    let err =
      SysletEngine::init(&EngineConfig::new().iodepth(0), sim.clone())
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig { .. }));
    assert_eq!(sim.live_registrations(), 0);
  }

  #[test]
  fn test_unsupported_facility_is_unavailable() {
    let err =
      SysletEngine::init(&EngineConfig::default(), Unsupported).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOSYS));
    assert!(matches!(err, EngineError::Unavailable { .. }));
  }

  #[test]
  fn test_sync_completion_skips_wait() {
    let sim = SimFacility::new();
    let mut engine = engine(2, &sim);
    let mut unit = Box::pin(IoUnit::read(3, 64, 0));

    assert_eq!(submit(&mut engine, &mut unit), QueueStatus::Completed);
    assert_eq!(engine.pending(), 1);
    assert_eq!(engine.in_flight(), 0);

    assert_eq!(engine.getevents(1, 2, None).unwrap(), 1);
    assert_eq!(sim.wait_count(), 0);
    assert_eq!(engine.event(0).as_ptr().cast_const(), &*unit as *const IoUnit);
    assert_eq!(unit.resid(), 0);
  }

  #[test]
  fn test_failed_sync_completion_sets_last_error() {
    let sim = SimFacility::new();
    sim.push(Outcome::Sync(-(libc::EIO as i64)));
    let mut engine = engine(2, &sim);
    let mut unit = Box::pin(IoUnit::write(3, vec![0; 8], 0));

    assert_eq!(submit(&mut engine, &mut unit), QueueStatus::Completed);
    assert_eq!(unit.error(), libc::EIO);
    assert_eq!(unit.resid(), 8);
    assert_eq!(engine.last_error().unwrap().raw_os_error(), Some(libc::EIO));
    assert_eq!(engine.getevents(1, 1, None).unwrap(), 1);
  }

  #[test]
  fn test_async_completion_is_reaped() {
    let sim = SimFacility::new();
    sim.push(Outcome::Async(-(libc::ENOSPC as i64)));
    let mut engine = engine(2, &sim);
    let mut unit = Box::pin(IoUnit::write(3, vec![0; 8], 0));

    assert_eq!(submit(&mut engine, &mut unit), QueueStatus::Queued);
    assert_eq!(engine.in_flight(), 1);
    assert_eq!(engine.getevents(0, 2, None).unwrap(), 0);

    sim.release_all();
    assert_eq!(engine.getevents(1, 2, None).unwrap(), 1);
    assert_eq!(engine.in_flight(), 0);
    assert_eq!(unit.error(), libc::ENOSPC);
    assert_eq!(engine.last_error().unwrap().raw_os_error(), Some(libc::ENOSPC));
  }

  #[test]
  #[should_panic(expected = "overrun")]
  fn test_queue_beyond_depth_panics() {
    let sim = SimFacility::new();
    sim.script([Outcome::Async(0), Outcome::Async(0)]);
    let mut engine = engine(1, &sim);
    let mut first = Box::pin(IoUnit::sync(3));
    let mut second = Box::pin(IoUnit::sync(3));

    submit(&mut engine, &mut first);
    submit(&mut engine, &mut second);
  }

  #[test]
  fn test_cleanup_and_drop_unregister_once() {
    let sim = SimFacility::new();
    engine(1, &sim).cleanup();
    assert_eq!(sim.live_registrations(), 0);

    drop(engine(1, &sim));
    assert_eq!(sim.live_registrations(), 0);
  }

  #[test]
  fn test_unregister_failure_is_not_fatal() {
    let sim = SimFacility::new();
    sim.fail_unregister(libc::EBUSY);
    engine(1, &sim).cleanup();
    assert_eq!(sim.live_registrations(), 0);
  }
}
