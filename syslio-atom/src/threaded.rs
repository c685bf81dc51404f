//! Syslet semantics emulated in user space.
//!
//! `exec` first tries the call inline without blocking (`RWF_NOWAIT` where
//! available). If that would block, the atom is sent to a pool of worker
//! threads owned by the registration; a worker runs the call to completion,
//! stores the result and publishes the atom on the ring.

use std::{
  io,
  num::NonZeroUsize,
  sync::Arc,
  thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};

use crate::{
  atom::AtomPtr,
  facility::{Exec, Facility},
  ring::CompletionRing,
};

/// Tuning for [`ThreadedFacility`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadedConfig {
  workers: NonZeroUsize,
  nowait: bool,
}

impl Default for ThreadedConfig {
  fn default() -> Self {
    Self {
      workers: thread::available_parallelism()
        .unwrap_or(NonZeroUsize::MIN.saturating_add(3)),
      nowait: true,
    }
  }
}

impl ThreadedConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of worker threads spawned per registration. `0` keeps the
  /// default (one per available CPU).
  pub fn workers(mut self, workers: usize) -> Self {
    if let Some(workers) = NonZeroUsize::new(workers) {
      self.workers = workers;
    }
    self
  }

  /// Whether `exec` may complete reads and writes inline.
  pub fn nowait(mut self, nowait: bool) -> Self {
    self.nowait = nowait;
    self
  }

  pub fn worker_count(&self) -> usize {
    self.workers.get()
  }
}

/// Facility that runs atoms inline when they cannot block, on a worker pool
/// otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadedFacility {
  config: ThreadedConfig,
}

/// One registration: the ring plus the worker pool publishing on it.
pub struct ThreadedHandle {
  ring: Arc<CompletionRing>,
  work_tx: Sender<AtomPtr>,
  workers: Vec<JoinHandle<()>>,
}

impl ThreadedFacility {
  pub fn new(config: ThreadedConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &ThreadedConfig {
    &self.config
  }
}

fn worker_loop(work_rx: Receiver<AtomPtr>, ring: Arc<CompletionRing>) {
  for atom in work_rx.iter() {
    // SAFETY: the submitter keeps the atom alive until it is harvested.
    let atom_ref = unsafe { atom.as_ref() };
    let ret = unsafe { atom_ref.run_blocking() };
    unsafe { atom_ref.complete(ret) };
    tracing::trace!(ret, opcode = ?atom_ref.opcode(), "worker completed atom");
    ring.publish(atom);
  }
}

impl Facility for ThreadedFacility {
  type Handle = ThreadedHandle;

  fn register(&self, ring: Arc<CompletionRing>) -> io::Result<ThreadedHandle> {
    let (work_tx, work_rx) = crossbeam_channel::unbounded::<AtomPtr>();
    let mut workers = Vec::with_capacity(self.config.worker_count());

    for worker_id in 0..self.config.worker_count() {
      let work_rx = work_rx.clone();
      let ring = Arc::clone(&ring);

      let spawned = thread::Builder::new()
        .name(format!("syslio-worker-{worker_id}"))
        .spawn(move || worker_loop(work_rx, ring));

      match spawned {
        Ok(handle) => workers.push(handle),
        Err(err) => {
          // Let the workers that did start exit before failing.
          drop(work_tx);
          for worker in workers {
            let _ = worker.join();
          }
          return Err(err);
        }
      }
    }

    tracing::debug!(
      workers = workers.len(),
      capacity = ring.capacity(),
      "registered completion ring"
    );
    Ok(ThreadedHandle { ring, work_tx, workers })
  }

  fn unregister(&self, handle: ThreadedHandle) -> io::Result<()> {
    let ThreadedHandle { ring, work_tx, workers } = handle;

    // Closing the channel lets workers finish queued atoms, then exit.
    drop(work_tx);
    let mut panicked = 0;
    for worker in workers {
      if worker.join().is_err() {
        panicked += 1;
      }
    }
    ring.close();

    if panicked > 0 {
      return Err(io::Error::other(format!("{panicked} worker(s) panicked")));
    }
    Ok(())
  }

  unsafe fn exec(
    &self,
    handle: &ThreadedHandle,
    atom: AtomPtr,
  ) -> io::Result<Exec> {
    if self.config.nowait {
      let atom_ref = unsafe { atom.as_ref() };
      if let Some(ret) = unsafe { atom_ref.try_nowait() } {
        unsafe { atom_ref.complete(ret) };
        return Ok(Exec::Completed);
      }
    }

    handle.work_tx.send(atom).map_err(|_| {
      io::Error::new(io::ErrorKind::BrokenPipe, "syslio worker pool is gone")
    })?;
    Ok(Exec::Queued)
  }

  fn wait(&self, handle: &ThreadedHandle, min_events: usize) -> io::Result<()> {
    handle.ring.wait_ready(min_events)
  }
}
