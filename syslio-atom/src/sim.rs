//! Scriptable facility for exercising the submission/completion protocol.
//!
//! Every `exec` consumes the next scripted [`Outcome`]. When the script is
//! empty the atom completes inline with its full requested length. Async
//! outcomes are either held until [`SimFacility::release`] is called (from
//! any thread) or published by a timer thread after a delay.

use std::{
  collections::VecDeque,
  io,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  thread,
  time::Duration,
};

use crate::{
  atom::AtomPtr,
  facility::{Exec, Facility},
  ring::CompletionRing,
  sync::Mutex,
};

/// What happens to the next atom handed to the simulated facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// Completes inline with this result.
  Sync(i64),
  /// Detaches; completes with this result when released.
  Async(i64),
  /// Detaches; completes with this result after the delay.
  Delayed(i64, Duration),
}

struct Held {
  atom: AtomPtr,
  ret: i64,
  ring: Arc<CompletionRing>,
}

#[derive(Default)]
struct SimState {
  script: Mutex<VecDeque<Outcome>>,
  held: Mutex<VecDeque<Held>>,
  wait_failures: Mutex<VecDeque<i32>>,
  unregister_failure: Mutex<Option<i32>>,
  register_failure: Option<i32>,
  registrations: AtomicUsize,
  execs: AtomicUsize,
  waits: AtomicUsize,
  timers: Mutex<Vec<thread::JoinHandle<()>>>,
}

/// Cheap to clone; clones share one script.
#[derive(Clone, Default)]
pub struct SimFacility {
  state: Arc<SimState>,
}

#[derive(Debug)]
pub struct SimHandle {
  ring: Arc<CompletionRing>,
}

impl SimFacility {
  pub fn new() -> Self {
    Self::default()
  }

  /// A facility whose registration always fails with `errno`.
  pub fn unavailable(errno: i32) -> Self {
    Self {
      state: Arc::new(SimState {
        register_failure: Some(errno),
        ..SimState::default()
      }),
    }
  }

  /// Appends one outcome to the script.
  pub fn push(&self, outcome: Outcome) -> &Self {
    self.state.script.lock().push_back(outcome);
    self
  }

  /// Appends several outcomes to the script.
  pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) -> &Self {
    self.state.script.lock().extend(outcomes);
    self
  }

  /// Makes the next wait fail with `errno`.
  pub fn fail_next_wait(&self, errno: i32) -> &Self {
    self.state.wait_failures.lock().push_back(errno);
    self
  }

  /// Makes unregistration fail with `errno`. The ring is still released.
  pub fn fail_unregister(&self, errno: i32) -> &Self {
    *self.state.unregister_failure.lock() = Some(errno);
    self
  }

  /// Publishes up to `n` held async completions, oldest first. Returns how
  /// many were published.
  pub fn release(&self, n: usize) -> usize {
    let released: Vec<Held> = {
      let mut held = self.state.held.lock();
      let n = n.min(held.len());
      held.drain(..n).collect()
    };

    for Held { atom, ret, ring } in &released {
      unsafe { atom.as_ref().complete(*ret) };
      ring.publish(*atom);
    }
    released.len()
  }

  pub fn release_all(&self) -> usize {
    self.release(usize::MAX)
  }

  /// Async completions waiting for [`SimFacility::release`].
  pub fn held(&self) -> usize {
    self.state.held.lock().len()
  }

  pub fn live_registrations(&self) -> usize {
    self.state.registrations.load(Ordering::Acquire)
  }

  pub fn exec_count(&self) -> usize {
    self.state.execs.load(Ordering::Acquire)
  }

  /// Number of times a caller had to block in `wait`.
  pub fn wait_count(&self) -> usize {
    self.state.waits.load(Ordering::Acquire)
  }

  /// Waits for every delayed completion's timer thread.
  pub fn join_timers(&self) {
    let timers = std::mem::take(&mut *self.state.timers.lock());
    for timer in timers {
      let _ = timer.join();
    }
  }
}

impl Facility for SimFacility {
  type Handle = SimHandle;

  fn register(&self, ring: Arc<CompletionRing>) -> io::Result<SimHandle> {
    if let Some(errno) = self.state.register_failure {
      return Err(io::Error::from_raw_os_error(errno));
    }
    self.state.registrations.fetch_add(1, Ordering::AcqRel);
    Ok(SimHandle { ring })
  }

  fn unregister(&self, handle: SimHandle) -> io::Result<()> {
    self.join_timers();
    handle.ring.close();
    self.state.registrations.fetch_sub(1, Ordering::AcqRel);

    match self.state.unregister_failure.lock().take() {
      Some(errno) => Err(io::Error::from_raw_os_error(errno)),
      None => Ok(()),
    }
  }

  unsafe fn exec(&self, handle: &SimHandle, atom: AtomPtr) -> io::Result<Exec> {
    self.state.execs.fetch_add(1, Ordering::AcqRel);
    let atom_ref = unsafe { atom.as_ref() };

    let outcome = self.state.script.lock().pop_front().unwrap_or_else(|| {
      Outcome::Sync(unsafe { atom_ref.requested_len() } as i64)
    });

    match outcome {
      Outcome::Sync(ret) => {
        unsafe { atom_ref.complete(ret) };
        Ok(Exec::Completed)
      }
      Outcome::Async(ret) => {
        let ring = Arc::clone(&handle.ring);
        self.state.held.lock().push_back(Held { atom, ret, ring });
        Ok(Exec::Queued)
      }
      Outcome::Delayed(ret, delay) => {
        let ring = Arc::clone(&handle.ring);
        let timer = thread::Builder::new()
          .name("syslio-sim-timer".into())
          .spawn(move || {
            thread::sleep(delay);
            unsafe { atom.as_ref().complete(ret) };
            ring.publish(atom);
          })?;
        self.state.timers.lock().push(timer);
        Ok(Exec::Queued)
      }
    }
  }

  fn wait(&self, handle: &SimHandle, min_events: usize) -> io::Result<()> {
    self.state.waits.fetch_add(1, Ordering::AcqRel);
    if let Some(errno) = self.state.wait_failures.lock().pop_front() {
      return Err(io::Error::from_raw_os_error(errno));
    }
    handle.ring.wait_ready(min_events)
  }
}
