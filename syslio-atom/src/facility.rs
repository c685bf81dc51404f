use std::{convert::Infallible, io, sync::Arc};

use crate::{atom::AtomPtr, ring::CompletionRing};

/// How a facility dealt with an atom handed to [`Facility::exec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exec {
  /// The call finished before `exec` returned; its result has already been
  /// stored through the atom's result pointer. The ring is not involved.
  Completed,
  /// The call was detached. The facility owns the atom until it publishes it
  /// on the registered ring.
  Queued,
}

/// A kernel execution facility: something that runs atoms either inline or
/// in the background, and reports background completions on a ring.
///
/// # Contract
///
/// Implementations must:
/// - publish every atom they returned [`Exec::Queued`] for exactly once, on
///   the ring given at registration, after storing its result
/// - never touch an atom after publishing it
/// - not return from [`Facility::unregister`] while any worker may still
///   touch an atom
pub trait Facility {
  /// Registration token returned by [`Facility::register`].
  type Handle;

  /// Attaches a completion ring. Fails when the facility is unavailable.
  fn register(&self, ring: Arc<CompletionRing>) -> io::Result<Self::Handle>;

  /// Detaches the ring and releases everything held for it.
  fn unregister(&self, handle: Self::Handle) -> io::Result<()>;

  /// Runs `atom`, inline if that can be done without blocking.
  ///
  /// `Err` means the facility could not take the atom at all; the atom was
  /// not executed.
  ///
  /// # Safety
  /// `atom` and everything it points at must stay valid, and must not be
  /// accessed by the caller, until the atom is either reported
  /// [`Exec::Completed`] or published on the ring.
  unsafe fn exec(&self, handle: &Self::Handle, atom: AtomPtr)
  -> io::Result<Exec>;

  /// Blocks until at least `min_events` completions are waiting on the ring.
  fn wait(&self, handle: &Self::Handle, min_events: usize) -> io::Result<()>;
}

/// The facility on a system that has none: every registration fails with
/// `ENOSYS`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

impl Facility for Unsupported {
  type Handle = Infallible;

  fn register(&self, _ring: Arc<CompletionRing>) -> io::Result<Infallible> {
    Err(io::Error::from_raw_os_error(libc::ENOSYS))
  }

  fn unregister(&self, handle: Infallible) -> io::Result<()> {
    match handle {}
  }

  unsafe fn exec(&self, handle: &Infallible, _atom: AtomPtr) -> io::Result<Exec> {
    match *handle {}
  }

  fn wait(&self, handle: &Infallible, _min_events: usize) -> io::Result<()> {
    match *handle {}
  }
}
