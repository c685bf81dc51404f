//! Poison-free synchronization primitives.
//!
//! Wraps `std::sync` so that a panicking worker thread never makes the
//! completion path unusable: poisoned locks are recovered with
//! [`PoisonError::into_inner`](std::sync::PoisonError::into_inner).

use std::sync as std_sync;

/// A mutual exclusion primitive that wraps `std::sync::Mutex`.
///
/// Unlike `std::sync::Mutex`, this does not support poisoning.
#[derive(Debug, Default)]
pub struct Mutex<T: ?Sized> {
  inner: std_sync::Mutex<T>,
}

impl<T> Mutex<T> {
  /// Creates a new mutex in an unlocked state ready for use.
  #[inline]
  pub const fn new(value: T) -> Self {
    Self { inner: std_sync::Mutex::new(value) }
  }
}

impl<T: ?Sized> Mutex<T> {
  /// Acquires a mutex, blocking the current thread until it is able to do so.
  #[inline]
  pub fn lock(&self) -> std_sync::MutexGuard<'_, T> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Lets a consumer sleep until a condition published by producers holds.
///
/// Holds no data. The condition itself lives in atomics owned by the caller;
/// the lock only orders "check condition" against "notify" so a wakeup cannot
/// fall between the two.
#[derive(Debug, Default)]
pub struct Notifier {
  condvar: std_sync::Condvar,
  wait_lock: Mutex<()>,
}

impl Notifier {
  pub fn new() -> Self {
    Self::default()
  }

  /// Wakes every waiter. Call after the condition may have changed.
  #[inline]
  pub fn notify_all(&self) {
    let _guard = self.wait_lock.lock();
    self.condvar.notify_all();
  }

  /// Blocks until `ready` returns true. Spurious wakeups are absorbed.
  pub fn wait_until<F>(&self, mut ready: F)
  where
    F: FnMut() -> bool,
  {
    if ready() {
      return;
    }

    let mut guard = self.wait_lock.lock();
    while !ready() {
      guard = self.condvar.wait(guard).unwrap_or_else(|e| e.into_inner());
    }
  }
}
