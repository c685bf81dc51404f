//! The completion ring.
//!
//! A fixed number of slots through which a facility hands finished atoms back
//! to the engine. Each slot is either empty or holds exactly one completed
//! atom. The facility publishes, the engine drains with its own
//! [`RingCursor`]: inspect the slot under the cursor, take the atom, clear the
//! slot, then advance. The cursor is never touched by the facility.
//!
//! Publishers claim slots in order through an atomic head, so several worker
//! threads can act as the one logical producer. Having more atoms in flight
//! than there are slots is a contract violation by the submitter; publishing
//! into an occupied slot panics.

use std::{
  cell::UnsafeCell,
  io,
  sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
};

use crate::{atom::AtomPtr, sync::Notifier};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

struct Slot {
  state: AtomicU8,
  atom: UnsafeCell<Option<AtomPtr>>,
}

impl Slot {
  fn empty() -> Self {
    Self { state: AtomicU8::new(EMPTY), atom: UnsafeCell::new(None) }
  }
}

/// Consumer-side read position. Owned by whoever drains the ring.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingCursor {
  index: usize,
}

impl RingCursor {
  pub fn index(&self) -> usize {
    self.index
  }

  fn advance(&mut self, capacity: usize) {
    self.index += 1;
    if self.index == capacity {
      self.index = 0;
    }
  }
}

/// Fixed-capacity ring on which a facility publishes completed atoms.
pub struct CompletionRing {
  slots: Box<[Slot]>,
  head: AtomicUsize,
  /// Atoms taken so far; the next one is due in slot `taken % capacity`.
  taken: AtomicUsize,
  ready: AtomicUsize,
  closed: AtomicBool,
  notifier: Notifier,
}

// SAFETY: a slot's atom cell is written only by the producer that claimed it
// while the slot is WRITING, and read only by the consumer after observing
// READY with Acquire ordering.
unsafe impl Sync for CompletionRing {}
unsafe impl Send for CompletionRing {}

impl std::fmt::Debug for CompletionRing {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CompletionRing")
      .field("capacity", &self.capacity())
      .field("ready", &self.ready())
      .field("closed", &self.is_closed())
      .finish()
  }
}

impl CompletionRing {
  /// Creates a ring with `capacity` empty slots.
  ///
  /// # Panics
  /// If `capacity` is zero.
  pub fn with_capacity(capacity: usize) -> Self {
    assert!(capacity > 0, "completion ring needs at least one slot");
    Self {
      slots: (0..capacity).map(|_| Slot::empty()).collect(),
      head: AtomicUsize::new(0),
      taken: AtomicUsize::new(0),
      ready: AtomicUsize::new(0),
      closed: AtomicBool::new(false),
      notifier: Notifier::new(),
    }
  }

  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  /// Size of the slot array in bytes, as a facility would be told at
  /// registration.
  pub fn size_bytes(&self) -> usize {
    self.capacity() * std::mem::size_of::<Option<AtomPtr>>()
  }

  /// Published atoms not yet taken by the consumer.
  pub fn ready(&self) -> usize {
    self.ready.load(Ordering::Acquire)
  }

  /// Producer side: publishes a completed atom in the next slot.
  pub fn publish(&self, atom: AtomPtr) {
    let index = self.claim();
    self.fill(index, atom);
  }

  fn claim(&self) -> usize {
    self.head.fetch_add(1, Ordering::Relaxed) % self.capacity()
  }

  fn fill(&self, index: usize, atom: AtomPtr) {
    let slot = &self.slots[index];

    let claimed = slot
      .state
      .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed);
    assert!(
      claimed.is_ok(),
      "completion ring overrun: slot {index} still holds an unharvested atom"
    );

    // SAFETY: the slot is WRITING, nobody else reads or writes the cell.
    unsafe { *slot.atom.get() = Some(atom) };

    // Counted before READY so a take can never decrement it first.
    self.ready.fetch_add(1, Ordering::AcqRel);
    slot.state.store(READY, Ordering::Release);
    self.notifier.notify_all();
  }

  /// Consumer side: takes the atom under `cursor`, if one is ready.
  ///
  /// The slot is cleared before the cursor moves, so a completion can never
  /// be observed twice. `None` means the ring is drained for now.
  pub fn take(&self, cursor: &mut RingCursor) -> Option<AtomPtr> {
    let slot = &self.slots[cursor.index];
    if slot.state.load(Ordering::Acquire) != READY {
      return None;
    }

    // SAFETY: READY was observed with Acquire; the producer is done with it.
    let atom = unsafe { (*slot.atom.get()).take() };
    slot.state.store(EMPTY, Ordering::Release);
    cursor.advance(self.capacity());

    self.taken.fetch_add(1, Ordering::Release);
    self.ready.fetch_sub(1, Ordering::AcqRel);
    atom
  }

  /// Whether the slot the consumer takes from next holds an atom.
  fn next_is_ready(&self) -> bool {
    let index = self.taken.load(Ordering::Acquire) % self.capacity();
    self.slots[index].state.load(Ordering::Acquire) == READY
  }

  /// Blocks until at least `min` atoms are ready and the next one in ring
  /// order is among them, so the consumer can take at least one.
  ///
  /// Fails with `ECANCELED` once the ring has been closed.
  pub fn wait_ready(&self, min: usize) -> io::Result<()> {
    if min == 0 {
      return Ok(());
    }
    self.notifier.wait_until(|| {
      self.is_closed() || (self.ready() >= min && self.next_is_ready())
    });

    if self.is_closed() && self.ready() < min {
      return Err(io::Error::from_raw_os_error(libc::ECANCELED));
    }
    Ok(())
  }

  /// Wakes all waiters and makes every future wait that cannot be satisfied
  /// fail. Atoms already published stay takeable.
  pub fn close(&self) {
    self.closed.store(true, Ordering::Release);
    self.notifier.notify_all();
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::atom::Atom;
  use proptest::prelude::*;
  use std::{sync::Arc, thread, time::Duration};

  fn atoms(n: usize) -> Vec<Box<Atom>> {
    (0..n).map(|_| Box::new(Atom::default())).collect()
  }

  fn ptr(atom: &mut Box<Atom>) -> AtomPtr {
    AtomPtr::from(&mut **atom)
  }

  #[test]
  fn test_new_ring_is_empty() {
    let ring = CompletionRing::with_capacity(4);
    let mut cursor = RingCursor::default();

    assert_eq!(ring.capacity(), 4);
    assert_eq!(ring.ready(), 0);
    assert!(ring.take(&mut cursor).is_none());
    assert_eq!(cursor.index(), 0);
  }

  #[test]
  #[should_panic]
  fn test_zero_capacity_panics() {
    let _ = CompletionRing::with_capacity(0);
  }

  #[test]
  fn test_take_clears_then_advances() {
    let ring = CompletionRing::with_capacity(2);
    let mut cursor = RingCursor::default();
    let mut backing = atoms(1);
    let a = ptr(&mut backing[0]);

    ring.publish(a);
    assert_eq!(ring.ready(), 1);
    assert_eq!(ring.take(&mut cursor), Some(a));
    assert_eq!(cursor.index(), 1);
    assert_eq!(ring.ready(), 0);

    // Slot 1 was never written; slot 0 was cleared.
    assert!(ring.take(&mut cursor).is_none());
    cursor = RingCursor::default();
    assert!(ring.take(&mut cursor).is_none());
  }

  #[test]
  fn test_cursor_wraps_around() {
    let ring = CompletionRing::with_capacity(3);
    let mut cursor = RingCursor::default();
    let mut backing = atoms(7);

    for atom in backing.iter_mut() {
      let p = ptr(atom);
      ring.publish(p);
      assert_eq!(ring.take(&mut cursor), Some(p));
    }
    assert_eq!(cursor.index(), 7 % 3);
  }

  #[test]
  #[should_panic(expected = "overrun")]
  fn test_publish_past_capacity_panics() {
    let ring = CompletionRing::with_capacity(1);
    let mut backing = atoms(2);
    ring.publish(ptr(&mut backing[0]));
    ring.publish(ptr(&mut backing[1]));
  }

  #[test]
  fn test_wait_ready_wakes_on_publish() {
    let ring = Arc::new(CompletionRing::with_capacity(4));
    let mut backing = atoms(2);
    let a = ptr(&mut backing[0]);
    let b = ptr(&mut backing[1]);

    let producer = {
      let ring = Arc::clone(&ring);
      thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        ring.publish(a);
        thread::sleep(Duration::from_millis(20));
        ring.publish(b);
      })
    };

    ring.wait_ready(2).unwrap();
    assert_eq!(ring.ready(), 2);
    producer.join().unwrap();

    let mut cursor = RingCursor::default();
    assert_eq!(ring.take(&mut cursor), Some(a));
    assert_eq!(ring.take(&mut cursor), Some(b));
  }

  #[test]
  fn test_close_fails_pending_wait() {
    let ring = Arc::new(CompletionRing::with_capacity(4));

    let closer = {
      let ring = Arc::clone(&ring);
      thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        ring.close();
      })
    };

    let err = ring.wait_ready(1).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ECANCELED));
    closer.join().unwrap();
  }

  #[test]
  fn test_close_keeps_published_atoms() {
    let ring = CompletionRing::with_capacity(2);
    let mut backing = atoms(1);
    let a = ptr(&mut backing[0]);

    ring.publish(a);
    ring.close();

    assert!(ring.wait_ready(1).is_ok());
    assert_eq!(ring.take(&mut RingCursor::default()), Some(a));
  }

  #[test]
  fn test_wait_ready_holds_for_earlier_slot() {
    let ring = Arc::new(CompletionRing::with_capacity(4));
    let mut backing = atoms(2);
    let a = ptr(&mut backing[0]);
    let b = ptr(&mut backing[1]);

    // A slow producer claims slot 0; a fast one publishes into slot 1.
    let slow = ring.claim();
    ring.publish(b);
    assert_eq!(ring.ready(), 1);

    let woke = Arc::new(AtomicBool::new(false));
    let waiter = {
      let ring = Arc::clone(&ring);
      let woke = Arc::clone(&woke);
      thread::spawn(move || {
        ring.wait_ready(1).unwrap();
        woke.store(true, Ordering::Release);
      })
    };

    thread::sleep(Duration::from_millis(30));
    assert!(!woke.load(Ordering::Acquire));

    ring.fill(slow, a);
    waiter.join().unwrap();
    assert!(woke.load(Ordering::Acquire));

    let mut cursor = RingCursor::default();
    assert_eq!(ring.take(&mut cursor), Some(a));
    assert_eq!(ring.take(&mut cursor), Some(b));
    assert_eq!(ring.ready(), 0);
  }

  #[test]
  fn test_wait_ready_zero_returns_at_once() {
    let ring = CompletionRing::with_capacity(1);
    assert!(ring.wait_ready(0).is_ok());
  }

  #[test]
  fn test_ready_stays_bounded_with_concurrent_publishers() {
    const PER_PRODUCER: usize = 4;
    let ring = Arc::new(CompletionRing::with_capacity(2 * PER_PRODUCER));
    let mut backing = atoms(2 * PER_PRODUCER);
    let ptrs: Vec<AtomPtr> = backing.iter_mut().map(ptr).collect();

    let producers: Vec<_> = ptrs
      .chunks(PER_PRODUCER)
      .map(|chunk| {
        let ring = Arc::clone(&ring);
        let chunk = chunk.to_vec();
        thread::spawn(move || chunk.into_iter().for_each(|p| ring.publish(p)))
      })
      .collect();

    let mut cursor = RingCursor::default();
    let mut taken = 0;
    while taken < ptrs.len() {
      assert!(ring.ready() <= ring.capacity());
      if ring.take(&mut cursor).is_some() {
        taken += 1;
      } else {
        ring.wait_ready(1).unwrap();
      }
    }
    for producer in producers {
      producer.join().unwrap();
    }
    assert_eq!(ring.ready(), 0);
  }

  proptest! {
    #[test]
    fn prop_drain_is_fifo(
      capacity in 1usize..16,
      batches in proptest::collection::vec(0usize..16, 1..12),
    ) {
      let ring = CompletionRing::with_capacity(capacity);
      let mut cursor = RingCursor::default();
      let total: usize = batches.iter().map(|b| b.min(&capacity)).sum();
      let mut backing = atoms(total);
      let mut next = 0;

      for batch in batches {
        let batch = batch.min(capacity);
        let published: Vec<AtomPtr> = backing[next..next + batch]
          .iter_mut()
          .map(ptr)
          .collect();
        next += batch;

        for &p in &published {
          ring.publish(p);
        }

        let mut drained = Vec::new();
        while let Some(p) = ring.take(&mut cursor) {
          drained.push(p);
        }

        prop_assert_eq!(drained, published);
        prop_assert_eq!(ring.ready(), 0);
      }
    }
  }
}
