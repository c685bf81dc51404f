//! # syslio-atom
//!
//! The kernel-facing half of `syslio`: atoms (the executable descriptors a
//! facility runs), the completion ring a facility publishes finished atoms
//! on, and the [`Facility`] capability trait with its implementations.
//!
//! ## Facilities
//!
//! | Facility             | Behaviour                                                       |
//! |----------------------|-----------------------------------------------------------------|
//! | [`ThreadedFacility`] | Inline `RWF_NOWAIT` fast path, worker-thread pool otherwise.    |
//! | [`SimFacility`]      | Scripted outcomes, for exercising the protocol deterministically. |
//! | [`Unsupported`]      | Registration always fails with `ENOSYS`.                        |
//!
//! ## Safety
//!
//! Atoms hold raw pointers into their owner. When handing an atom to
//! [`Facility::exec`] you must ensure that:
//! - the atom and everything it points at stay valid and in place until the
//!   atom is reported completed or published on the ring
//! - nothing else reads or writes the atom's result destination meanwhile
//! - the ring never has more atoms in flight than it has slots

pub mod atom;
mod facility;
pub mod ring;
pub mod sim;
mod sync;
pub mod threaded;

pub use atom::{Atom, AtomPtr, Opcode};
pub use facility::{Exec, Facility, Unsupported};
pub use ring::{CompletionRing, RingCursor};
pub use sim::{Outcome, SimFacility};
pub use threaded::{ThreadedConfig, ThreadedFacility};
