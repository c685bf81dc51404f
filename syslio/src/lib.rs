#![cfg_attr(docsrs, feature(doc_cfg))]

//! # syslio - syslet-style I/O engine
//!
//! `syslio` is an I/O engine for storage benchmarking harnesses. Each read,
//! write or sync either completes while it is being submitted, or detaches
//! and is published later on a completion ring that the engine drains.
//!
//! ## Facilities
//!
//! The engine is generic over the [`Facility`] that executes requests:
//!
//! | Facility                 | Use                                           |
//! |--------------------------|-----------------------------------------------|
//! | [`atom::ThreadedFacility`] | Real I/O: inline non-blocking attempt, worker pool fallback. |
//! | [`atom::SimFacility`]    | Scripted completions for tests.               |
//! | [`atom::Unsupported`]    | No facility; `init` reports `Unavailable`.    |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::{fs::File, os::fd::AsRawFd};
//! use syslio::{EngineConfig, IoEngineOps, IoUnit, SysletEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = File::open("/etc/hostname")?;
//! let mut engine = SysletEngine::threaded(&EngineConfig::new().iodepth(8))?;
//!
//! let mut unit = Box::pin(IoUnit::read(file.as_raw_fd(), 64, 0));
//! engine.prep(unit.as_mut());
//! // SAFETY: `unit` outlives the harvest below.
//! unsafe { engine.queue(unit.as_mut())? };
//!
//! let done = engine.getevents(1, 1, None)?;
//! assert_eq!(done, 1);
//! println!("read {} bytes", unit.bytes_done());
//!
//! engine.cleanup();
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! A queued unit is referenced by raw pointer until the engine hands it back
//! through [`IoEngineOps::event`]. Units are `!Unpin` and must stay pinned,
//! alive and untouched for that whole time.
//!
//! ## Error Handling
//!
//! Failures of the engine itself are [`EngineError`]s. A failed request is
//! not: it completes normally with [`IoUnit::error`] set, and is also
//! reported through [`SysletEngine::last_error`] and a `tracing` warning.

mod config;
mod engine;
mod error;
mod ops;
mod prep;
mod unit;

pub use syslio_atom as atom;
pub use syslio_atom::Facility;

pub use config::{EngineConfig, IODEPTH_ENV};
pub use engine::{ENGINE_NAME, SysletEngine};
pub use error::EngineError;
pub use ops::{IoEngineOps, QueueStatus};
pub use prep::prep;
pub use unit::{DataDirection, IoUnit};
