//! Engine error types.

use std::io;

/// Errors that abort an engine operation.
///
/// A failed *request* is not one of these: it is recorded on the unit
/// ([`IoUnit::error`](crate::IoUnit::error)) and the engine keeps going.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The kernel execution facility is missing or refused registration.
  /// Fall back to another engine; retrying will not help.
  #[error("syslet facility unavailable: {source}")]
  Unavailable { source: io::Error },

  /// Blocking for completions failed. The harvest in progress is abandoned;
  /// units already drained are reported by the next successful harvest.
  #[error("waiting for completions failed: {source}")]
  Wait { source: io::Error },

  /// The facility could not accept a unit at all.
  #[error("facility rejected submission: {source}")]
  Submit { source: io::Error },

  #[error("invalid engine configuration: {reason}")]
  InvalidConfig { reason: String },
}

impl EngineError {
  /// The underlying OS error number, when there is one.
  pub fn raw_os_error(&self) -> Option<i32> {
    match self {
      EngineError::Unavailable { source }
      | EngineError::Wait { source }
      | EngineError::Submit { source } => source.raw_os_error(),
      EngineError::InvalidConfig { .. } => None,
    }
  }
}
