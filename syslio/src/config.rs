//! Engine configuration.

use std::num::NonZeroUsize;

use crate::EngineError;

/// Environment variable read by [`EngineConfig::from_env`].
pub const IODEPTH_ENV: &str = "SYSLIO_IODEPTH";

const DEFAULT_IODEPTH: usize = 32;

/// Settings for one engine instance.
///
/// ```rust
/// let config = syslio::EngineConfig::new().iodepth(64);
/// assert_eq!(config.get_iodepth(), 64);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
  iodepth: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self { iodepth: DEFAULT_IODEPTH }
  }
}

impl EngineConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// Completion ring capacity and the most units that may be in flight.
  pub fn iodepth(mut self, iodepth: usize) -> Self {
    self.iodepth = iodepth;
    self
  }

  pub fn get_iodepth(&self) -> usize {
    self.iodepth
  }

  /// Defaults, with the queue depth overridden by `SYSLIO_IODEPTH` when set.
  pub fn from_env() -> Result<Self, EngineError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let config = Self::default();
    let Some(raw) = lookup(IODEPTH_ENV) else {
      return Ok(config);
    };

    let iodepth = raw.trim().parse::<usize>().map_err(|err| {
      EngineError::InvalidConfig { reason: format!("{IODEPTH_ENV}={raw:?}: {err}") }
    })?;
    let config = config.iodepth(iodepth);
    config.validate()?;
    Ok(config)
  }

  /// Checks the settings, returning the ring capacity.
  pub fn validate(&self) -> Result<NonZeroUsize, EngineError> {
    NonZeroUsize::new(self.iodepth).ok_or_else(|| EngineError::InvalidConfig {
      reason: "iodepth must be at least 1".into(),
    })
  }
}
