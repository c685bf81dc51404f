//! The I/O unit: one read, write or sync request as the harness sees it.

use std::{io, marker::PhantomPinned, os::fd::RawFd, ptr};

use syslio_atom::Atom;

/// Direction of an [`IoUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
  Read,
  Write,
  Sync,
}

/// One I/O request.
///
/// Once prepared, the unit's embedded atom points at the unit's own fields,
/// so the unit is `!Unpin` and must be pinned (typically `Box::pin`) before
/// it is prepared and queued. Residual and error are only meaningful after
/// the engine reports the unit completed.
#[derive(Debug)]
pub struct IoUnit {
  ddir: DataDirection,
  pub(crate) fd: RawFd,
  buf: Vec<u8>,
  pub(crate) offset: u64,

  // Atom argument targets, refreshed on every prep.
  pub(crate) xfer_buf: *mut u8,
  pub(crate) xfer_buflen: usize,

  resid: usize,
  error: i32,
  pub(crate) ret: i64,
  pub(crate) atom: Atom,

  _pin: PhantomPinned,
}

impl IoUnit {
  fn new(ddir: DataDirection, fd: RawFd, buf: Vec<u8>, offset: u64) -> Self {
    Self {
      ddir,
      fd,
      buf,
      offset,
      xfer_buf: ptr::null_mut(),
      xfer_buflen: 0,
      resid: 0,
      error: 0,
      ret: 0,
      atom: Atom::default(),
      _pin: PhantomPinned,
    }
  }

  /// Reads `len` bytes at `offset` into a fresh zeroed buffer.
  pub fn read(fd: RawFd, len: usize, offset: u64) -> Self {
    Self::new(DataDirection::Read, fd, vec![0; len], offset)
  }

  /// Writes all of `data` at `offset`.
  pub fn write(fd: RawFd, data: Vec<u8>, offset: u64) -> Self {
    Self::new(DataDirection::Write, fd, data, offset)
  }

  /// Flushes `fd` to stable storage.
  pub fn sync(fd: RawFd) -> Self {
    Self::new(DataDirection::Sync, fd, Vec::new(), 0)
  }

  pub fn ddir(&self) -> DataDirection {
    self.ddir
  }

  pub fn fd(&self) -> RawFd {
    self.fd
  }

  pub fn offset(&self) -> u64 {
    self.offset
  }

  /// Bytes the unit asks to transfer; `0` for a sync.
  pub fn xfer_buflen(&self) -> usize {
    self.buf.len()
  }

  /// Bytes requested but not transferred.
  pub fn resid(&self) -> usize {
    self.resid
  }

  /// Positive errno of a failed unit, `0` on success.
  pub fn error(&self) -> i32 {
    self.error
  }

  pub fn io_error(&self) -> Option<io::Error> {
    (self.error != 0).then(|| io::Error::from_raw_os_error(self.error))
  }

  /// Bytes actually transferred.
  pub fn bytes_done(&self) -> usize {
    if self.error != 0 { 0 } else { self.xfer_buflen() - self.resid }
  }

  /// The part of the buffer that was transferred.
  pub fn transferred(&self) -> &[u8] {
    &self.buf[..self.bytes_done()]
  }

  /// Copies the transferred part of the buffer.
  #[cfg(feature = "bytes")]
  #[cfg_attr(docsrs, doc(cfg(feature = "bytes")))]
  pub fn to_bytes(&self) -> bytes::Bytes {
    bytes::Bytes::copy_from_slice(self.transferred())
  }

  pub(crate) fn buf_mut_ptr(&mut self) -> *mut u8 {
    self.buf.as_mut_ptr()
  }

  /// Clears the outcome of any previous run.
  pub(crate) fn reset(&mut self) {
    self.resid = 0;
    self.error = 0;
    self.ret = 0;
  }

  /// Records the raw result of the unit's call.
  ///
  /// `ret >= 0` is a byte count (short counts leave a residual), `ret < 0`
  /// a negative errno.
  pub(crate) fn set_result(&mut self, ret: i64) {
    let len = self.xfer_buflen();
    if ret < 0 {
      self.error = i32::try_from(ret.unsigned_abs()).unwrap_or(i32::MAX);
      self.resid = len;
    } else {
      let done = usize::try_from(ret).map_or(len, |done| done.min(len));
      self.resid = len - done;
      self.error = 0;
    }
  }
}
