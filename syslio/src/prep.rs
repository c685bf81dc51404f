//! Turns an [`IoUnit`] into the atom the facility will run.

use std::pin::Pin;

use syslio_atom::atom::{Fsync, Pread, Pwrite};

use crate::unit::{DataDirection, IoUnit};

/// Fills the unit's embedded atom. Performs no I/O.
///
/// Reads and writes become `pread64`/`pwrite64` with arguments
/// `(fd, buf, len, offset)`; a sync becomes `fsync(fd)` with the other slots
/// left null. The result destination is the unit's own result cell and the
/// back-reference is the unit itself.
pub fn prep(unit: Pin<&mut IoUnit>) {
  // SAFETY: fields are updated in place; the unit is never moved.
  let unit = unsafe { unit.get_unchecked_mut() };
  unit.reset();
  unit.xfer_buf = unit.buf_mut_ptr();
  unit.xfer_buflen = unit.xfer_buflen();

  let owner = (&raw mut *unit).cast::<()>();
  let fd = &raw const unit.fd;
  let buf = &raw const unit.xfer_buf;
  let len = &raw const unit.xfer_buflen;
  let offset = &raw const unit.offset;
  let ret = &raw mut unit.ret;

  unit.atom = match unit.ddir() {
    DataDirection::Read => {
      Pread::new(fd, buf, len, offset, ret).private(owner).build()
    }
    DataDirection::Write => {
      Pwrite::new(fd, buf, len, offset, ret).private(owner).build()
    }
    DataDirection::Sync => Fsync::new(fd, ret).private(owner).build(),
  };
}
