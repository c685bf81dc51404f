//! Atoms: the executable unit handed to a kernel execution facility.
//!
//! An atom names a system call and carries *pointers* to its arguments rather
//! than the arguments themselves, plus a pointer to where the result must be
//! stored and an opaque back-reference to whoever owns it. The facility reads
//! the arguments at execution time, so everything an atom points at must stay
//! alive and in place until its completion has been observed.
//!
//! # Examples
//!
//! ```rust,no_run
//! use syslio_atom::atom::Pread;
//! use std::os::fd::AsRawFd;
//!
//! # fn main() -> std::io::Result<()> {
//! let file = std::fs::File::open("/etc/hostname")?;
//! let fd = file.as_raw_fd();
//! let mut buf = vec![0u8; 64];
//! let ptr = buf.as_mut_ptr();
//! let len = buf.len();
//! let offset = 0u64;
//! let mut ret = 0i64;
//!
//! let atom = Pread::new(&raw const fd, &raw const ptr, &raw const len, &raw const offset, &raw mut ret)
//!   .build();
//!
//! let res = unsafe { atom.run_blocking() };
//! unsafe { atom.complete(res) };
//! assert!(ret >= 0);
//! # Ok(())
//! # }
//! ```

use std::{
  ffi::c_void,
  io,
  os::fd::RawFd,
  ptr::{self, NonNull},
};

/// Number of argument slots in an [`Atom`].
pub const ATOM_ARGS: usize = 4;

/// Runs a libc call and converts the C convention (`-1` + `errno`) into the
/// kernel convention (negative errno in the return value).
macro_rules! syscall_ret {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
      #[allow(unused_unsafe)]
      let res = unsafe { libc::$fn($($arg, )*) };
      if res == -1 {
          -(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO) as i64)
      } else {
          res as i64
      }
  }};
}

/// The system call an atom executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
  /// `pread64(fd, buf, len, offset)`
  Pread64,
  /// `pwrite64(fd, buf, len, offset)`
  Pwrite64,
  /// `fsync(fd)`
  Fsync,
}

impl Opcode {
  /// System call number the opcode stands for.
  #[cfg(linux)]
  pub const fn nr(self) -> libc::c_long {
    match self {
      Opcode::Pread64 => libc::SYS_pread64,
      Opcode::Pwrite64 => libc::SYS_pwrite64,
      Opcode::Fsync => libc::SYS_fsync,
    }
  }

  /// Whether the call moves data through a buffer.
  pub const fn is_transfer(self) -> bool {
    matches!(self, Opcode::Pread64 | Opcode::Pwrite64)
  }
}

/// An executable descriptor.
///
/// Built through [`Pread`], [`Pwrite`] or [`Fsync`]. Unused argument slots are
/// null.
#[derive(Debug)]
#[repr(C)]
pub struct Atom {
  opcode: Opcode,
  ret_ptr: *mut i64,
  arg_ptr: [*const c_void; ATOM_ARGS],
  private: *mut (),
}

impl Default for Atom {
  fn default() -> Self {
    Self {
      opcode: Opcode::Fsync,
      ret_ptr: ptr::null_mut(),
      arg_ptr: [ptr::null(); ATOM_ARGS],
      private: ptr::null_mut(),
    }
  }
}

impl Atom {
  pub fn opcode(&self) -> Opcode {
    self.opcode
  }

  /// Raw argument pointer in slot `index`; null when the slot is unused.
  pub fn arg(&self, index: usize) -> *const c_void {
    self.arg_ptr[index]
  }

  pub fn ret_ptr(&self) -> *mut i64 {
    self.ret_ptr
  }

  /// Opaque back-reference to the owner of this atom.
  pub fn private(&self) -> *mut () {
    self.private
  }

  /// Stores `ret` in the result destination.
  ///
  /// # Safety
  /// The result destination must be valid for writes and not aliased.
  #[inline]
  pub unsafe fn complete(&self, ret: i64) {
    unsafe { self.ret_ptr.write(ret) };
  }

  /// Reads the result destination.
  ///
  /// # Safety
  /// The result destination must be valid for reads.
  #[inline]
  pub unsafe fn result(&self) -> i64 {
    unsafe { self.ret_ptr.read() }
  }

  /// Number of bytes the call asks to transfer, `0` for calls without a
  /// buffer.
  ///
  /// # Safety
  /// The length argument must be valid for reads.
  pub unsafe fn requested_len(&self) -> usize {
    if self.opcode.is_transfer() {
      unsafe { *self.arg_ptr[2].cast::<usize>() }
    } else {
      0
    }
  }

  unsafe fn fd(&self) -> RawFd {
    unsafe { *self.arg_ptr[0].cast::<RawFd>() }
  }

  unsafe fn transfer_args(&self) -> (RawFd, *mut u8, usize, u64) {
    unsafe {
      (
        self.fd(),
        *self.arg_ptr[1].cast::<*mut u8>(),
        *self.arg_ptr[2].cast::<usize>(),
        *self.arg_ptr[3].cast::<u64>(),
      )
    }
  }

  /// Executes the call on the current thread, blocking as long as it takes.
  ///
  /// Returns the byte count (or `0`) on success and a negative errno on
  /// failure. The result destination is *not* written; see [`Atom::complete`].
  ///
  /// # Safety
  /// Every argument pointer must be valid, and the buffer must be valid for
  /// the requested length.
  pub unsafe fn run_blocking(&self) -> i64 {
    match self.opcode {
      Opcode::Pread64 => {
        let (fd, buf, len, offset) = unsafe { self.transfer_args() };
        syscall_ret!(pread(fd, buf.cast(), len, offset as libc::off_t))
      }
      Opcode::Pwrite64 => {
        let (fd, buf, len, offset) = unsafe { self.transfer_args() };
        syscall_ret!(pwrite(fd, buf.cast_const().cast(), len, offset as libc::off_t))
      }
      Opcode::Fsync => syscall_ret!(fsync(unsafe { self.fd() })),
    }
  }

  /// Attempts the call without blocking.
  ///
  /// Returns `None` when finishing the call would have to wait (the data is
  /// not cached, the filesystem does not support `RWF_NOWAIT`, or the call is
  /// a sync); the caller should then run it on a worker.
  ///
  /// A short count is also `None`: `RWF_NOWAIT` stops at the first uncached
  /// page, so only a full transfer is final. Re-running the whole call is
  /// safe since positional transfers at the same offset are idempotent.
  ///
  /// # Safety
  /// Same as [`Atom::run_blocking`].
  #[cfg(nowait)]
  pub unsafe fn try_nowait(&self) -> Option<i64> {
    let (fd, buf, len, offset) = match self.opcode {
      Opcode::Fsync => return None,
      _ => unsafe { self.transfer_args() },
    };
    let iov = libc::iovec { iov_base: buf.cast(), iov_len: len };
    let off = offset as libc::off_t;

    let ret = match self.opcode {
      Opcode::Pread64 => {
        syscall_ret!(preadv2(fd, &iov, 1, off, libc::RWF_NOWAIT))
      }
      _ => syscall_ret!(pwritev2(fd, &iov, 1, off, libc::RWF_NOWAIT)),
    };

    if ret >= 0 {
      return (ret as usize == len).then_some(ret);
    }
    let errno = -ret as i32;
    (!matches!(errno, libc::EAGAIN | libc::EOPNOTSUPP | libc::ENOSYS))
      .then_some(ret)
  }

  /// Attempts the call without blocking. Always defers on this platform.
  ///
  /// # Safety
  /// Same as [`Atom::run_blocking`].
  #[cfg(not(nowait))]
  pub unsafe fn try_nowait(&self) -> Option<i64> {
    None
  }
}

/// A pointer to an [`Atom`] that may be handed to another thread.
///
/// Whoever publishes or executes it relies on the owner's guarantee that the
/// atom, and everything it points at, outlives its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomPtr(NonNull<Atom>);

// SAFETY: an AtomPtr is only dereferenced by the single party that currently
// owns the in-flight atom (the submitter, one worker, or the harvester).
unsafe impl Send for AtomPtr {}

impl AtomPtr {
  pub fn new(atom: NonNull<Atom>) -> Self {
    Self(atom)
  }

  pub fn as_ptr(self) -> *mut Atom {
    self.0.as_ptr()
  }

  /// # Safety
  /// The atom must still be alive.
  pub unsafe fn as_ref<'a>(self) -> &'a Atom {
    unsafe { self.0.as_ref() }
  }
}

impl From<&mut Atom> for AtomPtr {
  fn from(atom: &mut Atom) -> Self {
    Self(NonNull::from(atom))
  }
}

/// Generates an atom builder: required argument pointers go to `new`,
/// fields after `;;` get a default and a chained setter.
macro_rules! opcode {
    (
        $( #[$outer:meta] )*
        pub struct $name:ident {
            $( $field:ident : $ftype:ty ),* $(,)?
            ;;
            $(
                $( #[$opt_meta:meta] )*
                $opt_field:ident : $opt_tname:ty = $default:expr
            ),* $(,)?
        }

        pub const CODE = $opcode:expr;

        pub fn build($self:ident) -> Atom $build_block:block
    ) => {
        $( #[$outer] )*
        pub struct $name {
            $( $field : $ftype, )*
            $( $opt_field : $opt_tname, )*
        }

        impl $name {
            /// The opcode of the atom this builder produces.
            pub const CODE: Opcode = $opcode;

            #[inline]
            pub fn new($( $field : $ftype ),*) -> Self {
                $name {
                    $( $field, )*
                    $( $opt_field: $default, )*
                }
            }

            $(
                $( #[$opt_meta] )*
                #[inline]
                pub const fn $opt_field(mut self, $opt_field: $opt_tname) -> Self {
                    self.$opt_field = $opt_field;
                    self
                }
            )*

            /// Produces the atom. The argument pointers are copied as is.
            #[inline]
            pub fn build($self) -> Atom $build_block
        }
    }
}

opcode! {
    /// Positional read, equivalent to `pread(2)`.
    ///
    /// All arguments are pointers to the values the call will use.
    #[derive(Debug)]
    pub struct Pread {
        fd: *const RawFd,
        buf: *const *mut u8,
        len: *const usize,
        offset: *const u64,
        ret: *mut i64,
        ;;
        /// Back-reference returned by [`Atom::private`].
        private: *mut () = ptr::null_mut()
    }

    pub const CODE = Opcode::Pread64;

    pub fn build(self) -> Atom {
        let Pread { fd, buf, len, offset, ret, private } = self;
        Atom {
            opcode: Self::CODE,
            ret_ptr: ret,
            arg_ptr: [fd.cast(), buf.cast(), len.cast(), offset.cast()],
            private,
        }
    }
}

opcode! {
    /// Positional write, equivalent to `pwrite(2)`.
    #[derive(Debug)]
    pub struct Pwrite {
        fd: *const RawFd,
        buf: *const *mut u8,
        len: *const usize,
        offset: *const u64,
        ret: *mut i64,
        ;;
        private: *mut () = ptr::null_mut()
    }

    pub const CODE = Opcode::Pwrite64;

    pub fn build(self) -> Atom {
        let Pwrite { fd, buf, len, offset, ret, private } = self;
        Atom {
            opcode: Self::CODE,
            ret_ptr: ret,
            arg_ptr: [fd.cast(), buf.cast(), len.cast(), offset.cast()],
            private,
        }
    }
}

opcode! {
    /// File sync, equivalent to `fsync(2)`. Only the first argument slot is
    /// used.
    #[derive(Debug)]
    pub struct Fsync {
        fd: *const RawFd,
        ret: *mut i64,
        ;;
        private: *mut () = ptr::null_mut()
    }

    pub const CODE = Opcode::Fsync;

    pub fn build(self) -> Atom {
        let Fsync { fd, ret, private } = self;
        Atom {
            opcode: Self::CODE,
            ret_ptr: ret,
            arg_ptr: [fd.cast(), ptr::null(), ptr::null(), ptr::null()],
            private,
        }
    }
}
