//! Guest-visible error numbers.
//!
//! A syscall either succeeds with a non-negative value or fails with a
//! negative errno in RAX; nothing else ever crosses the boundary. `Errno`
//! carries the positive number and [`Errno::to_ret`] produces the
//! two's-complement return encoding.

use std::fmt;

/// Result of an emulated kernel operation, as seen by guest code.
pub type SysResult<T> = Result<T, Errno>;

/// A positive Linux errno value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(i32);

macro_rules! errno_constants {
    ($(($name:ident, $value:expr),)*) => {
        impl Errno {
            $(pub const $name: Errno = Errno($value);)*

            fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

errno_constants! {
    (EPERM, 1),
    (ENOENT, 2),
    (ESRCH, 3),
    (EINTR, 4),
    (EIO, 5),
    (ENXIO, 6),
    (EBADF, 9),
    (EAGAIN, 11),
    (ENOMEM, 12),
    (EACCES, 13),
    (EFAULT, 14),
    (EBUSY, 16),
    (EEXIST, 17),
    (ENODEV, 19),
    (ENOTDIR, 20),
    (EISDIR, 21),
    (EINVAL, 22),
    (ENFILE, 23),
    (EMFILE, 24),
    (ENOTTY, 25),
    (ESPIPE, 29),
    (EPIPE, 32),
    (ERANGE, 34),
    (ENOSYS, 38),
    (ENOTEMPTY, 39),
    (ENOTSOCK, 88),
    (ENOTSUP, 95),
    (ETIMEDOUT, 110),
}

impl Errno {
    /// Wraps a raw positive errno value.
    pub fn new(raw: i32) -> Errno {
        debug_assert!(raw > 0, "errno must be positive, got {raw}");
        Errno(raw)
    }

    /// The last host error, translated for the guest.
    pub fn last_os() -> Errno {
        match std::io::Error::last_os_error().raw_os_error() {
            Some(raw) if raw > 0 => Errno(raw),
            _ => Errno::EIO,
        }
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    /// The `-errno` form stored in RAX on the failure path.
    pub fn to_ret(self) -> i64 {
        -(self.0 as i64)
    }

    /// Decodes a negative return value back into an errno.
    pub fn from_ret(ret: i64) -> Option<Errno> {
        if (-4095..0).contains(&ret) {
            Some(Errno(-ret as i32))
        } else {
            None
        }
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Errno({})", self.0),
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Folds a `SysResult` into the raw RAX encoding.
pub fn encode_ret(result: SysResult<i64>) -> i64 {
    match result {
        Ok(value) => value,
        Err(errno) => errno.to_ret(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ret_encoding_round_trips() {
        assert_eq!(Errno::EBADF.to_ret(), -9);
        assert_eq!(Errno::from_ret(-9), Some(Errno::EBADF));
        assert_eq!(Errno::from_ret(0), None);
        assert_eq!(Errno::from_ret(42), None);
        assert_eq!(Errno::from_ret(-4096), None);
    }

    #[test]
    fn debug_names_known_values() {
        assert_eq!(format!("{:?}", Errno::ENOENT), "ENOENT");
        assert_eq!(format!("{:?}", Errno::new(71)), "Errno(71)");
    }

    #[test]
    fn encode_ret_folds_both_arms() {
        assert_eq!(encode_ret(Ok(5)), 5);
        assert_eq!(encode_ret(Err(Errno::EAGAIN)), -11);
    }
}
