//! `#[repr(C)]` structs that cross the guest memory boundary.
//!
//! Layouts are the x86-64 Linux ones. The byte helpers are only sound for
//! the plain-old-data types in this module (no padding with uninitialized
//! bytes leaks out because every struct is fully initialized before use).

use crate::flags::{EpollEvents, PollEvents};

/// Borrows the raw bytes of a wire struct for copying into guest memory.
pub fn bytes_of<T: Copy>(value: &T) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts((value as *const T).cast::<u8>(), std::mem::size_of::<T>())
    }
}

/// Reassembles a wire struct from guest bytes. Panics if `bytes` is short.
pub fn read_struct<T: Copy>(bytes: &[u8]) -> T {
    assert!(bytes.len() >= std::mem::size_of::<T>(), "short buffer for wire struct");
    unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<T>()) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl Timespec {
    pub fn as_nanos(&self) -> i64 {
        self.tv_sec * 1_000_000_000 + self.tv_nsec
    }

    pub fn from_nanos(ns: u64) -> Timespec {
        Timespec {
            tv_sec: (ns / 1_000_000_000) as i64,
            tv_nsec: (ns % 1_000_000_000) as i64,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Timeval {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

impl Timeval {
    pub fn from_nanos(ns: u64) -> Timeval {
        Timeval {
            tv_sec: (ns / 1_000_000_000) as i64,
            tv_usec: ((ns % 1_000_000_000) / 1_000) as i64,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Pollfd {
    pub fd: i32,
    pub events: i16,
    pub revents: i16,
}

impl Pollfd {
    pub fn events(&self) -> PollEvents {
        PollEvents::from_bits_truncate(self.events)
    }
}

/// x86-64 packs `epoll_event` (no padding between the mask and the data).
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, packed)]
pub struct EpollEvent {
    pub events: u32,
    pub data: u64,
}

impl EpollEvent {
    pub fn mask(&self) -> EpollEvents {
        EpollEvents::from_bits_truncate(self.events)
    }
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Iovec {
    pub base: u64,
    pub len: u64,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Msghdr {
    pub name: u64,
    pub namelen: u32,
    pub _pad0: u32,
    pub iov: u64,
    pub iovlen: u64,
    pub control: u64,
    pub controllen: u64,
    pub flags: i32,
    pub _pad1: i32,
}

/// clone3(2) argument block; the first eight fields are required.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct CloneArgs {
    pub flags: u64,
    pub pidfd: u64,
    pub child_tid: u64,
    pub parent_tid: u64,
    pub exit_signal: u64,
    pub stack: u64,
    pub stack_size: u64,
    pub tls: u64,
}

/// select(2) descriptor set: 1024 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct FdSet {
    bits: [u64; 16],
}

impl FdSet {
    pub const CAPACITY: usize = 1024;

    pub fn zeroed() -> FdSet {
        FdSet::default()
    }

    pub fn test(&self, fd: usize) -> bool {
        fd < Self::CAPACITY && self.bits[fd / 64] & (1u64 << (fd % 64)) != 0
    }

    pub fn set(&mut self, fd: usize) {
        assert!(fd < Self::CAPACITY);
        self.bits[fd / 64] |= 1u64 << (fd % 64);
    }

    pub fn clear(&mut self, fd: usize) {
        if fd < Self::CAPACITY {
            self.bits[fd / 64] &= !(1u64 << (fd % 64));
        }
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// Appends one `linux_dirent64` record, returning false when `cap` would be
/// exceeded. Records are 8-byte aligned; `d_off` is the offset of the next
/// record as getdents64 defines it.
pub fn append_dirent64(
    out: &mut Vec<u8>,
    cap: usize,
    ino: u64,
    next_off: i64,
    d_type: u8,
    name: &str,
) -> bool {
    let header = 8 + 8 + 2 + 1;
    let reclen = (header + name.len() + 1 + 7) & !7;
    if out.len() + reclen > cap {
        return false;
    }
    out.extend_from_slice(&ino.to_le_bytes());
    out.extend_from_slice(&next_off.to_le_bytes());
    out.extend_from_slice(&(reclen as u16).to_le_bytes());
    out.push(d_type);
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    while out.len() % 8 != 0 {
        out.push(0);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_struct_sizes_match_the_abi() {
        assert_eq!(std::mem::size_of::<Timespec>(), 16);
        assert_eq!(std::mem::size_of::<Pollfd>(), 8);
        assert_eq!(std::mem::size_of::<EpollEvent>(), 12);
        assert_eq!(std::mem::size_of::<Iovec>(), 16);
        assert_eq!(std::mem::size_of::<Msghdr>(), 56);
        assert_eq!(std::mem::size_of::<FdSet>(), 128);
    }

    #[test]
    fn struct_bytes_round_trip() {
        let ts = Timespec { tv_sec: 3, tv_nsec: 17 };
        let bytes = bytes_of(&ts).to_vec();
        assert_eq!(read_struct::<Timespec>(&bytes), ts);
    }

    #[test]
    fn fd_set_bit_operations() {
        let mut set = FdSet::zeroed();
        assert!(!set.test(5));
        set.set(5);
        set.set(63);
        set.set(64);
        assert!(set.test(5) && set.test(63) && set.test(64));
        assert_eq!(set.count(), 3);
        set.clear(63);
        assert!(!set.test(63));
        assert!(!set.test(4096));
    }

    #[test]
    fn dirent_records_are_aligned() {
        let mut buf = Vec::new();
        assert!(append_dirent64(&mut buf, 1024, 1, 24, DT_REG_FOR_TEST, "a"));
        assert_eq!(buf.len() % 8, 0);
        let limit = buf.len() + 8;
        assert!(!append_dirent64(&mut buf, limit, 1, 48, DT_REG_FOR_TEST, "bcd"));
    }

    const DT_REG_FOR_TEST: u8 = crate::flags::DT_REG;
}
