//! Host-backed nodes.
//!
//! A host file is opened read-only and owns its host fd exclusively; all
//! positioned I/O goes through `pread` against the description's offset so
//! several descriptions can share one node without trampling each other.

use procbox_abi::errno::{Errno, SysResult};
use procbox_abi::flags::{AT_EMPTY_PATH, SEEK_CUR, SEEK_SET};

use crate::host::{self, HostFd};
use crate::verify_unreachable;

#[derive(Debug)]
pub struct HostFileState {
    pub fd: HostFd,
}

impl HostFileState {
    /// Probes the host for a regular file; `None` when the path is missing
    /// or names something else.
    pub fn try_open(pathname: &str, close_on_exec: bool) -> Option<HostFileState> {
        host::try_open_regular(pathname, close_on_exec).map(|fd| HostFileState { fd })
    }

    pub fn can_read(&self) -> bool {
        host::poll_can_read(self.fd.raw())
    }

    pub fn read_at(&self, offset: i64, count: usize) -> SysResult<Vec<u8>> {
        if offset < 0 {
            return Err(Errno::EINVAL);
        }
        host::pread(self.fd.raw(), count, offset)
    }

    /// Host-backed files are read-only by construction.
    pub fn write(&self) -> SysResult<i64> {
        Err(Errno::EINVAL)
    }

    /// Forwards to the host, folding the description offset into SEEK_CUR.
    pub fn lseek(&self, desc_offset: i64, offset: i64, whence: i32) -> SysResult<i64> {
        if whence == SEEK_CUR {
            host::lseek(self.fd.raw(), desc_offset + offset, SEEK_SET)
        } else {
            host::lseek(self.fd.raw(), offset, whence)
        }
    }

    pub fn getdents64(&self, count: usize) -> SysResult<Vec<u8>> {
        host::getdents64(self.fd.raw(), count)
    }

    pub fn fcntl(&self, cmd: i32, arg: i32) -> SysResult<i64> {
        host::fcntl(self.fd.raw(), cmd, arg)
    }

    pub fn statx(&self, mask: u32) -> SysResult<Vec<u8>> {
        host::statx_bytes(self.fd.raw(), "", AT_EMPTY_PATH, mask)
    }

    pub fn statfs(&self) -> SysResult<Vec<u8>> {
        host::fstatfs_bytes(self.fd.raw())
    }

    pub fn ioctl(&self, request: u64, buf: &mut [u8]) -> SysResult<Vec<u8>> {
        use procbox_abi::flags::{TCGETS, TCSETSW, TIOCGWINSZ, TIOCSWINSZ};
        match request {
            TCGETS | TIOCGWINSZ => {
                host::ioctl(self.fd.raw(), request, buf)?;
                Ok(buf.to_vec())
            }
            TCSETSW | TIOCSWINSZ => {
                host::ioctl(self.fd.raw(), request, buf)?;
                Ok(Vec::new())
            }
            _ => verify_unreachable!("ioctl {request:#x} not implemented on HostFile"),
        }
    }
}

#[derive(Debug)]
pub struct HostDeviceState {
    pub fd: HostFd,
}

impl HostDeviceState {
    /// Probes the host for a character or block device.
    pub fn try_open(pathname: &str) -> Option<HostDeviceState> {
        host::try_open_device(pathname, false, true).map(|fd| HostDeviceState { fd })
    }

    pub fn read(&self, count: usize) -> SysResult<Vec<u8>> {
        host::read(self.fd.raw(), count)
    }

    pub fn fcntl(&self, cmd: i32, arg: i32) -> SysResult<i64> {
        host::fcntl(self.fd.raw(), cmd, arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn fixture() -> (tempfile::TempDir, HostFileState) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blob");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"0123456789").unwrap();
        let state = HostFileState::try_open(path.to_str().unwrap(), true).unwrap();
        (dir, state)
    }

    #[test]
    fn reads_honor_the_description_offset() {
        let (_dir, file) = fixture();
        assert_eq!(file.read_at(4, 3).unwrap(), b"456");
        assert_eq!(file.read_at(0, 3).unwrap(), b"012");
        assert_eq!(file.read_at(-1, 3).unwrap_err(), Errno::EINVAL);
    }

    #[test]
    fn writes_are_rejected() {
        let (_dir, file) = fixture();
        assert_eq!(file.write().unwrap_err(), Errno::EINVAL);
    }

    #[test]
    fn seek_cur_accounts_for_the_shared_offset() {
        let (_dir, file) = fixture();
        assert_eq!(file.lseek(4, 2, SEEK_CUR).unwrap(), 6);
        assert_eq!(file.lseek(0, 0, procbox_abi::flags::SEEK_END).unwrap(), 10);
    }
}
