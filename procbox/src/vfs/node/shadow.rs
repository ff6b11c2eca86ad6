//! Shadow regular files: contents live entirely in emulator memory.
//!
//! Anything opened for writing lands here (the host tree is never
//! modified), as do memfds. Contents are not persisted across runs.

use procbox_abi::errno::{Errno, SysResult};
use procbox_abi::flags::{S_IFREG, SEEK_CUR, SEEK_END, SEEK_SET};

#[derive(Debug, Default)]
pub struct ShadowFileState {
    pub data: Vec<u8>,
    pub writable: bool,
}

impl ShadowFileState {
    /// A shadow copy seeded from host file contents (open-for-write of an
    /// existing host file).
    pub fn with_contents(data: Vec<u8>) -> ShadowFileState {
        ShadowFileState { data, writable: false }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn read_at(&self, offset: i64, count: usize) -> SysResult<Vec<u8>> {
        if offset < 0 {
            return Err(Errno::EINVAL);
        }
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(count).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }

    /// Writes at `offset`, zero-extending any gap.
    pub fn write_at(&mut self, offset: i64, buf: &[u8]) -> SysResult<i64> {
        if offset < 0 {
            return Err(Errno::EINVAL);
        }
        let start = offset as usize;
        let end = start + buf.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(buf.len() as i64)
    }

    pub fn lseek(&self, desc_offset: i64, offset: i64, whence: i32) -> SysResult<i64> {
        let base = match whence {
            SEEK_SET => 0,
            SEEK_CUR => desc_offset,
            SEEK_END => self.data.len() as i64,
            _ => return Err(Errno::EINVAL),
        };
        let target = base + offset;
        if target < 0 {
            return Err(Errno::EINVAL);
        }
        Ok(target)
    }

    pub fn truncate(&mut self, length: usize) {
        self.data.resize(length, 0);
    }

    /// Only the plain preallocation mode is supported.
    pub fn fallocate(&mut self, mode: i32, offset: i64, len: i64) -> SysResult<i64> {
        if mode != 0 || offset < 0 || len <= 0 {
            return Err(Errno::ENOTSUP);
        }
        let end = offset as usize + len as usize;
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        Ok(0)
    }

    /// Synthesized `struct stat` bytes: a regular file of the current size.
    pub fn stat_bytes(&self) -> Vec<u8> {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        st.st_mode = S_IFREG | 0o644;
        st.st_nlink = 1;
        st.st_size = self.data.len() as i64;
        st.st_blksize = 4096;
        st.st_blocks = (self.data.len() as i64 + 511) / 512;
        unsafe {
            std::slice::from_raw_parts(
                (&st as *const libc::stat).cast::<u8>(),
                std::mem::size_of::<libc::stat>(),
            )
        }
        .to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut file = ShadowFileState { writable: true, ..Default::default() };
        assert_eq!(file.write_at(0, b"hello").unwrap(), 5);
        assert_eq!(file.read_at(0, 5).unwrap(), b"hello");
        assert_eq!(file.read_at(3, 16).unwrap(), b"lo");
        assert_eq!(file.read_at(40, 4).unwrap(), b"");
    }

    #[test]
    fn sparse_writes_zero_fill() {
        let mut file = ShadowFileState { writable: true, ..Default::default() };
        file.write_at(4, b"x").unwrap();
        assert_eq!(file.len(), 5);
        assert_eq!(file.read_at(0, 5).unwrap(), b"\0\0\0\0x");
    }

    #[test]
    fn seek_whence_arithmetic() {
        let mut file = ShadowFileState::default();
        file.truncate(10);
        assert_eq!(file.lseek(0, 4, SEEK_SET).unwrap(), 4);
        assert_eq!(file.lseek(4, 2, SEEK_CUR).unwrap(), 6);
        assert_eq!(file.lseek(0, -3, SEEK_END).unwrap(), 7);
        assert_eq!(file.lseek(0, -11, SEEK_END).unwrap_err(), Errno::EINVAL);
        assert_eq!(file.lseek(0, 0, 99).unwrap_err(), Errno::EINVAL);
    }

    #[test]
    fn fallocate_extends_without_shrinking() {
        let mut file = ShadowFileState::default();
        file.fallocate(0, 2, 6).unwrap();
        assert_eq!(file.len(), 8);
        file.fallocate(0, 0, 4).unwrap();
        assert_eq!(file.len(), 8);
        assert_eq!(file.fallocate(1, 0, 4).unwrap_err(), Errno::ENOTSUP);
    }

    #[test]
    fn stat_reports_a_regular_file() {
        let mut file = ShadowFileState::default();
        file.write_at(0, b"abcd").unwrap();
        let bytes = file.stat_bytes();
        let st: libc::stat = unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast()) };
        assert_eq!(st.st_mode & S_IFREG, S_IFREG);
        assert_eq!(st.st_size, 4);
    }
}
