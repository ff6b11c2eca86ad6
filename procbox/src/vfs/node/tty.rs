//! The controlling terminal node at `/dev/tty`.
//!
//! One node backs fds 0, 1 and 2 through three separate descriptions.
//! Writes always land on the host's stderr, whatever guest fd they came in
//! on; this keeps interactive output visible without buffering surprises
//! and is deliberately preserved from the reference behavior.
//!
//! When the process has no controlling terminal the node carries no host
//! fd: reads yield EOF, readability polls false and terminal ioctls report
//! ENOTTY, so the standard streams still come up as fds 0/1/2 everywhere.

use procbox_abi::errno::{Errno, SysResult};
use procbox_abi::flags::{
    FIONBIO, TCGETS, TCSETS, TCSETSW, TIOCGPGRP, TIOCGWINSZ, TIOCSWINSZ,
};

use crate::host::{self, HostFd};

#[derive(Debug)]
pub struct TtyState {
    pub host_fd: Option<HostFd>,
}

impl TtyState {
    /// Opens the host terminal; degrades to a detached node when there is
    /// none.
    pub fn create(close_on_exec: bool) -> TtyState {
        let host_fd = host::try_open_device("/dev/tty", true, close_on_exec);
        if host_fd.is_none() {
            tracing::warn!("no controlling terminal; /dev/tty runs detached");
        }
        TtyState { host_fd }
    }

    pub fn can_read(&self) -> bool {
        match &self.host_fd {
            Some(fd) => host::poll_can_read(fd.raw()),
            None => false,
        }
    }

    pub fn read(&self, count: usize) -> SysResult<Vec<u8>> {
        match &self.host_fd {
            Some(fd) => host::read(fd.raw(), count),
            None => Ok(Vec::new()),
        }
    }

    pub fn write(&self, buf: &[u8]) -> SysResult<i64> {
        host::write_stderr(buf)
    }

    pub fn stat(&self) -> SysResult<Vec<u8>> {
        match &self.host_fd {
            Some(fd) => host::fstat_bytes(fd.raw()),
            None => Err(Errno::EBADF),
        }
    }

    /// Terminals have no file position.
    pub fn lseek(&self) -> SysResult<i64> {
        Err(Errno::ESPIPE)
    }

    pub fn fcntl(&self, cmd: i32, arg: i32) -> SysResult<i64> {
        match &self.host_fd {
            Some(fd) => host::fcntl(fd.raw(), cmd, arg),
            None => Err(Errno::EBADF),
        }
    }

    pub fn ioctl(&self, request: u64, buf: &mut [u8]) -> SysResult<Vec<u8>> {
        let Some(fd) = &self.host_fd else {
            return Err(Errno::ENOTTY);
        };
        match request {
            // read-back requests: the host writes into the zeroed buffer
            TCGETS | TIOCGWINSZ | TIOCGPGRP => {
                host::ioctl(fd.raw(), request, buf)?;
                Ok(buf.to_vec())
            }
            // plain set requests: nothing to copy out
            TCSETS | TCSETSW | TIOCSWINSZ | FIONBIO => {
                host::ioctl(fd.raw(), request, buf)?;
                Ok(Vec::new())
            }
            _ => crate::verify_unreachable!("ioctl {request:#x} not implemented on Tty"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> TtyState {
        TtyState { host_fd: None }
    }

    #[test]
    fn detached_terminal_reads_eof() {
        let tty = detached();
        assert_eq!(tty.read(16).unwrap(), b"");
        assert!(!tty.can_read());
    }

    #[test]
    fn detached_terminal_ioctl_is_enotty() {
        let tty = detached();
        let mut buf = [0u8; 4];
        assert_eq!(tty.ioctl(TCGETS, &mut buf).unwrap_err(), Errno::ENOTTY);
    }

    #[test]
    fn lseek_is_espipe() {
        assert_eq!(detached().lseek().unwrap_err(), Errno::ESPIPE);
    }

    #[test]
    fn writes_reach_stderr_even_when_detached() {
        assert_eq!(detached().write(b"").unwrap(), 0);
    }
}
