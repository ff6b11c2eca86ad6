//! Socket nodes: every operation forwards to an owned host socket.

use procbox_abi::errno::SysResult;

use crate::host::{self, HostFd, Message};

#[derive(Debug)]
pub struct SocketState {
    pub fd: HostFd,
}

impl SocketState {
    pub fn try_create(domain: i32, ty: i32, protocol: i32) -> SysResult<SocketState> {
        let fd = host::socket(domain, ty, protocol)?;
        Ok(SocketState { fd })
    }

    pub fn connect(&self, addr: &[u8]) -> SysResult<i64> {
        host::connect(self.fd.raw(), addr)
    }

    pub fn bind(&self, addr: &[u8]) -> SysResult<i64> {
        host::bind(self.fd.raw(), addr)
    }

    pub fn shutdown(&self, how: i32) -> SysResult<i64> {
        host::shutdown(self.fd.raw(), how)
    }

    pub fn getsockname(&self, buffer_size: u32) -> SysResult<Vec<u8>> {
        host::getsockname(self.fd.raw(), buffer_size)
    }

    pub fn getpeername(&self, buffer_size: u32) -> SysResult<Vec<u8>> {
        host::getpeername(self.fd.raw(), buffer_size)
    }

    pub fn getsockopt(&self, level: i32, optname: i32, buf: &[u8]) -> SysResult<Vec<u8>> {
        host::getsockopt(self.fd.raw(), level, optname, buf)
    }

    pub fn setsockopt(&self, level: i32, optname: i32, buf: &[u8]) -> SysResult<i64> {
        host::setsockopt(self.fd.raw(), level, optname, buf)
    }

    pub fn send(&self, buf: &[u8], flags: i32) -> SysResult<i64> {
        host::send(self.fd.raw(), buf, flags)
    }

    pub fn recv(&self, count: usize) -> SysResult<Vec<u8>> {
        host::read(self.fd.raw(), count)
    }

    pub fn recvfrom(
        &self,
        len: usize,
        flags: i32,
        want_src_address: bool,
    ) -> SysResult<(Vec<u8>, Vec<u8>)> {
        host::recvfrom(self.fd.raw(), len, flags, want_src_address)
    }

    pub fn sendmsg(&self, flags: i32, message: &Message) -> SysResult<i64> {
        host::sendmsg(self.fd.raw(), flags, message)
    }

    pub fn recvmsg(&self, flags: i32, message: &mut Message) -> SysResult<i64> {
        host::recvmsg(self.fd.raw(), flags, message)
    }

    pub fn can_read(&self) -> bool {
        host::poll_can_read(self.fd.raw())
    }

    pub fn fcntl(&self, cmd: i32, arg: i32) -> SysResult<i64> {
        host::fcntl(self.fd.raw(), cmd, arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_socket_round_trip() {
        // AF_UNIX datagram pair through the host: create, bind to an
        // abstract name, send to self.
        let a = SocketState::try_create(libc::AF_UNIX, libc::SOCK_DGRAM, 0).unwrap();
        // abstract namespace address: sun_family + leading NUL + tag
        let mut addr = vec![0u8; 2 + 1 + 12];
        addr[0] = libc::AF_UNIX as u8;
        addr[2] = 0;
        let tag = format!("pbx{:08x}", std::process::id());
        addr[3..3 + tag.len()].copy_from_slice(tag.as_bytes());
        a.bind(&addr).unwrap();
        a.connect(&addr).unwrap();
        assert_eq!(a.send(b"ping", 0).unwrap(), 4);
        assert!(a.can_read());
        assert_eq!(a.recv(16).unwrap(), b"ping");
    }
}
