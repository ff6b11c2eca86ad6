//! Thin adapters over host primitives.
//!
//! Every host call that can fail returns `SysResult`; a `-1` from libc is
//! translated to the guest as `-errno` and nothing else leaks through.
//! File-type probing (regular / directory / device) lives here because the
//! VFS open routing depends on it.

use std::ffi::CString;
use std::os::unix::io::RawFd;

use procbox_abi::errno::{Errno, SysResult};
use procbox_abi::flags::{
    FIOCLEX, FIONBIO, FIONCLEX, KERNEL_TERMIOS_LEN, S_IFBLK, S_IFCHR, S_IFDIR, S_IFMT, S_IFREG,
    TCGETS, TCSETS, TCSETSW, TIOCGPGRP, TIOCGWINSZ, TIOCSWINSZ, WINSIZE_LEN,
};

/// An owned host file descriptor, closed on drop.
#[derive(Debug)]
pub struct HostFd(RawFd);

impl HostFd {
    pub fn from_raw(fd: RawFd) -> HostFd {
        debug_assert!(fd >= 0);
        HostFd(fd)
    }

    pub fn raw(&self) -> RawFd {
        self.0
    }
}

impl Drop for HostFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

fn cvt(ret: i64) -> SysResult<i64> {
    if ret < 0 {
        Err(Errno::last_os())
    } else {
        Ok(ret)
    }
}

fn cstring(path: &str) -> SysResult<CString> {
    CString::new(path).map_err(|_| Errno::EINVAL)
}

fn open_and_check(path: &str, flags: i32, want: impl Fn(u32) -> bool) -> Option<HostFd> {
    let cpath = CString::new(path).ok()?;
    let fd = unsafe { libc::openat(libc::AT_FDCWD, cpath.as_ptr(), flags) };
    if fd < 0 {
        return None;
    }
    let fd = HostFd::from_raw(fd);
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd.raw(), &mut st) } < 0 {
        return None;
    }
    if !want(st.st_mode & S_IFMT) {
        return None;
    }
    Some(fd)
}

/// Opens `path` read-only when it names a regular host file.
pub fn try_open_regular(path: &str, close_on_exec: bool) -> Option<HostFd> {
    let mut flags = libc::O_RDONLY;
    if close_on_exec {
        flags |= libc::O_CLOEXEC;
    }
    open_and_check(path, flags, |mode| mode == S_IFREG)
}

/// Opens `path` when it names a host directory.
pub fn try_open_directory(path: &str) -> Option<HostFd> {
    open_and_check(path, libc::O_RDONLY | libc::O_CLOEXEC, |mode| mode == S_IFDIR)
}

/// Opens `path` when it names a character or block device.
pub fn try_open_device(path: &str, read_write: bool, close_on_exec: bool) -> Option<HostFd> {
    let mut flags = if read_write { libc::O_RDWR } else { libc::O_RDONLY };
    if close_on_exec {
        flags |= libc::O_CLOEXEC;
    }
    open_and_check(path, flags, |mode| mode == S_IFCHR || mode == S_IFBLK)
}

/// True when `path` names a host directory (stat only, no fd kept).
pub fn is_directory(path: &str) -> bool {
    let Ok(cpath) = CString::new(path) else { return false };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::stat(cpath.as_ptr(), &mut st) } < 0 {
        return false;
    }
    st.st_mode & S_IFMT == S_IFDIR
}

pub fn read(fd: RawFd, count: usize) -> SysResult<Vec<u8>> {
    let mut buffer = vec![0u8; count];
    let n = cvt(unsafe { libc::read(fd, buffer.as_mut_ptr().cast(), count) } as i64)?;
    buffer.truncate(n as usize);
    Ok(buffer)
}

pub fn pread(fd: RawFd, count: usize, offset: i64) -> SysResult<Vec<u8>> {
    let mut buffer = vec![0u8; count];
    let n = cvt(unsafe { libc::pread(fd, buffer.as_mut_ptr().cast(), count, offset) } as i64)?;
    buffer.truncate(n as usize);
    Ok(buffer)
}

pub fn write(fd: RawFd, buf: &[u8]) -> SysResult<i64> {
    cvt(unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) } as i64)
}

/// Emulated terminal output lands on the host's stderr.
pub fn write_stderr(buf: &[u8]) -> SysResult<i64> {
    write(2, buf)
}

pub fn lseek(fd: RawFd, offset: i64, whence: i32) -> SysResult<i64> {
    cvt(unsafe { libc::lseek(fd, offset, whence) })
}

fn struct_bytes<T>(value: &T) -> Vec<u8> {
    unsafe {
        std::slice::from_raw_parts((value as *const T).cast::<u8>(), std::mem::size_of::<T>())
    }
    .to_vec()
}

pub fn fstat_bytes(fd: RawFd) -> SysResult<Vec<u8>> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    cvt(unsafe { libc::fstat(fd, &mut st) } as i64)?;
    Ok(struct_bytes(&st))
}

pub fn stat_bytes(path: &str) -> SysResult<Vec<u8>> {
    let cpath = cstring(path)?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    cvt(unsafe { libc::stat(cpath.as_ptr(), &mut st) } as i64)?;
    Ok(struct_bytes(&st))
}

pub fn lstat_bytes(path: &str) -> SysResult<Vec<u8>> {
    let cpath = cstring(path)?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    cvt(unsafe { libc::lstat(cpath.as_ptr(), &mut st) } as i64)?;
    Ok(struct_bytes(&st))
}

pub fn statx_bytes(dirfd: RawFd, path: &str, flags: i32, mask: u32) -> SysResult<Vec<u8>> {
    let cpath = cstring(path)?;
    let mut stx: libc::statx = unsafe { std::mem::zeroed() };
    cvt(unsafe { libc::statx(dirfd, cpath.as_ptr(), flags, mask, &mut stx) } as i64)?;
    Ok(struct_bytes(&stx))
}

pub fn statfs_bytes(path: &str) -> SysResult<Vec<u8>> {
    let cpath = cstring(path)?;
    let mut stfs: libc::statfs = unsafe { std::mem::zeroed() };
    cvt(unsafe { libc::statfs(cpath.as_ptr(), &mut stfs) } as i64)?;
    Ok(struct_bytes(&stfs))
}

pub fn fstatfs_bytes(fd: RawFd) -> SysResult<Vec<u8>> {
    let mut stfs: libc::statfs = unsafe { std::mem::zeroed() };
    cvt(unsafe { libc::fstatfs(fd, &mut stfs) } as i64)?;
    Ok(struct_bytes(&stfs))
}

pub fn getdents64(fd: RawFd, count: usize) -> SysResult<Vec<u8>> {
    let mut buffer = vec![0u8; count];
    let n = cvt(unsafe {
        libc::syscall(libc::SYS_getdents64, fd, buffer.as_mut_ptr(), buffer.len())
    })?;
    buffer.truncate(n as usize);
    Ok(buffer)
}

/// Non-blocking poll for readability, used by `can_read` probes.
pub fn poll_can_read(fd: RawFd) -> bool {
    let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
    let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
    ret > 0 && pfd.revents & libc::POLLIN != 0
}

pub fn fcntl(fd: RawFd, cmd: i32, arg: i32) -> SysResult<i64> {
    cvt(unsafe { libc::fcntl(fd, cmd, arg) } as i64)
}

pub fn access(path: &str, mode: i32) -> SysResult<i64> {
    let cpath = cstring(path)?;
    cvt(unsafe { libc::access(cpath.as_ptr(), mode) } as i64)
}

pub fn readlink(path: &str, bufsiz: usize) -> SysResult<Vec<u8>> {
    let cpath = cstring(path)?;
    let mut buffer = vec![0u8; bufsiz.max(1)];
    let n = cvt(unsafe { libc::readlink(cpath.as_ptr(), buffer.as_mut_ptr().cast(), buffer.len()) }
        as i64)?;
    buffer.truncate(n as usize);
    Ok(buffer)
}

pub fn chdir(path: &str) -> SysResult<i64> {
    let cpath = cstring(path)?;
    cvt(unsafe { libc::chdir(cpath.as_ptr()) } as i64)
}

pub fn getcwd() -> SysResult<String> {
    let mut buffer = vec![0u8; 1024];
    let ptr = unsafe { libc::getcwd(buffer.as_mut_ptr().cast(), buffer.len()) };
    if ptr.is_null() {
        return Err(Errno::last_os());
    }
    let len = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    buffer.truncate(len);
    String::from_utf8(buffer).map_err(|_| Errno::EINVAL)
}

pub fn uname_bytes() -> SysResult<Vec<u8>> {
    let mut info: libc::utsname = unsafe { std::mem::zeroed() };
    cvt(unsafe { libc::uname(&mut info) } as i64)?;
    Ok(struct_bytes(&info))
}

pub fn sysinfo_bytes() -> SysResult<Vec<u8>> {
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    cvt(unsafe { libc::sysinfo(&mut info) } as i64)?;
    Ok(struct_bytes(&info))
}

pub fn getrlimit_bytes(pid: i32, resource: i32) -> SysResult<Vec<u8>> {
    let mut limit: libc::rlimit = unsafe { std::mem::zeroed() };
    cvt(unsafe {
        libc::prlimit(pid, resource as libc::__rlimit_resource_t, std::ptr::null(), &mut limit)
    } as i64)?;
    Ok(struct_bytes(&limit))
}

pub fn getgroups_bytes(size: i32) -> SysResult<Vec<u8>> {
    let mut groups = vec![0 as libc::gid_t; size.max(0) as usize];
    let n = cvt(unsafe { libc::getgroups(size, groups.as_mut_ptr()) } as i64)?;
    groups.truncate(n as usize);
    Ok(groups.iter().flat_map(|g| g.to_le_bytes()).collect())
}

pub fn getuid() -> i64 {
    unsafe { libc::getuid() as i64 }
}

pub fn getgid() -> i64 {
    unsafe { libc::getgid() as i64 }
}

pub fn geteuid() -> i64 {
    unsafe { libc::geteuid() as i64 }
}

pub fn getegid() -> i64 {
    unsafe { libc::getegid() as i64 }
}

pub fn getppid() -> i64 {
    unsafe { libc::getppid() as i64 }
}

pub fn getpgrp() -> i64 {
    unsafe { libc::getpgrp() as i64 }
}

/// Real/effective/saved triples, queried from the host.
pub struct UserCredentials {
    pub ruid: u32,
    pub euid: u32,
    pub suid: u32,
    pub rgid: u32,
    pub egid: u32,
    pub sgid: u32,
}

pub fn user_credentials() -> UserCredentials {
    let (mut ruid, mut euid, mut suid) = (0, 0, 0);
    let (mut rgid, mut egid, mut sgid) = (0, 0, 0);
    unsafe {
        libc::getresuid(&mut ruid, &mut euid, &mut suid);
        libc::getresgid(&mut rgid, &mut egid, &mut sgid);
    }
    UserCredentials { ruid, euid, suid, rgid, egid, sgid }
}

pub fn getxattr(path: &str, name: &str, size: usize) -> SysResult<Vec<u8>> {
    let cpath = cstring(path)?;
    let cname = cstring(name)?;
    let mut buffer = vec![0u8; size.max(1)];
    let n = cvt(unsafe {
        libc::getxattr(cpath.as_ptr(), cname.as_ptr(), buffer.as_mut_ptr().cast(), size)
    } as i64)?;
    buffer.truncate(n as usize);
    Ok(buffer)
}

pub fn lgetxattr(path: &str, name: &str, size: usize) -> SysResult<Vec<u8>> {
    let cpath = cstring(path)?;
    let cname = cstring(name)?;
    let mut buffer = vec![0u8; size.max(1)];
    let n = cvt(unsafe {
        libc::lgetxattr(cpath.as_ptr(), cname.as_ptr(), buffer.as_mut_ptr().cast(), size)
    } as i64)?;
    buffer.truncate(n as usize);
    Ok(buffer)
}

/// Expected `argp` buffer size behind an ioctl request; `None` when the
/// request is unknown to the emulator.
pub fn ioctl_buffer_size(request: u64) -> Option<usize> {
    match request {
        TCGETS | TCSETS | TCSETSW => Some(KERNEL_TERMIOS_LEN),
        TIOCGWINSZ | TIOCSWINSZ => Some(WINSIZE_LEN),
        TIOCGPGRP | FIONBIO => Some(4),
        FIOCLEX | FIONCLEX => Some(0),
        _ => None,
    }
}

/// Runs an ioctl against the host fd; `buf` is both input and output.
pub fn ioctl(fd: RawFd, request: u64, buf: &mut [u8]) -> SysResult<()> {
    let ret = if buf.is_empty() {
        unsafe { libc::ioctl(fd, request as libc::c_ulong) }
    } else {
        unsafe { libc::ioctl(fd, request as libc::c_ulong, buf.as_mut_ptr()) }
    };
    cvt(ret as i64)?;
    Ok(())
}

// ============================================================================
// Sockets
// ============================================================================

/// Decomposed msghdr used by sendmsg/recvmsg marshalling.
#[derive(Debug, Default)]
pub struct Message {
    pub name: Vec<u8>,
    pub iov: Vec<Vec<u8>>,
    pub control: Vec<u8>,
    pub flags: i32,
}

pub fn socket(domain: i32, ty: i32, protocol: i32) -> SysResult<HostFd> {
    let fd = cvt(unsafe { libc::socket(domain, ty, protocol) } as i64)?;
    Ok(HostFd::from_raw(fd as RawFd))
}

pub fn connect(fd: RawFd, addr: &[u8]) -> SysResult<i64> {
    cvt(unsafe {
        libc::connect(fd, addr.as_ptr().cast(), addr.len() as libc::socklen_t)
    } as i64)
}

pub fn bind(fd: RawFd, addr: &[u8]) -> SysResult<i64> {
    cvt(unsafe { libc::bind(fd, addr.as_ptr().cast(), addr.len() as libc::socklen_t) } as i64)
}

pub fn shutdown(fd: RawFd, how: i32) -> SysResult<i64> {
    cvt(unsafe { libc::shutdown(fd, how) } as i64)
}

pub fn getsockname(fd: RawFd, buffer_size: u32) -> SysResult<Vec<u8>> {
    let mut buffer = vec![0u8; buffer_size as usize];
    let mut len = buffer_size as libc::socklen_t;
    cvt(unsafe { libc::getsockname(fd, buffer.as_mut_ptr().cast(), &mut len) } as i64)?;
    buffer.truncate(len as usize);
    Ok(buffer)
}

pub fn getpeername(fd: RawFd, buffer_size: u32) -> SysResult<Vec<u8>> {
    let mut buffer = vec![0u8; buffer_size as usize];
    let mut len = buffer_size as libc::socklen_t;
    cvt(unsafe { libc::getpeername(fd, buffer.as_mut_ptr().cast(), &mut len) } as i64)?;
    buffer.truncate(len as usize);
    Ok(buffer)
}

pub fn getsockopt(fd: RawFd, level: i32, optname: i32, buf: &[u8]) -> SysResult<Vec<u8>> {
    let mut buffer = buf.to_vec();
    let mut len = buffer.len() as libc::socklen_t;
    cvt(unsafe {
        libc::getsockopt(fd, level, optname, buffer.as_mut_ptr().cast(), &mut len)
    } as i64)?;
    buffer.truncate(len as usize);
    Ok(buffer)
}

pub fn setsockopt(fd: RawFd, level: i32, optname: i32, buf: &[u8]) -> SysResult<i64> {
    cvt(unsafe {
        libc::setsockopt(fd, level, optname, buf.as_ptr().cast(), buf.len() as libc::socklen_t)
    } as i64)
}

pub fn send(fd: RawFd, buf: &[u8], flags: i32) -> SysResult<i64> {
    cvt(unsafe { libc::send(fd, buf.as_ptr().cast(), buf.len(), flags) } as i64)
}

pub fn recvfrom(
    fd: RawFd,
    len: usize,
    flags: i32,
    want_src_address: bool,
) -> SysResult<(Vec<u8>, Vec<u8>)> {
    let mut buffer = vec![0u8; len];
    let mut addr: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut addrlen = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let n = cvt(unsafe {
        libc::recvfrom(
            fd,
            buffer.as_mut_ptr().cast(),
            len,
            flags,
            if want_src_address { (&mut addr as *mut libc::sockaddr_storage).cast() } else { std::ptr::null_mut() },
            if want_src_address { &mut addrlen } else { std::ptr::null_mut() },
        )
    } as i64)?;
    buffer.truncate(n as usize);
    let address = if want_src_address {
        struct_bytes(&addr)[..addrlen as usize].to_vec()
    } else {
        Vec::new()
    };
    Ok((buffer, address))
}

pub fn sendmsg(fd: RawFd, flags: i32, message: &Message) -> SysResult<i64> {
    let iovecs: Vec<libc::iovec> = message
        .iov
        .iter()
        .map(|buf| libc::iovec { iov_base: buf.as_ptr() as *mut libc::c_void, iov_len: buf.len() })
        .collect();
    let header = libc::msghdr {
        msg_name: if message.name.is_empty() {
            std::ptr::null_mut()
        } else {
            message.name.as_ptr() as *mut libc::c_void
        },
        msg_namelen: message.name.len() as libc::socklen_t,
        msg_iov: iovecs.as_ptr() as *mut libc::iovec,
        msg_iovlen: iovecs.len(),
        msg_control: if message.control.is_empty() {
            std::ptr::null_mut()
        } else {
            message.control.as_ptr() as *mut libc::c_void
        },
        msg_controllen: message.control.len(),
        msg_flags: message.flags,
    };
    cvt(unsafe { libc::sendmsg(fd, &header, flags) } as i64)
}

pub fn recvmsg(fd: RawFd, flags: i32, message: &mut Message) -> SysResult<i64> {
    let iovecs: Vec<libc::iovec> = message
        .iov
        .iter_mut()
        .map(|buf| libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        })
        .collect();
    let mut header = libc::msghdr {
        msg_name: if message.name.is_empty() {
            std::ptr::null_mut()
        } else {
            message.name.as_mut_ptr() as *mut libc::c_void
        },
        msg_namelen: message.name.len() as libc::socklen_t,
        msg_iov: iovecs.as_ptr() as *mut libc::iovec,
        msg_iovlen: iovecs.len(),
        msg_control: if message.control.is_empty() {
            std::ptr::null_mut()
        } else {
            message.control.as_mut_ptr() as *mut libc::c_void
        },
        msg_controllen: message.control.len(),
        msg_flags: message.flags,
    };
    let n = cvt(unsafe { libc::recvmsg(fd, &mut header, flags) } as i64)?;
    message.name.truncate(header.msg_namelen as usize);
    message.control.truncate(header.msg_controllen);
    message.flags = header.msg_flags;
    Ok(n)
}

/// Immediate host-side pselect used when the guest supplies host-resolvable
/// descriptor sets; the blocking path goes through the scheduler instead.
pub fn pselect6(
    nfds: i32,
    readfds: Option<&mut [u8]>,
    writefds: Option<&mut [u8]>,
    exceptfds: Option<&mut [u8]>,
    timeout: Option<&[u8]>,
) -> SysResult<i64> {
    unsafe {
        let as_fd_set = |buf: Option<&mut [u8]>| -> *mut libc::fd_set {
            match buf {
                Some(bytes) => bytes.as_mut_ptr().cast(),
                None => std::ptr::null_mut(),
            }
        };
        let rfds = as_fd_set(readfds);
        let wfds = as_fd_set(writefds);
        let efds = as_fd_set(exceptfds);
        let ts: *const libc::timespec = match timeout {
            Some(bytes) => bytes.as_ptr().cast(),
            None => std::ptr::null(),
        };
        cvt(libc::pselect(nfds, rfds, wfds, efds, ts, std::ptr::null()) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn regular_file_probe_rejects_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let file_path = dir.path().join("data");
        std::fs::File::create(&file_path).unwrap().write_all(b"abc").unwrap();

        assert!(try_open_regular(file_path.to_str().unwrap(), true).is_some());
        assert!(try_open_regular(dir.path().to_str().unwrap(), true).is_none());
        assert!(try_open_directory(dir.path().to_str().unwrap()).is_some());
        assert!(try_open_directory(file_path.to_str().unwrap()).is_none());
    }

    #[test]
    fn pread_reads_at_offset() {
        let dir = tempfile::TempDir::new().unwrap();
        let file_path = dir.path().join("data");
        std::fs::write(&file_path, b"hello world").unwrap();
        let fd = try_open_regular(file_path.to_str().unwrap(), true).unwrap();
        assert_eq!(pread(fd.raw(), 5, 6).unwrap(), b"world");
        assert_eq!(pread(fd.raw(), 100, 0).unwrap(), b"hello world");
    }

    #[test]
    fn failed_calls_carry_errno() {
        let err = pread(-1, 4, 0).unwrap_err();
        assert_eq!(err, Errno::EBADF);
    }

    #[test]
    fn ioctl_size_table_covers_the_decoded_requests() {
        assert_eq!(ioctl_buffer_size(TCGETS), Some(KERNEL_TERMIOS_LEN));
        assert_eq!(ioctl_buffer_size(FIOCLEX), Some(0));
        assert_eq!(ioctl_buffer_size(0xdead), None);
    }
}
