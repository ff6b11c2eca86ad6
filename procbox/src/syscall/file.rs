//! File, descriptor and readiness syscalls.

use procbox_abi::errno::{Errno, SysResult};
use procbox_abi::flags as abi;
use procbox_abi::structs::{self, EpollEvent, FdSet, Iovec, Timespec};

use crate::host;
use crate::sched;
use crate::task::Thread;
use crate::verify;
use crate::vfs::fd::{AccessMode, CreationFlags, Fd, StatusFlags};
use crate::{mem::Mmu, sched::blocker};

use super::Ctx;

fn fd_arg(args: [u64; 6], index: usize) -> Fd {
    Fd(args[index] as i32)
}

fn copy_in(mmu: &dyn Mmu, addr: u64, len: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; len];
    mmu.copy_from_mmu(&mut buffer, addr);
    buffer
}

pub(super) fn to_access_mode(flags: i32) -> AccessMode {
    match flags & abi::O_ACCMODE {
        abi::O_WRONLY => AccessMode::WRITE,
        abi::O_RDWR => AccessMode::READ | AccessMode::WRITE,
        _ => AccessMode::READ,
    }
}

pub(super) fn to_creation_flags(flags: i32) -> CreationFlags {
    let mut creation = CreationFlags::empty();
    if flags & abi::O_CLOEXEC != 0 {
        creation |= CreationFlags::CLOEXEC;
    }
    if flags & abi::O_CREAT != 0 {
        creation |= CreationFlags::CREAT;
    }
    if flags & abi::O_DIRECTORY != 0 {
        creation |= CreationFlags::DIRECTORY;
    }
    if flags & abi::O_TRUNC != 0 {
        creation |= CreationFlags::TRUNC;
    }
    creation
}

pub(super) fn to_status_flags(flags: i32) -> StatusFlags {
    let mut status = StatusFlags::empty();
    if flags & abi::O_APPEND != 0 {
        status |= StatusFlags::APPEND;
    }
    if flags & abi::O_LARGEFILE != 0 {
        status |= StatusFlags::LARGEFILE;
    }
    if flags & abi::O_NONBLOCK != 0 {
        status |= StatusFlags::NONBLOCK;
    }
    status
}

// ============================================================================
// Plain I/O
// ============================================================================

pub(super) fn read(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let data = ctx.kernel.vfs.read(fd_arg(args, 0), args[2] as usize)?;
    mmu.copy_to_mmu(args[1], &data);
    Ok(data.len() as i64)
}

pub(super) fn write(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let buffer = copy_in(mmu, args[1], args[2] as usize);
    ctx.kernel.vfs.write(fd_arg(args, 0), &buffer)
}

pub(super) fn close(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    ctx.kernel.vfs.close(fd_arg(args, 0))
}

pub(super) fn pread64(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let data = ctx.kernel.vfs.pread(fd_arg(args, 0), args[2] as usize, args[3] as i64)?;
    mmu.copy_to_mmu(args[1], &data);
    Ok(data.len() as i64)
}

pub(super) fn pwrite64(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let buffer = copy_in(mmu, args[1], args[2] as usize);
    ctx.kernel.vfs.pwrite(fd_arg(args, 0), &buffer, args[3] as i64)
}

fn read_iovecs(mmu: &dyn Mmu, iov_addr: u64, iovcnt: usize) -> Vec<Iovec> {
    let raw = copy_in(mmu, iov_addr, iovcnt * std::mem::size_of::<Iovec>());
    raw.chunks_exact(std::mem::size_of::<Iovec>()).map(structs::read_struct).collect()
}

pub(super) fn readv(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let iovecs = read_iovecs(mmu, args[1], args[2] as usize);
    let lens: Vec<usize> = iovecs.iter().map(|iov| iov.len as usize).collect();
    let chunks = ctx.kernel.vfs.readv(fd_arg(args, 0), &lens)?;
    let mut total = 0i64;
    for (iov, chunk) in iovecs.iter().zip(&chunks) {
        mmu.copy_to_mmu(iov.base, chunk);
        total += chunk.len() as i64;
    }
    Ok(total)
}

pub(super) fn writev(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let iovecs = read_iovecs(mmu, args[1], args[2] as usize);
    let buffers: Vec<Vec<u8>> =
        iovecs.iter().map(|iov| copy_in(mmu, iov.base, iov.len as usize)).collect();
    ctx.kernel.vfs.writev(fd_arg(args, 0), &buffers)
}

pub(super) fn lseek(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    ctx.kernel.vfs.lseek(fd_arg(args, 0), args[1] as i64, args[2] as i32)
}

// ============================================================================
// Opens, dups, descriptor bookkeeping
// ============================================================================

pub(super) fn openat(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let pathname = mmu.read_string(args[1]);
    let flags = args[2] as i32;
    let fd = ctx.kernel.vfs.open(
        fd_arg(args, 0),
        &pathname,
        to_access_mode(flags),
        to_creation_flags(flags),
        to_status_flags(flags),
    )?;
    tracing::debug!("openat {pathname} -> fd {}", fd.raw());
    Ok(fd.raw() as i64)
}

pub(super) fn dup(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    Ok(ctx.kernel.vfs.dup(fd_arg(args, 0))?.raw() as i64)
}

pub(super) fn dup2(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    Ok(ctx.kernel.vfs.dup2(fd_arg(args, 0), fd_arg(args, 1))?.raw() as i64)
}

pub(super) fn dup3(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    Ok(ctx.kernel.vfs.dup3(fd_arg(args, 0), fd_arg(args, 1), args[2] as i32)?.raw() as i64)
}

pub(super) fn pipe(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    pipe_impl(ctx, args[0], 0)
}

pub(super) fn pipe2(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    pipe_impl(ctx, args[0], args[1] as i32)
}

fn pipe_impl(ctx: &mut Ctx, pipefd_addr: u64, flags: i32) -> SysResult<i64> {
    let (reader, writer) = ctx.kernel.vfs.pipe2(flags)?;
    let mmu = ctx.emulator.mmu();
    mmu.write32(pipefd_addr, reader.raw() as u32);
    mmu.write32(pipefd_addr + 4, writer.raw() as u32);
    Ok(0)
}

pub(super) fn memfd_create(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let name = ctx.emulator.mmu().read_string(args[0]);
    Ok(ctx.kernel.vfs.memfd_create(&name, args[1] as u32)?.raw() as i64)
}

pub(super) fn eventfd2(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    Ok(ctx.kernel.vfs.eventfd2(args[0] as u32, args[1] as i32)?.raw() as i64)
}

pub(super) fn fcntl(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    ctx.kernel.vfs.fcntl(fd_arg(args, 0), args[1] as i32, args[2] as i32)
}

pub(super) fn flock(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    ctx.kernel.vfs.flock(fd_arg(args, 0), args[1] as i32)
}

pub(super) fn fsync(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("fsync not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn fdatasync(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("fdatasync not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn ftruncate(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    ctx.kernel.vfs.ftruncate(fd_arg(args, 0), args[1] as usize)
}

pub(super) fn fallocate(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    ctx.kernel.vfs.fallocate(fd_arg(args, 0), args[1] as i32, args[2] as i64, args[3] as i64)
}

// ============================================================================
// Metadata
// ============================================================================

pub(super) fn stat(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let pathname = mmu.read_string(args[0]);
    let bytes = ctx.kernel.vfs.stat(&pathname)?;
    mmu.copy_to_mmu(args[1], &bytes);
    Ok(0)
}

pub(super) fn fstat(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let bytes = ctx.kernel.vfs.fstat(fd_arg(args, 0))?;
    mmu.copy_to_mmu(args[1], &bytes);
    Ok(0)
}

pub(super) fn lstat(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let pathname = mmu.read_string(args[0]);
    let bytes = host::lstat_bytes(&pathname)?;
    mmu.copy_to_mmu(args[1], &bytes);
    Ok(0)
}

pub(super) fn newfstatat(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let pathname = mmu.read_string(args[1]);
    let bytes = ctx.kernel.vfs.fstatat64(fd_arg(args, 0), &pathname, args[3] as i32)?;
    mmu.copy_to_mmu(args[2], &bytes);
    Ok(0)
}

pub(super) fn statx(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let pathname = mmu.read_string(args[1]);
    let bytes =
        ctx.kernel.vfs.statx(fd_arg(args, 0), &pathname, args[2] as i32, args[3] as u32)?;
    mmu.copy_to_mmu(args[4], &bytes);
    Ok(0)
}

pub(super) fn statfs(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let pathname = mmu.read_string(args[0]);
    let bytes = host::statfs_bytes(&pathname)?;
    mmu.copy_to_mmu(args[1], &bytes);
    Ok(0)
}

pub(super) fn fstatfs(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let bytes = ctx.kernel.vfs.fstatfs(fd_arg(args, 0))?;
    mmu.copy_to_mmu(args[1], &bytes);
    Ok(0)
}

pub(super) fn getdents64(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let bytes = ctx.kernel.vfs.getdents64(fd_arg(args, 0), args[2] as usize)?;
    mmu.copy_to_mmu(args[1], &bytes);
    Ok(bytes.len() as i64)
}

pub(super) fn getxattr(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let pathname = mmu.read_string(args[0]);
    let name = mmu.read_string(args[1]);
    let bytes = host::getxattr(&pathname, &name, args[3] as usize)?;
    mmu.copy_to_mmu(args[2], &bytes);
    Ok(bytes.len() as i64)
}

pub(super) fn lgetxattr(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let pathname = mmu.read_string(args[0]);
    let name = mmu.read_string(args[1]);
    let bytes = host::lgetxattr(&pathname, &name, args[3] as usize)?;
    mmu.copy_to_mmu(args[2], &bytes);
    Ok(bytes.len() as i64)
}

// ============================================================================
// Paths
// ============================================================================

pub(super) fn access(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let pathname = ctx.emulator.mmu().read_string(args[0]);
    ctx.kernel.vfs.access(&pathname, args[1] as i32)
}

pub(super) fn faccessat(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let pathname = ctx.emulator.mmu().read_string(args[1]);
    ctx.kernel.vfs.faccessat(fd_arg(args, 0), &pathname, args[2] as i32)
}

pub(super) fn getcwd(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let cwd = ctx.kernel.vfs.cwd_path();
    let mut bytes = cwd.into_bytes();
    bytes.push(0);
    if bytes.len() > args[1] as usize {
        return Err(Errno::ERANGE);
    }
    ctx.emulator.mmu().copy_to_mmu(args[0], &bytes);
    Ok(bytes.len() as i64)
}

pub(super) fn chdir(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let pathname = ctx.emulator.mmu().read_string(args[0]);
    tracing::warn!("chdir only reaches the host, the emulated cwd is unchanged");
    host::chdir(&pathname)
}

pub(super) fn rename(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let oldname = mmu.read_string(args[0]);
    let newname = mmu.read_string(args[1]);
    ctx.kernel.vfs.rename(&oldname, &newname)
}

pub(super) fn mkdir(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let pathname = ctx.emulator.mmu().read_string(args[0]);
    ctx.kernel.vfs.mkdir(&pathname)
}

pub(super) fn unlink(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let pathname = ctx.emulator.mmu().read_string(args[0]);
    ctx.kernel.vfs.unlink(&pathname)
}

pub(super) fn readlink(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let pathname = mmu.read_string(args[0]);
    let bytes = ctx.kernel.vfs.readlink(&pathname, args[2] as usize)?;
    mmu.copy_to_mmu(args[1], &bytes);
    Ok(bytes.len() as i64)
}

pub(super) fn readlinkat(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    verify!(args[0] as i32 == abi::AT_FDCWD, "readlinkat dirfd is not AT_FDCWD");
    let mmu = ctx.emulator.mmu();
    let pathname = mmu.read_string(args[1]);
    let bytes = ctx.kernel.vfs.readlink(&pathname, args[3] as usize)?;
    mmu.copy_to_mmu(args[2], &bytes);
    Ok(bytes.len() as i64)
}

pub(super) fn chmod(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let pathname = ctx.emulator.mmu().read_string(args[0]);
    tracing::warn!("chmod {pathname} not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn chown(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let pathname = ctx.emulator.mmu().read_string(args[0]);
    tracing::warn!("chown {pathname} not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn umask(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("umask not implemented");
    0o777
}

pub(super) fn utime(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("utime not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn utimensat(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("utimensat not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn posix_fadvise(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("posix_fadvise not implemented, claiming success");
    0
}

pub(super) fn inotify_init(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("inotify_init not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn inotify_init1(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    Errno::ENOTSUP.to_ret()
}

pub(super) fn inotify_add_watch(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("inotify_add_watch not implemented");
    Errno::ENOTSUP.to_ret()
}

// ============================================================================
// ioctl
// ============================================================================

pub(super) fn ioctl(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let request = args[1];
    let Some(size) = host::ioctl_buffer_size(request) else {
        tracing::warn!("unknown ioctl {request:#x}, returning -EINVAL");
        return Err(Errno::EINVAL);
    };
    let mmu = ctx.emulator.mmu();
    let input = if size > 0 { copy_in(mmu, args[2], size) } else { Vec::new() };
    let output = ctx.kernel.vfs.ioctl(fd_arg(args, 0), request, &input)?;
    if !output.is_empty() {
        mmu.copy_to_mmu(args[2], &output);
    }
    Ok(0)
}

// ============================================================================
// epoll control
// ============================================================================

pub(super) fn epoll_create1(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    Ok(ctx.kernel.vfs.epoll_create1(args[0] as i32)?.raw() as i64)
}

pub(super) fn epoll_ctl(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    verify!(args[3] != 0, "null event in epoll_ctl not supported");
    let mmu = ctx.emulator.mmu();
    let raw = copy_in(mmu, args[3], std::mem::size_of::<EpollEvent>());
    let event: EpollEvent = structs::read_struct(&raw);
    ctx.kernel.vfs.epoll_ctl(
        fd_arg(args, 0),
        args[1] as i32,
        fd_arg(args, 2),
        blocker::epoll_events_from_guest(event.events),
        event.data,
    )
}

// ============================================================================
// Readiness: immediate passes and blocker installation
// ============================================================================

pub(super) fn poll(ctx: &mut Ctx, thread: Box<Thread>, args: [u64; 6]) -> Option<Box<Thread>> {
    let nfds = args[1] as usize;
    let timeout_ms = args[2] as i32;
    poll_impl(ctx, thread, args[0], nfds, timeout_ms)
}

pub(super) fn ppoll(ctx: &mut Ctx, thread: Box<Thread>, args: [u64; 6]) -> Option<Box<Thread>> {
    verify!(args[3] == 0, "ppoll does not support a non-null sigmask");
    let nfds = args[1] as usize;
    let timer = match ctx.kernel.timers.get_or_try_create(0) {
        Some(timer) => *timer,
        None => unreachable!("clock 0 always exists"),
    };
    let timeout_ms = match timer.read_relative_timespec(ctx.emulator.mmu(), args[2]) {
        Some(diff) => (diff.nanos() / 1_000_000) as i32,
        None => -1,
    };
    poll_impl(ctx, thread, args[0], nfds, timeout_ms)
}

fn poll_impl(
    ctx: &mut Ctx,
    mut thread: Box<Thread>,
    fds_addr: u64,
    nfds: usize,
    timeout_ms: i32,
) -> Option<Box<Thread>> {
    let mmu = ctx.emulator.mmu();
    if timeout_ms == 0 {
        let mut pfds = blocker::read_pollfds(mmu, fds_addr, nfds);
        for pfd in pfds.iter_mut() {
            pfd.revents = 0;
        }
        let ready = ctx.kernel.vfs.poll_pass(&mut pfds);
        blocker::write_pollfds(mmu, fds_addr, &pfds);
        thread.cpu_mut().regs.rax = ready as u64;
        return Some(thread);
    }
    sched::poll(ctx.kernel, thread, fds_addr, nfds, timeout_ms);
    None
}

pub(super) fn select(ctx: &mut Ctx, mut thread: Box<Thread>, args: [u64; 6]) -> Option<Box<Thread>> {
    let mmu = ctx.emulator.mmu();
    let nfds = args[0] as i32;
    let (readfds_addr, writefds_addr, exceptfds_addr, timeout_addr) =
        (args[1], args[2], args[3], args[4]);
    let timer = match ctx.kernel.timers.get_or_try_create(0) {
        Some(timer) => *timer,
        None => unreachable!("clock 0 always exists"),
    };
    let timeout = timer.read_timeval(mmu, timeout_addr);

    if timeout.map(|diff| diff.nanos() == 0).unwrap_or(false) {
        let mut readfds = blocker::read_fd_set(mmu, readfds_addr);
        let mut writefds = blocker::read_fd_set(mmu, writefds_addr);
        let mut exceptfds = blocker::read_fd_set(mmu, exceptfds_addr);
        let ret = match ctx.kernel.vfs.select_pass(nfds, &mut readfds, &mut writefds, &mut exceptfds)
        {
            Err(errno) => errno.to_ret(),
            Ok(ready) => {
                blocker::write_fd_set(mmu, readfds_addr, &readfds);
                blocker::write_fd_set(mmu, writefds_addr, &writefds);
                blocker::write_fd_set(mmu, exceptfds_addr, &exceptfds);
                ready
            }
        };
        thread.cpu_mut().regs.rax = ret as u64;
        return Some(thread);
    }
    sched::select(ctx.kernel, thread, nfds, readfds_addr, writefds_addr, exceptfds_addr, timeout);
    None
}

/// pselect6 is served immediately against the host; the guest descriptor
/// sets it is used with refer to host-backed files in practice.
pub(super) fn pselect6(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let set_len = std::mem::size_of::<FdSet>();
    let mut readfds = (args[1] != 0).then(|| copy_in(mmu, args[1], set_len));
    let mut writefds = (args[2] != 0).then(|| copy_in(mmu, args[2], set_len));
    let mut exceptfds = (args[3] != 0).then(|| copy_in(mmu, args[3], set_len));
    let timeout = (args[4] != 0).then(|| copy_in(mmu, args[4], std::mem::size_of::<Timespec>()));

    let ret = host::pselect6(
        args[0] as i32,
        readfds.as_deref_mut(),
        writefds.as_deref_mut(),
        exceptfds.as_deref_mut(),
        timeout.as_deref(),
    )?;

    if let Some(bytes) = &readfds {
        mmu.copy_to_mmu(args[1], bytes);
    }
    if let Some(bytes) = &writefds {
        mmu.copy_to_mmu(args[2], bytes);
    }
    if let Some(bytes) = &exceptfds {
        mmu.copy_to_mmu(args[3], bytes);
    }
    Ok(ret)
}

pub(super) fn epoll_wait(
    ctx: &mut Ctx,
    mut thread: Box<Thread>,
    args: [u64; 6],
) -> Option<Box<Thread>> {
    let events_addr = args[1];
    let maxevents = args[2] as i64;
    let timeout_ms = args[3] as i32;
    if events_addr == 0 {
        thread.cpu_mut().regs.rax = Errno::EFAULT.to_ret() as u64;
        return Some(thread);
    }
    if maxevents <= 0 {
        thread.cpu_mut().regs.rax = Errno::EINVAL.to_ret() as u64;
        return Some(thread);
    }
    if timeout_ms == 0 {
        let ret = match ctx.kernel.vfs.epoll_wait_pass(fd_arg(args, 0)) {
            Err(errno) => errno.to_ret(),
            Ok(events) => {
                let count = events.len().min(maxevents as usize);
                blocker::write_epoll_events(ctx.emulator.mmu(), events_addr, &events[..count]);
                count as i64
            }
        };
        thread.cpu_mut().regs.rax = ret as u64;
        return Some(thread);
    }
    sched::epoll_wait(
        ctx.kernel,
        thread,
        fd_arg(args, 0),
        events_addr,
        maxevents as usize,
        timeout_ms,
    );
    None
}
