//! The syscall layer.
//!
//! On a kernel-ring job the guest's RAX selects the operation and
//! RDI/RSI/RDX/R10/R8/R9 carry the arguments; the return value (or
//! `-errno`) goes back into RAX. Handlers that may park the thread, or
//! kill it, take the `Box<Thread>` by value and return whether the thread
//! keeps running; everything else is a plain value-returning function.
//!
//! Unknown syscall numbers are fatal with a register dump: surfacing an
//! unimplemented guest dependency beats limping past it.

mod file;
mod mm;
mod net;
mod proc;
mod time;

use procbox_abi::errno::encode_ret;
use procbox_abi::nr;

use crate::emulator::{Emulator, Kernel};
use crate::task::Thread;
use crate::verify_unreachable;

/// Everything a handler may touch: the emulator context (MMU) and the
/// locked kernel state.
pub(crate) struct Ctx<'a> {
    pub emulator: &'a Emulator,
    pub kernel: &'a mut Kernel,
}

/// Runs one syscall for `thread`. `Some` hands the thread back to the
/// runnable set; `None` means it was parked in a blocker or terminated.
pub fn dispatch(
    emulator: &Emulator,
    kernel: &mut Kernel,
    mut thread: Box<Thread>,
) -> Option<Box<Thread>> {
    let number = thread.cpu().regs.rax;
    let args = thread.cpu().regs.syscall_args();
    thread.stats_mut().syscalls += 1;
    if kernel.profiling {
        thread.did_syscall(number);
    }
    let log_syscalls = kernel.log_syscalls;
    let description = thread.description();
    let mut ctx = Ctx { emulator, kernel };

    // park-or-kill handlers own the thread
    match number {
        nr::POLL => return file::poll(&mut ctx, thread, args),
        nr::PPOLL => return file::ppoll(&mut ctx, thread, args),
        nr::SELECT => return file::select(&mut ctx, thread, args),
        nr::EPOLL_WAIT => return file::epoll_wait(&mut ctx, thread, args),
        nr::CLOCK_NANOSLEEP => return time::clock_nanosleep(&mut ctx, thread, args),
        nr::FUTEX => return proc::futex(&mut ctx, thread, args),
        nr::EXIT => return proc::exit(&mut ctx, thread, args),
        nr::EXIT_GROUP => return proc::exit_group(&mut ctx, thread, args),
        nr::TGKILL => return proc::tgkill(&mut ctx, thread, args),
        _ => {}
    }

    let ret: i64 = match number {
        nr::READ => encode_ret(file::read(&mut ctx, args)),
        nr::WRITE => encode_ret(file::write(&mut ctx, args)),
        nr::CLOSE => encode_ret(file::close(&mut ctx, args)),
        nr::STAT => encode_ret(file::stat(&mut ctx, args)),
        nr::FSTAT => encode_ret(file::fstat(&mut ctx, args)),
        nr::LSTAT => encode_ret(file::lstat(&mut ctx, args)),
        nr::LSEEK => encode_ret(file::lseek(&mut ctx, args)),
        nr::MMAP => mm::mmap(&mut ctx, args),
        nr::MPROTECT => mm::mprotect(&mut ctx, args),
        nr::MUNMAP => mm::munmap(&mut ctx, args),
        nr::BRK => mm::brk(&mut ctx, args),
        nr::RT_SIGACTION => proc::rt_sigaction(&mut ctx, args),
        nr::RT_SIGPROCMASK => proc::rt_sigprocmask(&mut ctx, args),
        nr::IOCTL => encode_ret(file::ioctl(&mut ctx, args)),
        nr::PREAD64 => encode_ret(file::pread64(&mut ctx, args)),
        nr::PWRITE64 => encode_ret(file::pwrite64(&mut ctx, args)),
        nr::READV => encode_ret(file::readv(&mut ctx, args)),
        nr::WRITEV => encode_ret(file::writev(&mut ctx, args)),
        nr::ACCESS => encode_ret(file::access(&mut ctx, args)),
        nr::PIPE => encode_ret(file::pipe(&mut ctx, args)),
        nr::SCHED_YIELD => proc::sched_yield(&mut thread),
        nr::MREMAP => mm::mremap(&mut ctx, args),
        nr::MINCORE => mm::mincore(&mut ctx, args),
        nr::MADVISE => mm::madvise(&mut ctx, args),
        nr::SHMGET => mm::shmget(&mut ctx, args),
        nr::DUP => encode_ret(file::dup(&mut ctx, args)),
        nr::DUP2 => encode_ret(file::dup2(&mut ctx, args)),
        nr::SETITIMER => time::setitimer(&mut ctx, args),
        nr::GETPID => description.pid as i64,
        nr::SOCKET => encode_ret(net::socket(&mut ctx, args)),
        nr::CONNECT => encode_ret(net::connect(&mut ctx, args)),
        nr::SENDTO => encode_ret(net::sendto(&mut ctx, args)),
        nr::RECVFROM => encode_ret(net::recvfrom(&mut ctx, args)),
        nr::SENDMSG => encode_ret(net::sendmsg(&mut ctx, args)),
        nr::RECVMSG => encode_ret(net::recvmsg(&mut ctx, args)),
        nr::SHUTDOWN => encode_ret(net::shutdown(&mut ctx, args)),
        nr::BIND => encode_ret(net::bind(&mut ctx, args)),
        nr::LISTEN => net::listen(&mut ctx, args),
        nr::GETSOCKNAME => encode_ret(net::getsockname(&mut ctx, args)),
        nr::GETPEERNAME => encode_ret(net::getpeername(&mut ctx, args)),
        nr::SETSOCKOPT => encode_ret(net::setsockopt(&mut ctx, args)),
        nr::GETSOCKOPT => encode_ret(net::getsockopt(&mut ctx, args)),
        nr::CLONE => encode_ret(proc::clone(&mut ctx, &thread, args)),
        nr::KILL => proc::kill(&mut ctx, args),
        nr::UNAME => encode_ret(proc::uname(&mut ctx, args)),
        nr::FCNTL => encode_ret(file::fcntl(&mut ctx, args)),
        nr::FLOCK => encode_ret(file::flock(&mut ctx, args)),
        nr::FSYNC => file::fsync(&mut ctx, args),
        nr::FDATASYNC => file::fdatasync(&mut ctx, args),
        nr::FTRUNCATE => encode_ret(file::ftruncate(&mut ctx, args)),
        nr::GETCWD => encode_ret(file::getcwd(&mut ctx, args)),
        nr::CHDIR => encode_ret(file::chdir(&mut ctx, args)),
        nr::RENAME => encode_ret(file::rename(&mut ctx, args)),
        nr::MKDIR => encode_ret(file::mkdir(&mut ctx, args)),
        nr::UNLINK => encode_ret(file::unlink(&mut ctx, args)),
        nr::READLINK => encode_ret(file::readlink(&mut ctx, args)),
        nr::CHMOD => file::chmod(&mut ctx, args),
        nr::CHOWN => file::chown(&mut ctx, args),
        nr::UMASK => file::umask(&mut ctx, args),
        nr::GETTIMEOFDAY => time::gettimeofday(&mut ctx, args),
        nr::SYSINFO => encode_ret(proc::sysinfo(&mut ctx, args)),
        nr::TIMES => time::times(&mut ctx, args),
        nr::GETUID => crate::host::getuid(),
        nr::GETGID => crate::host::getgid(),
        nr::GETEUID => crate::host::geteuid(),
        nr::GETEGID => crate::host::getegid(),
        nr::GETPPID => crate::host::getppid(),
        nr::GETPGRP => crate::host::getpgrp(),
        nr::GETGROUPS => encode_ret(proc::getgroups(&mut ctx, args)),
        nr::GETRESUID => proc::getresuid(&mut ctx, args),
        nr::GETRESGID => proc::getresgid(&mut ctx, args),
        nr::SIGALTSTACK => proc::sigaltstack(&mut ctx, args),
        nr::UTIME => file::utime(&mut ctx, args),
        nr::STATFS => encode_ret(file::statfs(&mut ctx, args)),
        nr::FSTATFS => encode_ret(file::fstatfs(&mut ctx, args)),
        nr::SETPRIORITY => proc::setpriority(&mut ctx, args),
        nr::SCHED_GETPARAM => proc::sched_getparam(&mut ctx, args),
        nr::SCHED_SETSCHEDULER => proc::sched_setscheduler(&mut ctx, args),
        nr::SCHED_GETSCHEDULER => proc::sched_getscheduler(&mut ctx, args),
        nr::MLOCK => mm::mlock(&mut ctx, args),
        nr::PRCTL => proc::prctl(&mut ctx, args),
        nr::ARCH_PRCTL => proc::arch_prctl(&mut ctx, &mut thread, args),
        nr::GETTID => description.tid as i64,
        nr::GETXATTR => encode_ret(file::getxattr(&mut ctx, args)),
        nr::LGETXATTR => encode_ret(file::lgetxattr(&mut ctx, args)),
        nr::TIME => time::time(&mut ctx, args),
        nr::SCHED_SETAFFINITY => proc::sched_setaffinity(&mut ctx, args),
        nr::SCHED_GETAFFINITY => proc::sched_getaffinity(&mut ctx, args),
        nr::GETDENTS64 => encode_ret(file::getdents64(&mut ctx, args)),
        nr::SET_TID_ADDRESS => proc::set_tid_address(&mut ctx, &mut thread, args),
        nr::POSIX_FADVISE => file::posix_fadvise(&mut ctx, args),
        nr::CLOCK_GETTIME => encode_ret(time::clock_gettime(&mut ctx, args)),
        nr::CLOCK_GETRES => time::clock_getres(&mut ctx, args),
        nr::EPOLL_CTL => encode_ret(file::epoll_ctl(&mut ctx, args)),
        nr::MBIND => mm::mbind(&mut ctx, args),
        nr::INOTIFY_INIT => file::inotify_init(&mut ctx, args),
        nr::INOTIFY_ADD_WATCH => file::inotify_add_watch(&mut ctx, args),
        nr::OPENAT => encode_ret(file::openat(&mut ctx, args)),
        nr::NEWFSTATAT => encode_ret(file::newfstatat(&mut ctx, args)),
        nr::READLINKAT => encode_ret(file::readlinkat(&mut ctx, args)),
        nr::FACCESSAT => encode_ret(file::faccessat(&mut ctx, args)),
        nr::PSELECT6 => encode_ret(file::pselect6(&mut ctx, args)),
        nr::SET_ROBUST_LIST => proc::set_robust_list(&mut ctx, &mut thread, args),
        nr::GET_ROBUST_LIST => proc::get_robust_list(&mut ctx, args),
        nr::UTIMENSAT => file::utimensat(&mut ctx, args),
        nr::FALLOCATE => encode_ret(file::fallocate(&mut ctx, args)),
        nr::EVENTFD2 => encode_ret(file::eventfd2(&mut ctx, args)),
        nr::EPOLL_CREATE1 => encode_ret(file::epoll_create1(&mut ctx, args)),
        nr::DUP3 => encode_ret(file::dup3(&mut ctx, args)),
        nr::PIPE2 => encode_ret(file::pipe2(&mut ctx, args)),
        nr::INOTIFY_INIT1 => file::inotify_init1(&mut ctx, args),
        nr::PRLIMIT64 => encode_ret(proc::prlimit64(&mut ctx, args)),
        nr::SCHED_SETATTR => proc::sched_setattr(&mut ctx, args),
        nr::SCHED_GETATTR => proc::sched_getattr(&mut ctx, args),
        nr::GETRANDOM => mm::getrandom(&mut ctx, args),
        nr::MEMFD_CREATE => encode_ret(file::memfd_create(&mut ctx, args)),
        nr::STATX => encode_ret(file::statx(&mut ctx, args)),
        nr::CLONE3 => encode_ret(proc::clone3(&mut ctx, &thread, args)),
        _ => {
            verify_unreachable!(
                "syscall {number:#x} not handled\narguments:\n  {:#x}\n  {:#x}\n  {:#x}\n  {:#x}\n  {:#x}\n  {:#x}",
                args[0], args[1], args[2], args[3], args[4], args[5]
            )
        }
    };

    if log_syscalls {
        tracing::debug!(
            "[{}:{}] {}({:#x}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x}) = {}",
            description.pid,
            description.tid,
            syscall_name(number),
            args[0],
            args[1],
            args[2],
            args[3],
            args[4],
            args[5],
            ret,
        );
    }
    thread.cpu_mut().regs.rax = ret as u64;
    Some(thread)
}

/// Human-readable name for the syscall trace.
pub fn syscall_name(number: u64) -> &'static str {
    match number {
        nr::READ => "read",
        nr::WRITE => "write",
        nr::CLOSE => "close",
        nr::STAT => "stat",
        nr::FSTAT => "fstat",
        nr::LSTAT => "lstat",
        nr::POLL => "poll",
        nr::LSEEK => "lseek",
        nr::MMAP => "mmap",
        nr::MPROTECT => "mprotect",
        nr::MUNMAP => "munmap",
        nr::BRK => "brk",
        nr::RT_SIGACTION => "rt_sigaction",
        nr::RT_SIGPROCMASK => "rt_sigprocmask",
        nr::IOCTL => "ioctl",
        nr::PREAD64 => "pread64",
        nr::PWRITE64 => "pwrite64",
        nr::READV => "readv",
        nr::WRITEV => "writev",
        nr::ACCESS => "access",
        nr::PIPE => "pipe",
        nr::SELECT => "select",
        nr::SCHED_YIELD => "sched_yield",
        nr::MREMAP => "mremap",
        nr::MINCORE => "mincore",
        nr::MADVISE => "madvise",
        nr::SHMGET => "shmget",
        nr::DUP => "dup",
        nr::DUP2 => "dup2",
        nr::SETITIMER => "setitimer",
        nr::GETPID => "getpid",
        nr::SOCKET => "socket",
        nr::CONNECT => "connect",
        nr::SENDTO => "sendto",
        nr::RECVFROM => "recvfrom",
        nr::SENDMSG => "sendmsg",
        nr::RECVMSG => "recvmsg",
        nr::SHUTDOWN => "shutdown",
        nr::BIND => "bind",
        nr::LISTEN => "listen",
        nr::GETSOCKNAME => "getsockname",
        nr::GETPEERNAME => "getpeername",
        nr::SETSOCKOPT => "setsockopt",
        nr::GETSOCKOPT => "getsockopt",
        nr::CLONE => "clone",
        nr::EXIT => "exit",
        nr::KILL => "kill",
        nr::UNAME => "uname",
        nr::FCNTL => "fcntl",
        nr::FLOCK => "flock",
        nr::FSYNC => "fsync",
        nr::FDATASYNC => "fdatasync",
        nr::FTRUNCATE => "ftruncate",
        nr::GETCWD => "getcwd",
        nr::CHDIR => "chdir",
        nr::RENAME => "rename",
        nr::MKDIR => "mkdir",
        nr::UNLINK => "unlink",
        nr::READLINK => "readlink",
        nr::CHMOD => "chmod",
        nr::CHOWN => "chown",
        nr::UMASK => "umask",
        nr::GETTIMEOFDAY => "gettimeofday",
        nr::SYSINFO => "sysinfo",
        nr::TIMES => "times",
        nr::GETUID => "getuid",
        nr::GETGID => "getgid",
        nr::GETEUID => "geteuid",
        nr::GETEGID => "getegid",
        nr::GETPPID => "getppid",
        nr::GETPGRP => "getpgrp",
        nr::GETGROUPS => "getgroups",
        nr::GETRESUID => "getresuid",
        nr::GETRESGID => "getresgid",
        nr::SIGALTSTACK => "sigaltstack",
        nr::UTIME => "utime",
        nr::STATFS => "statfs",
        nr::FSTATFS => "fstatfs",
        nr::SETPRIORITY => "setpriority",
        nr::SCHED_GETPARAM => "sched_getparam",
        nr::SCHED_SETSCHEDULER => "sched_setscheduler",
        nr::SCHED_GETSCHEDULER => "sched_getscheduler",
        nr::MLOCK => "mlock",
        nr::PRCTL => "prctl",
        nr::ARCH_PRCTL => "arch_prctl",
        nr::GETTID => "gettid",
        nr::GETXATTR => "getxattr",
        nr::LGETXATTR => "lgetxattr",
        nr::TIME => "time",
        nr::FUTEX => "futex",
        nr::SCHED_SETAFFINITY => "sched_setaffinity",
        nr::SCHED_GETAFFINITY => "sched_getaffinity",
        nr::GETDENTS64 => "getdents64",
        nr::SET_TID_ADDRESS => "set_tid_address",
        nr::POSIX_FADVISE => "posix_fadvise",
        nr::CLOCK_GETTIME => "clock_gettime",
        nr::CLOCK_GETRES => "clock_getres",
        nr::CLOCK_NANOSLEEP => "clock_nanosleep",
        nr::EXIT_GROUP => "exit_group",
        nr::EPOLL_WAIT => "epoll_wait",
        nr::EPOLL_CTL => "epoll_ctl",
        nr::TGKILL => "tgkill",
        nr::MBIND => "mbind",
        nr::INOTIFY_INIT => "inotify_init",
        nr::INOTIFY_ADD_WATCH => "inotify_add_watch",
        nr::OPENAT => "openat",
        nr::NEWFSTATAT => "newfstatat",
        nr::READLINKAT => "readlinkat",
        nr::FACCESSAT => "faccessat",
        nr::PSELECT6 => "pselect6",
        nr::PPOLL => "ppoll",
        nr::SET_ROBUST_LIST => "set_robust_list",
        nr::GET_ROBUST_LIST => "get_robust_list",
        nr::UTIMENSAT => "utimensat",
        nr::FALLOCATE => "fallocate",
        nr::EVENTFD2 => "eventfd2",
        nr::EPOLL_CREATE1 => "epoll_create1",
        nr::DUP3 => "dup3",
        nr::PIPE2 => "pipe2",
        nr::INOTIFY_INIT1 => "inotify_init1",
        nr::PRLIMIT64 => "prlimit64",
        nr::SCHED_SETATTR => "sched_setattr",
        nr::SCHED_GETATTR => "sched_getattr",
        nr::GETRANDOM => "getrandom",
        nr::MEMFD_CREATE => "memfd_create",
        nr::STATX => "statx",
        nr::CLONE3 => "clone3",
        _ => "unknown",
    }
}
