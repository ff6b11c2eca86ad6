//! x86-64 syscall numbers, as dispatched from RAX.

pub const READ: u64 = 0x0;
pub const WRITE: u64 = 0x1;
pub const CLOSE: u64 = 0x3;
pub const STAT: u64 = 0x4;
pub const FSTAT: u64 = 0x5;
pub const LSTAT: u64 = 0x6;
pub const POLL: u64 = 0x7;
pub const LSEEK: u64 = 0x8;
pub const MMAP: u64 = 0x9;
pub const MPROTECT: u64 = 0xa;
pub const MUNMAP: u64 = 0xb;
pub const BRK: u64 = 0xc;
pub const RT_SIGACTION: u64 = 0xd;
pub const RT_SIGPROCMASK: u64 = 0xe;
pub const IOCTL: u64 = 0x10;
pub const PREAD64: u64 = 0x11;
pub const PWRITE64: u64 = 0x12;
pub const READV: u64 = 0x13;
pub const WRITEV: u64 = 0x14;
pub const ACCESS: u64 = 0x15;
pub const PIPE: u64 = 0x16;
pub const SELECT: u64 = 0x17;
pub const SCHED_YIELD: u64 = 0x18;
pub const MREMAP: u64 = 0x19;
pub const MINCORE: u64 = 0x1b;
pub const MADVISE: u64 = 0x1c;
pub const SHMGET: u64 = 0x1d;
pub const DUP: u64 = 0x20;
pub const DUP2: u64 = 0x21;
pub const SETITIMER: u64 = 0x26;
pub const GETPID: u64 = 0x27;
pub const SOCKET: u64 = 0x29;
pub const CONNECT: u64 = 0x2a;
pub const SENDTO: u64 = 0x2c;
pub const RECVFROM: u64 = 0x2d;
pub const SENDMSG: u64 = 0x2e;
pub const RECVMSG: u64 = 0x2f;
pub const SHUTDOWN: u64 = 0x30;
pub const BIND: u64 = 0x31;
pub const LISTEN: u64 = 0x32;
pub const GETSOCKNAME: u64 = 0x33;
pub const GETPEERNAME: u64 = 0x34;
pub const SETSOCKOPT: u64 = 0x36;
pub const GETSOCKOPT: u64 = 0x37;
pub const CLONE: u64 = 0x38;
pub const EXIT: u64 = 0x3c;
pub const KILL: u64 = 0x3e;
pub const UNAME: u64 = 0x3f;
pub const FCNTL: u64 = 0x48;
pub const FLOCK: u64 = 0x49;
pub const FSYNC: u64 = 0x4a;
pub const FDATASYNC: u64 = 0x4b;
pub const FTRUNCATE: u64 = 0x4d;
pub const GETCWD: u64 = 0x4f;
pub const CHDIR: u64 = 0x50;
pub const RENAME: u64 = 0x52;
pub const MKDIR: u64 = 0x53;
pub const UNLINK: u64 = 0x57;
pub const READLINK: u64 = 0x59;
pub const CHMOD: u64 = 0x5a;
pub const CHOWN: u64 = 0x5c;
pub const UMASK: u64 = 0x5f;
pub const GETTIMEOFDAY: u64 = 0x60;
pub const SYSINFO: u64 = 0x63;
pub const TIMES: u64 = 0x64;
pub const GETUID: u64 = 0x66;
pub const GETGID: u64 = 0x68;
pub const GETEUID: u64 = 0x6b;
pub const GETEGID: u64 = 0x6c;
pub const GETPPID: u64 = 0x6e;
pub const GETPGRP: u64 = 0x6f;
pub const GETGROUPS: u64 = 0x73;
pub const GETRESUID: u64 = 0x76;
pub const GETRESGID: u64 = 0x78;
pub const SIGALTSTACK: u64 = 0x83;
pub const UTIME: u64 = 0x84;
pub const STATFS: u64 = 0x89;
pub const FSTATFS: u64 = 0x8a;
pub const SETPRIORITY: u64 = 0x8d;
pub const SCHED_GETPARAM: u64 = 0x8f;
pub const SCHED_SETSCHEDULER: u64 = 0x90;
pub const SCHED_GETSCHEDULER: u64 = 0x91;
pub const MLOCK: u64 = 0x95;
pub const PRCTL: u64 = 0x9d;
pub const ARCH_PRCTL: u64 = 0x9e;
pub const GETTID: u64 = 0xba;
pub const GETXATTR: u64 = 0xbf;
pub const LGETXATTR: u64 = 0xc0;
pub const TIME: u64 = 0xc9;
pub const FUTEX: u64 = 0xca;
pub const SCHED_SETAFFINITY: u64 = 0xcb;
pub const SCHED_GETAFFINITY: u64 = 0xcc;
pub const GETDENTS64: u64 = 0xd9;
pub const SET_TID_ADDRESS: u64 = 0xda;
pub const POSIX_FADVISE: u64 = 0xdd;
pub const CLOCK_GETTIME: u64 = 0xe4;
pub const CLOCK_GETRES: u64 = 0xe5;
pub const CLOCK_NANOSLEEP: u64 = 0xe6;
pub const EXIT_GROUP: u64 = 0xe7;
pub const EPOLL_WAIT: u64 = 0xe8;
pub const EPOLL_CTL: u64 = 0xe9;
pub const TGKILL: u64 = 0xea;
pub const MBIND: u64 = 0xed;
pub const INOTIFY_INIT: u64 = 0xfd;
pub const INOTIFY_ADD_WATCH: u64 = 0xfe;
pub const OPENAT: u64 = 0x101;
pub const NEWFSTATAT: u64 = 0x106;
pub const READLINKAT: u64 = 0x10b;
pub const FACCESSAT: u64 = 0x10d;
pub const PSELECT6: u64 = 0x10e;
pub const PPOLL: u64 = 0x10f;
pub const SET_ROBUST_LIST: u64 = 0x111;
pub const GET_ROBUST_LIST: u64 = 0x112;
pub const UTIMENSAT: u64 = 0x118;
pub const FALLOCATE: u64 = 0x11d;
pub const EVENTFD2: u64 = 0x122;
pub const EPOLL_CREATE1: u64 = 0x123;
pub const DUP3: u64 = 0x124;
pub const PIPE2: u64 = 0x125;
pub const INOTIFY_INIT1: u64 = 0x126;
pub const PRLIMIT64: u64 = 0x12e;
pub const SCHED_SETATTR: u64 = 0x13a;
pub const SCHED_GETATTR: u64 = 0x13b;
pub const GETRANDOM: u64 = 0x13e;
pub const MEMFD_CREATE: u64 = 0x13f;
pub const STATX: u64 = 0x14c;
pub const CLONE3: u64 = 0x1b3;
