//! Blockers: why a thread is parked and when it may run again.
//!
//! A blocker owns its blocked thread; moving the `Box<Thread>` in and out
//! of the blocker is what moves the thread between the blocked and
//! runnable sets, so a thread can never be in two places at once. Each
//! unblock probe re-evaluates readiness against guest memory and the VFS
//! and, when it fires, writes results and the syscall return value into
//! the thread before it is released.

use procbox_abi::errno::Errno;
use procbox_abi::flags::EpollEvents;
use procbox_abi::structs::{self, EpollEvent, FdSet, Pollfd};

use crate::mem::{GuestAddr, Mmu};
use crate::task::Thread;
use crate::time::{PreciseTime, TimeDifference, Timers};
use crate::vfs::fd::Fd;
use crate::vfs::Vfs;

pub struct SleepBlocker {
    pub thread: Box<Thread>,
    pub clock_id: i32,
    pub deadline: PreciseTime,
}

pub struct PollBlocker {
    pub thread: Box<Thread>,
    pub fds_addr: GuestAddr,
    pub nfds: usize,
    /// Milliseconds; negative means infinite.
    pub timeout_ms: i32,
    pub start: PreciseTime,
}

pub struct SelectBlocker {
    pub thread: Box<Thread>,
    pub nfds: i32,
    pub readfds_addr: GuestAddr,
    pub writefds_addr: GuestAddr,
    pub exceptfds_addr: GuestAddr,
    pub deadline: Option<PreciseTime>,
}

pub struct EpollWaitBlocker {
    pub thread: Box<Thread>,
    pub epfd: Fd,
    pub events_addr: GuestAddr,
    pub maxevents: usize,
    /// Milliseconds; negative means infinite.
    pub timeout_ms: i32,
    pub start: PreciseTime,
}

pub struct FutexBlocker {
    pub thread: Box<Thread>,
    pub word_addr: GuestAddr,
    pub expected: u32,
    pub deadline: Option<PreciseTime>,
}

pub enum Blocker {
    Sleep(SleepBlocker),
    Poll(PollBlocker),
    Select(SelectBlocker),
    EpollWait(EpollWaitBlocker),
    Futex(FutexBlocker),
}

impl Blocker {
    pub fn thread(&self) -> &Thread {
        match self {
            Blocker::Sleep(b) => &b.thread,
            Blocker::Poll(b) => &b.thread,
            Blocker::Select(b) => &b.thread,
            Blocker::EpollWait(b) => &b.thread,
            Blocker::Futex(b) => &b.thread,
        }
    }

    pub fn thread_mut(&mut self) -> &mut Thread {
        match self {
            Blocker::Sleep(b) => &mut b.thread,
            Blocker::Poll(b) => &mut b.thread,
            Blocker::Select(b) => &mut b.thread,
            Blocker::EpollWait(b) => &mut b.thread,
            Blocker::Futex(b) => &mut b.thread,
        }
    }

    pub fn into_thread(self) -> Box<Thread> {
        match self {
            Blocker::Sleep(b) => b.thread,
            Blocker::Poll(b) => b.thread,
            Blocker::Select(b) => b.thread,
            Blocker::EpollWait(b) => b.thread,
            Blocker::Futex(b) => b.thread,
        }
    }

    pub fn tid(&self) -> i32 {
        self.thread().description().tid
    }

    pub fn has_timeout(&self) -> bool {
        match self {
            Blocker::Sleep(_) => true,
            Blocker::Poll(b) => b.timeout_ms >= 0,
            Blocker::Select(b) => b.deadline.is_some(),
            Blocker::EpollWait(b) => b.timeout_ms >= 0,
            Blocker::Futex(b) => b.deadline.is_some(),
        }
    }

    pub fn is_untimed_futex(&self) -> bool {
        matches!(self, Blocker::Futex(b) if b.deadline.is_none())
    }

    /// A directed futex wake probe. Marks the thread's return value when
    /// it matches.
    pub fn try_wake_futex(&mut self, word_addr: GuestAddr) -> bool {
        match self {
            Blocker::Futex(b) if b.word_addr == word_addr => {
                b.thread.cpu_mut().regs.rax = 0;
                true
            }
            _ => false,
        }
    }

    /// The periodic unblock probe run at the top of the pick loop.
    /// Returns true when the thread may run again; results and RAX have
    /// been written by then.
    pub fn try_unblock(
        &mut self,
        vfs: &mut Vfs,
        timers: &mut Timers,
        mmu: &dyn Mmu,
        now: PreciseTime,
    ) -> bool {
        match self {
            Blocker::Sleep(b) => {
                let timer_now = match timers.get_or_try_create(b.clock_id) {
                    Some(timer) => timer.now(),
                    None => now,
                };
                if timer_now >= b.deadline {
                    b.thread.cpu_mut().regs.rax = 0;
                    return true;
                }
                false
            }
            Blocker::Poll(b) => {
                let mut pfds = read_pollfds(mmu, b.fds_addr, b.nfds);
                for pfd in pfds.iter_mut() {
                    pfd.revents = 0;
                }
                let ready = vfs.poll_pass(&mut pfds);
                let expired = b.timeout_ms >= 0
                    && now >= b.start + TimeDifference::from_millis(b.timeout_ms as i64);
                if ready > 0 || expired {
                    write_pollfds(mmu, b.fds_addr, &pfds);
                    b.thread.cpu_mut().regs.rax = ready as u64;
                    return true;
                }
                false
            }
            Blocker::Select(b) => {
                let mut readfds = read_fd_set(mmu, b.readfds_addr);
                let mut writefds = read_fd_set(mmu, b.writefds_addr);
                let mut exceptfds = read_fd_set(mmu, b.exceptfds_addr);
                match vfs.select_pass(b.nfds, &mut readfds, &mut writefds, &mut exceptfds) {
                    Err(errno) => {
                        b.thread.cpu_mut().regs.rax = errno.to_ret() as u64;
                        true
                    }
                    Ok(ready) => {
                        let expired = b.deadline.map(|deadline| now >= deadline).unwrap_or(false);
                        if ready > 0 || expired {
                            write_fd_set(mmu, b.readfds_addr, &readfds);
                            write_fd_set(mmu, b.writefds_addr, &writefds);
                            write_fd_set(mmu, b.exceptfds_addr, &exceptfds);
                            b.thread.cpu_mut().regs.rax = ready as u64;
                            return true;
                        }
                        false
                    }
                }
            }
            Blocker::EpollWait(b) => {
                let events = match vfs.epoll_wait_pass(b.epfd) {
                    Err(errno) => {
                        b.thread.cpu_mut().regs.rax = errno.to_ret() as u64;
                        return true;
                    }
                    Ok(events) => events,
                };
                let expired = b.timeout_ms >= 0
                    && now >= b.start + TimeDifference::from_millis(b.timeout_ms as i64);
                if !events.is_empty() {
                    let count = events.len().min(b.maxevents);
                    write_epoll_events(mmu, b.events_addr, &events[..count]);
                    b.thread.cpu_mut().regs.rax = count as u64;
                    return true;
                }
                if expired {
                    b.thread.cpu_mut().regs.rax = 0;
                    return true;
                }
                false
            }
            Blocker::Futex(b) => {
                // the value precondition was checked at wait time; only the
                // timeout can release the thread from here
                match b.deadline {
                    Some(deadline) if now >= deadline => {
                        b.thread.cpu_mut().regs.rax = Errno::ETIMEDOUT.to_ret() as u64;
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Blocker::Sleep(b) => format!(
                "sleep tid={} clock={} deadline={}ns",
                b.thread.description().tid,
                b.clock_id,
                b.deadline.nanos()
            ),
            Blocker::Poll(b) => format!(
                "poll tid={} nfds={} timeout={}ms",
                b.thread.description().tid,
                b.nfds,
                b.timeout_ms
            ),
            Blocker::Select(b) => {
                format!("select tid={} nfds={}", b.thread.description().tid, b.nfds)
            }
            Blocker::EpollWait(b) => format!(
                "epoll-wait tid={} epfd={} timeout={}ms",
                b.thread.description().tid,
                b.epfd.raw(),
                b.timeout_ms
            ),
            Blocker::Futex(b) => format!(
                "futex tid={} word={:#x} expected={} timeout={}",
                b.thread.description().tid,
                b.word_addr,
                b.expected,
                b.deadline.is_some()
            ),
        }
    }
}

pub fn read_pollfds(mmu: &dyn Mmu, addr: GuestAddr, nfds: usize) -> Vec<Pollfd> {
    let mut raw = vec![0u8; nfds * std::mem::size_of::<Pollfd>()];
    mmu.copy_from_mmu(&mut raw, addr);
    raw.chunks_exact(std::mem::size_of::<Pollfd>()).map(structs::read_struct).collect()
}

pub fn write_pollfds(mmu: &dyn Mmu, addr: GuestAddr, pfds: &[Pollfd]) {
    let mut raw = Vec::with_capacity(pfds.len() * std::mem::size_of::<Pollfd>());
    for pfd in pfds {
        raw.extend_from_slice(structs::bytes_of(pfd));
    }
    mmu.copy_to_mmu(addr, &raw);
}

pub fn read_fd_set(mmu: &dyn Mmu, addr: GuestAddr) -> FdSet {
    if addr == 0 {
        return FdSet::zeroed();
    }
    let mut raw = [0u8; std::mem::size_of::<FdSet>()];
    mmu.copy_from_mmu(&mut raw, addr);
    structs::read_struct(&raw)
}

pub fn write_fd_set(mmu: &dyn Mmu, addr: GuestAddr, set: &FdSet) {
    if addr != 0 {
        mmu.copy_to_mmu(addr, structs::bytes_of(set));
    }
}

pub fn write_epoll_events(mmu: &dyn Mmu, addr: GuestAddr, events: &[EpollEvent]) {
    let mut raw = Vec::with_capacity(events.len() * std::mem::size_of::<EpollEvent>());
    for event in events {
        raw.extend_from_slice(structs::bytes_of(event));
    }
    mmu.copy_to_mmu(addr, &raw);
}

/// Decodes an epoll interest mask from the guest word, used by epoll_ctl.
pub fn epoll_events_from_guest(raw: u32) -> EpollEvents {
    EpollEvents::from_bits_truncate(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::FlatMmu;

    fn boxed_thread(tid: i32) -> Box<Thread> {
        Box::new(Thread::new(1, tid))
    }

    #[test]
    fn sleep_blocker_fires_at_the_deadline() {
        let mmu = FlatMmu::new();
        let mut vfs = Vfs::new().unwrap();
        let mut timers = Timers::new();
        timers.get_or_try_create(0);
        let mut blocker = Blocker::Sleep(SleepBlocker {
            thread: boxed_thread(2),
            clock_id: 0,
            deadline: PreciseTime::from_nanos(1_000),
        });
        timers.update_all(PreciseTime::from_nanos(500));
        assert!(!blocker.try_unblock(&mut vfs, &mut timers, &mmu, PreciseTime::from_nanos(500)));
        timers.update_all(PreciseTime::from_nanos(1_500));
        assert!(blocker.try_unblock(&mut vfs, &mut timers, &mmu, PreciseTime::from_nanos(1_500)));
        assert_eq!(blocker.thread().cpu().regs.rax, 0);
    }

    #[test]
    fn futex_blocker_answers_directed_wakes_only() {
        let mmu = FlatMmu::new();
        let mut vfs = Vfs::new().unwrap();
        let mut timers = Timers::new();
        let mut blocker = Blocker::Futex(FutexBlocker {
            thread: boxed_thread(3),
            word_addr: 0x1000,
            expected: 1,
            deadline: None,
        });
        assert!(!blocker.try_unblock(&mut vfs, &mut timers, &mmu, PreciseTime::from_nanos(9_999)));
        assert!(!blocker.try_wake_futex(0x2000));
        assert!(blocker.try_wake_futex(0x1000));
        assert!(blocker.is_untimed_futex());
        assert!(!blocker.has_timeout());
    }

    #[test]
    fn futex_timeout_returns_etimedout() {
        let mmu = FlatMmu::new();
        let mut vfs = Vfs::new().unwrap();
        let mut timers = Timers::new();
        let mut blocker = Blocker::Futex(FutexBlocker {
            thread: boxed_thread(4),
            word_addr: 0x1000,
            expected: 1,
            deadline: Some(PreciseTime::from_nanos(100)),
        });
        assert!(blocker.try_unblock(&mut vfs, &mut timers, &mmu, PreciseTime::from_nanos(200)));
        assert_eq!(blocker.thread().cpu().regs.rax, Errno::ETIMEDOUT.to_ret() as u64);
    }

    #[test]
    fn poll_blocker_reports_ready_pipe_data() {
        let mmu = FlatMmu::new();
        let mut vfs = Vfs::new().unwrap();
        let mut timers = Timers::new();
        let (reader, writer) = vfs.pipe2(0).unwrap();

        let fds_addr = 0x3000;
        let pfd = Pollfd {
            fd: reader.raw(),
            events: procbox_abi::flags::PollEvents::IN.bits(),
            revents: 0,
        };
        write_pollfds(&mmu, fds_addr, &[pfd]);

        let mut blocker = Blocker::Poll(PollBlocker {
            thread: boxed_thread(5),
            fds_addr,
            nfds: 1,
            timeout_ms: -1,
            start: PreciseTime::ZERO,
        });
        assert!(!blocker.try_unblock(&mut vfs, &mut timers, &mmu, PreciseTime::ZERO));

        vfs.write(writer, b"hello").unwrap();
        assert!(blocker.try_unblock(&mut vfs, &mut timers, &mmu, PreciseTime::ZERO));
        assert_eq!(blocker.thread().cpu().regs.rax, 1);
        let back = read_pollfds(&mmu, fds_addr, 1);
        assert_ne!(back[0].revents & procbox_abi::flags::PollEvents::IN.bits(), 0);
    }

    #[test]
    fn poll_blocker_times_out_with_zero_ready() {
        let mmu = FlatMmu::new();
        let mut vfs = Vfs::new().unwrap();
        let mut timers = Timers::new();
        let (reader, _writer) = vfs.pipe2(0).unwrap();
        let fds_addr = 0x4000;
        let pfd = Pollfd {
            fd: reader.raw(),
            events: procbox_abi::flags::PollEvents::IN.bits(),
            revents: 0,
        };
        write_pollfds(&mmu, fds_addr, &[pfd]);
        let mut blocker = Blocker::Poll(PollBlocker {
            thread: boxed_thread(6),
            fds_addr,
            nfds: 1,
            timeout_ms: 10,
            start: PreciseTime::ZERO,
        });
        assert!(!blocker.try_unblock(&mut vfs, &mut timers, &mmu, PreciseTime::from_nanos(5_000_000)));
        assert!(blocker.try_unblock(&mut vfs, &mut timers, &mmu, PreciseTime::from_nanos(10_000_000)));
        assert_eq!(blocker.thread().cpu().regs.rax, 0);
    }

    #[test]
    fn epoll_blocker_writes_ready_events() {
        let mmu = FlatMmu::new();
        let mut vfs = Vfs::new().unwrap();
        let mut timers = Timers::new();
        let (reader, writer) = vfs.pipe2(0).unwrap();
        let epfd = vfs.epoll_create1(0).unwrap();
        vfs.epoll_ctl(epfd, procbox_abi::flags::EPOLL_CTL_ADD, reader, EpollEvents::IN, 0xbeef)
            .unwrap();

        let events_addr = 0x5000;
        let mut blocker = Blocker::EpollWait(EpollWaitBlocker {
            thread: boxed_thread(7),
            epfd,
            events_addr,
            maxevents: 8,
            timeout_ms: -1,
            start: PreciseTime::ZERO,
        });
        assert!(!blocker.try_unblock(&mut vfs, &mut timers, &mmu, PreciseTime::ZERO));
        vfs.write(writer, b"!").unwrap();
        assert!(blocker.try_unblock(&mut vfs, &mut timers, &mmu, PreciseTime::ZERO));
        assert_eq!(blocker.thread().cpu().regs.rax, 1);
        let mut raw = [0u8; std::mem::size_of::<EpollEvent>()];
        mmu.copy_from_mmu(&mut raw, events_addr);
        let event: EpollEvent = structs::read_struct(&raw);
        assert_eq!({ event.data }, 0xbeef);
    }
}
