//! The cooperative multi-core scheduler.
//!
//! Worker OS threads pull jobs out of a shared state guarded by one mutex.
//! A job is a contiguous execution interval of one guest thread in one of
//! three rings: parallel userspace, exclusive atomic userspace, or the
//! kernel ring (syscall layer, run with the lock held). Worker 0 is the
//! only worker allowed to run kernel and atomic jobs; everyone else runs
//! parallel userspace only.

pub mod blocker;

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::emulator::{Emulator, Kernel};
use crate::mem::{GuestAddr, Mmu};
use crate::task::Thread;
use crate::time::{PreciseTime, TimeDifference};
use crate::verify;
use crate::verify_unreachable;
use crate::vfs::fd::Fd;
use crate::vm::{Vm, WorkerOptions};

use blocker::{
    Blocker, EpollWaitBlocker, FutexBlocker, PollBlocker, SelectBlocker, SleepBlocker,
};

/// Userspace quantum, in kernel nanoseconds.
pub const DEFAULT_TIME_SLICE_NS: u64 = 10_000_000;
/// Atomic jobs run alone, so they get a much shorter quantum.
pub const ATOMIC_TIME_SLICE_NS: u64 = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ring {
    Userspace,
    Kernel,
}

#[derive(Clone, Copy, Debug)]
pub struct RunningJob {
    pub tid: i32,
    pub ring: Ring,
    pub atomic: bool,
}

/// Queue state: every live thread is in exactly one of `runnable`, a
/// blocker, or `running` (owned by a worker).
#[derive(Default)]
pub struct SchedState {
    pub runnable: VecDeque<Box<Thread>>,
    pub blockers: Vec<Blocker>,
    pub running: Vec<RunningJob>,
    highest_tid: i32,
    pub address_to_symbol: BTreeMap<u64, String>,
}

impl SchedState {
    /// Builds a thread with the next unused tid (monotonic, starting at 1).
    pub fn allocate_thread(&mut self, pid: i32, profiling: bool) -> Box<Thread> {
        self.highest_tid += 1;
        let mut thread = Box::new(Thread::new(pid, self.highest_tid));
        thread.set_profiling(profiling);
        thread
    }

    pub fn add_thread(&mut self, thread: Box<Thread>) {
        self.runnable.push_back(thread);
    }

    pub fn all_dead(&self) -> bool {
        self.running.is_empty() && self.runnable.is_empty() && self.blockers.is_empty()
    }

    pub fn all_blocked(&self) -> bool {
        self.running.is_empty() && self.runnable.is_empty()
    }

    fn running_counts(&self) -> (usize, usize, usize) {
        let mut userspace = 0;
        let mut atomic = 0;
        let mut kernel = 0;
        for job in &self.running {
            match (job.ring, job.atomic) {
                (Ring::Kernel, _) => kernel += 1,
                (Ring::Userspace, true) => atomic += 1,
                (Ring::Userspace, false) => userspace += 1,
            }
        }
        (userspace, atomic, kernel)
    }

    fn runnable_counts(&self) -> (usize, usize, usize) {
        let mut userspace = 0;
        let mut atomic = 0;
        let mut kernel = 0;
        for thread in &self.runnable {
            if thread.requests_syscall() {
                kernel += 1;
            } else if thread.requests_atomic() {
                atomic += 1;
            } else {
                userspace += 1;
            }
        }
        (userspace, atomic, kernel)
    }

    /// Whether a worker with the given capabilities could run something
    /// right now, honoring ring exclusivity and priority.
    pub fn has_runnable_for(&self, can_run_syscalls: bool, can_run_atomics: bool) -> bool {
        let (userspace_running, atomic_running, kernel_running) = self.running_counts();
        let (userspace_runnable, atomic_runnable, kernel_runnable) = self.runnable_counts();

        if can_run_syscalls {
            verify!(kernel_running <= 1, "more than one kernel job running");
            if kernel_runnable > 0 {
                return userspace_running + atomic_running == 0;
            }
        }
        if can_run_atomics {
            verify!(atomic_running <= 1, "more than one atomic job running");
            // syscalls have priority
            if kernel_running > 0 || kernel_runnable > 0 {
                return false;
            }
            if atomic_runnable > 0 {
                return userspace_running + kernel_running == 0;
            }
        }
        if kernel_running + kernel_runnable + atomic_running + atomic_runnable > 0 {
            false
        } else {
            userspace_runnable > 0
        }
    }

    pub fn for_each_thread(&self, mut f: impl FnMut(&Thread)) {
        for thread in &self.runnable {
            f(thread);
        }
        for blocker in &self.blockers {
            f(blocker.thread());
        }
    }

    fn finish_job(&mut self, tid: i32) {
        self.running.retain(|job| job.tid != tid);
    }

    pub fn dump_summary(&self) -> String {
        let mut out = String::new();
        out.push_str("threads:\n");
        self.for_each_thread(|thread| {
            out.push_str(&format!(
                "  {} syscall?={} atomic?={}\n",
                thread.summary(),
                thread.requests_syscall(),
                thread.requests_atomic()
            ));
        });
        out.push_str("blockers:\n");
        for blocker in &self.blockers {
            out.push_str(&format!("  {}\n", blocker.summary()));
        }
        out
    }
}

// ============================================================================
// Unblocking and futex wakes
// ============================================================================

/// One unblock pass over every blocker. Returns true when anything moved
/// to runnable.
pub(crate) fn try_unblock_threads(kernel: &mut Kernel, mmu: &dyn Mmu) -> bool {
    let now = kernel.current_time;
    kernel.timers.update_all(now);
    let Kernel { sched, vfs, timers, .. } = kernel;
    let mut did_unblock = false;
    let mut index = 0;
    while index < sched.blockers.len() {
        if sched.blockers[index].try_unblock(vfs, timers, mmu, now) {
            let blocker = sched.blockers.remove(index);
            sched.runnable.push_back(blocker.into_thread());
            did_unblock = true;
        } else {
            index += 1;
        }
    }
    did_unblock
}

/// FUTEX_WAKE: releases up to `nb_waiters` threads waiting on `word_addr`.
pub fn wake(kernel: &mut Kernel, word_addr: GuestAddr, nb_waiters: u32) -> u32 {
    let mut woken = 0;
    let mut index = 0;
    while index < kernel.sched.blockers.len() && woken < nb_waiters {
        if kernel.sched.blockers[index].try_wake_futex(word_addr) {
            let blocker = kernel.sched.blockers.remove(index);
            kernel.sched.runnable.push_back(blocker.into_thread());
            woken += 1;
        } else {
            index += 1;
        }
    }
    woken
}

/// FUTEX_WAKE_OP: apply an encoded operation to `*uaddr2`, wake `uaddr`,
/// and conditionally wake `uaddr2` depending on the old value.
pub fn wake_op(
    kernel: &mut Kernel,
    mmu: &dyn Mmu,
    uaddr: GuestAddr,
    val: u32,
    uaddr2: GuestAddr,
    val2: u32,
    val3: u32,
) -> u32 {
    use procbox_abi::flags as abi;

    let mut op = (val3 >> 28) & 0xf;
    let cmp = (val3 >> 24) & 0xf;
    let mut oparg = (val3 >> 12) & 0xfff;
    if op & 8 != 0 {
        oparg = 1 << oparg;
        op &= 0x7;
    }
    let cmparg = val3 & 0xfff;

    let oldval = mmu.read32(uaddr2);
    let newval = match op {
        abi::FUTEX_OP_SET => oparg,
        abi::FUTEX_OP_ADD => oldval.wrapping_add(oparg),
        abi::FUTEX_OP_OR => oldval | oparg,
        abi::FUTEX_OP_ANDN => oldval & !oparg,
        abi::FUTEX_OP_XOR => oldval ^ oparg,
        _ => verify_unreachable!("invalid futex wake-op operation {op}"),
    };
    mmu.write32(uaddr2, newval);

    let mut woken = wake(kernel, uaddr, val);

    let take_second = match cmp {
        abi::FUTEX_OP_CMP_EQ => oldval == cmparg,
        abi::FUTEX_OP_CMP_NE => oldval != cmparg,
        abi::FUTEX_OP_CMP_LT => oldval < cmparg,
        abi::FUTEX_OP_CMP_LE => oldval <= cmparg,
        abi::FUTEX_OP_CMP_GT => oldval > cmparg,
        abi::FUTEX_OP_CMP_GE => oldval >= cmparg,
        _ => verify_unreachable!("invalid futex wake-op comparison {cmp}"),
    };
    if take_second {
        woken += wake(kernel, uaddr2, val2);
    }
    woken
}

// ============================================================================
// Blocker installation (called from the syscall layer, kernel ring)
// ============================================================================

pub fn sleep(kernel: &mut Kernel, mut thread: Box<Thread>, clock_id: i32, deadline: PreciseTime) {
    thread.yield_now();
    kernel.sched.blockers.push(Blocker::Sleep(SleepBlocker { thread, clock_id, deadline }));
}

pub fn futex_wait(
    kernel: &mut Kernel,
    mut thread: Box<Thread>,
    word_addr: GuestAddr,
    expected: u32,
    deadline: Option<PreciseTime>,
) {
    thread.yield_now();
    thread.cpu_mut().regs.rax = 0;
    kernel
        .sched
        .blockers
        .push(Blocker::Futex(FutexBlocker { thread, word_addr, expected, deadline }));
}

pub fn poll(
    kernel: &mut Kernel,
    mut thread: Box<Thread>,
    fds_addr: GuestAddr,
    nfds: usize,
    timeout_ms: i32,
) {
    verify!(timeout_ms != 0, "poll with zero timeout should not reach the scheduler");
    thread.yield_now();
    let start = kernel.current_time;
    kernel
        .sched
        .blockers
        .push(Blocker::Poll(PollBlocker { thread, fds_addr, nfds, timeout_ms, start }));
}

#[allow(clippy::too_many_arguments)]
pub fn select(
    kernel: &mut Kernel,
    mut thread: Box<Thread>,
    nfds: i32,
    readfds_addr: GuestAddr,
    writefds_addr: GuestAddr,
    exceptfds_addr: GuestAddr,
    timeout: Option<TimeDifference>,
) {
    thread.yield_now();
    let deadline = timeout.map(|diff| kernel.current_time + diff);
    kernel.sched.blockers.push(Blocker::Select(SelectBlocker {
        thread,
        nfds,
        readfds_addr,
        writefds_addr,
        exceptfds_addr,
        deadline,
    }));
}

pub fn epoll_wait(
    kernel: &mut Kernel,
    mut thread: Box<Thread>,
    epfd: Fd,
    events_addr: GuestAddr,
    maxevents: usize,
    timeout_ms: i32,
) {
    verify!(timeout_ms != 0, "epoll_wait with zero timeout should not reach the scheduler");
    thread.yield_now();
    let start = kernel.current_time;
    kernel.sched.blockers.push(Blocker::EpollWait(EpollWaitBlocker {
        thread,
        epfd,
        events_addr,
        maxevents,
        timeout_ms,
        start,
    }));
}

// ============================================================================
// Termination
// ============================================================================

fn finish_thread(kernel: &mut Kernel, mmu: &dyn Mmu, mut thread: Box<Thread>, status: i32) {
    thread.set_exit_status(status);
    let clear_child_tid = thread.clear_child_tid();
    drop(thread);
    if clear_child_tid != 0 {
        mmu.write32(clear_child_tid, 0);
        wake(kernel, clear_child_tid, 1);
    }
}

/// Terminates the thread currently in the kernel ring.
pub fn terminate_current(kernel: &mut Kernel, mmu: &dyn Mmu, thread: Box<Thread>, status: i32) {
    finish_thread(kernel, mmu, thread, status);
    if kernel.sched.all_dead() && kernel.exit_status.is_none() {
        kernel.exit_status = Some(status);
    }
}

/// Terminates every queued and blocked thread. Runs in the kernel ring,
/// where no other job can be concurrent.
pub fn terminate_queued(kernel: &mut Kernel, mmu: &dyn Mmu, status: i32) {
    kernel.exit_status = Some(status);
    loop {
        let thread = if let Some(thread) = kernel.sched.runnable.pop_front() {
            thread
        } else if !kernel.sched.blockers.is_empty() {
            kernel.sched.blockers.remove(0).into_thread()
        } else {
            break;
        };
        finish_thread(kernel, mmu, thread, status);
    }
}

// ============================================================================
// Picking and the worker loop
// ============================================================================

pub(crate) enum Pick {
    Run { thread: Box<Thread>, ring: Ring, atomic: bool },
    Again,
    Wait,
    Exit,
    Abort,
}

pub(crate) fn try_pick_next(
    emulator: &Emulator,
    kernel: &mut Kernel,
    options: &WorkerOptions,
) -> Pick {
    if kernel.panicked {
        return Pick::Abort;
    }

    if try_unblock_threads(kernel, emulator.mmu()) {
        emulator.notify_runnable();
        return Pick::Again;
    }

    // all threads parked on untimed futexes and nothing runs: the guest
    // has deadlocked itself
    let deadlock = kernel.sched.all_blocked()
        && !kernel.sched.blockers.is_empty()
        && kernel.sched.blockers.iter().all(|blocker| blocker.is_untimed_futex());
    verify!(!deadlock, "DEADLOCK!\n{}", kernel.sched.dump_summary());

    if kernel.sched.all_dead() {
        emulator.notify_runnable();
        return Pick::Exit;
    }

    let find = |pred: &dyn Fn(&Thread) -> bool| -> Option<usize> {
        kernel.sched.runnable.iter().position(|thread| pred(thread))
    };

    // syscalls first, then exclusive userspace, then the parallel herd
    let mut picked = None;
    if options.can_run_syscalls {
        picked = find(&|thread| thread.requests_syscall());
    }
    if picked.is_none() && options.can_run_atomics {
        picked = find(&|thread| !thread.requests_syscall() && thread.requests_atomic());
    }
    if picked.is_none() {
        picked = find(&|thread| !thread.requests_syscall() && !thread.requests_atomic());
    }

    let Some(index) = picked else {
        let needs_time_to_pass =
            kernel.sched.blockers.iter().any(|blocker| blocker.has_timeout());
        if needs_time_to_pass {
            // time has to move for timed blockers to make progress
            kernel.current_time += TimeDifference::from_millis(1);
        }
        return Pick::Wait;
    };

    let thread = kernel.sched.runnable.remove(index).expect("index from position");
    let ring = if thread.requests_syscall() { Ring::Kernel } else { Ring::Userspace };
    let atomic = !thread.requests_syscall() && thread.requests_atomic();
    kernel.sched.running.push(RunningJob { tid: thread.description().tid, ring, atomic });
    Pick::Run { thread, ring, atomic }
}

/// One worker's main loop, driven until exit, abort or panic.
pub(crate) fn run_worker(emulator: &Emulator, options: WorkerOptions, mut vm: Box<dyn Vm>) {
    loop {
        if emulator.is_interrupted() {
            break;
        }
        let step = catch_unwind(AssertUnwindSafe(|| worker_iteration(emulator, &options, vm.as_mut())));
        match step {
            Ok(true) => continue,
            Ok(false) => break,
            Err(_) => {
                emulator.mark_panicked();
                break;
            }
        }
    }
    worker_shutdown(emulator, vm.as_mut());
}

fn worker_iteration(emulator: &Emulator, options: &WorkerOptions, vm: &mut dyn Vm) -> bool {
    let pick = {
        let mut kernel = emulator.lock_kernel();
        loop {
            let ready = kernel.panicked
                || kernel
                    .sched
                    .has_runnable_for(options.can_run_syscalls, options.can_run_atomics)
                || kernel.sched.all_dead()
                || kernel.sched.all_blocked();
            if ready {
                break;
            }
            emulator.wait_runnable(&mut kernel, Duration::from_millis(10));
            if emulator.is_interrupted() {
                return false;
            }
        }
        try_pick_next(emulator, &mut kernel, options)
    };

    match pick {
        Pick::Abort | Pick::Exit => false,
        Pick::Again => true,
        Pick::Wait => {
            // honor the wait: the host may need real time to make progress
            std::thread::sleep(Duration::from_millis(1));
            true
        }
        Pick::Run { thread, ring: Ring::Kernel, .. } => {
            run_kernel_job(emulator, thread);
            true
        }
        Pick::Run { thread, atomic: true, .. } => {
            run_atomic_job(emulator, vm, thread);
            true
        }
        Pick::Run { thread, .. } => {
            run_userspace_job(emulator, vm, thread);
            true
        }
    }
}

fn sync_current_time(kernel: &mut Kernel, thread: &Thread) {
    let thread_time = PreciseTime::from_nanos(thread.time().ns());
    if thread_time > kernel.current_time {
        kernel.current_time = thread_time;
    }
}

fn run_kernel_job(emulator: &Emulator, thread: Box<Thread>) {
    let tid = thread.description().tid;
    {
        let mut kernel = emulator.lock_kernel();
        verify!(kernel.sched.running.len() == 1, "jobs running while in kernel");
        let now = kernel.current_time;
        kernel.timers.update_all(now);
        let outcome = crate::syscall::dispatch(emulator, &mut kernel, thread);
        if let Some(mut thread) = outcome {
            thread.reset_syscall_request();
            sync_current_time(&mut kernel, &thread);
            kernel.sched.runnable.push_back(thread);
        }
        kernel.sched.finish_job(tid);
    }
    emulator.notify_runnable();
}

fn run_atomic_job(emulator: &Emulator, vm: &mut dyn Vm, mut thread: Box<Thread>) {
    let tid = thread.description().tid;
    {
        let mut kernel = emulator.lock_kernel();
        verify!(kernel.sched.running.len() == 1, "jobs running while atomic");
        let start = kernel.current_time.nanos();
        thread.time_mut().set_slice(start, ATOMIC_TIME_SLICE_NS);
        while !thread.time().is_stop_asked() {
            sync_current_time(&mut kernel, &thread);
            vm.execute(&mut thread);
        }
        sync_current_time(&mut kernel, &thread);
        thread.reset_atomic_request();
        kernel.sched.finish_job(tid);
        kernel.sched.runnable.push_back(thread);
    }
    emulator.notify_runnable();
}

fn run_userspace_job(emulator: &Emulator, vm: &mut dyn Vm, mut thread: Box<Thread>) {
    let tid = thread.description().tid;
    {
        let mut kernel = emulator.lock_kernel();
        let start = kernel.current_time.nanos();
        thread.time_mut().set_slice(start, DEFAULT_TIME_SLICE_NS);
    }
    while !thread.time().is_stop_asked() {
        {
            let mut kernel = emulator.lock_kernel();
            sync_current_time(&mut kernel, &thread);
        }
        vm.execute(&mut thread);
    }
    {
        let mut kernel = emulator.lock_kernel();
        sync_current_time(&mut kernel, &thread);
        kernel.sched.finish_job(tid);
        kernel.sched.runnable.push_back(thread);
    }
    emulator.notify_runnable();
}

/// Before a worker's VM dies: resolve symbols for profiling or, after a
/// panic, for the callstack dumps.
fn worker_shutdown(emulator: &Emulator, vm: &mut dyn Vm) {
    let mut kernel = emulator.lock_kernel();
    let mut addresses = Vec::new();
    if kernel.profiling {
        kernel.sched.for_each_thread(|thread| {
            for event in thread.events() {
                if let crate::task::ProfilingEvent::Call { address, .. } = event {
                    addresses.push(*address);
                }
            }
        });
    }
    if kernel.panicked {
        kernel.sched.for_each_thread(|thread| {
            addresses.extend_from_slice(thread.callstack());
        });
        tracing::error!("worker shutting down after panic\n{}", kernel.sched.dump_summary());
    }
    if !addresses.is_empty() {
        let mut symbols = BTreeMap::new();
        vm.try_retrieve_symbols(&addresses, &mut symbols);
        kernel.sched.address_to_symbol.extend(symbols);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runnable_thread(tid: i32, syscall: bool, atomic: bool) -> Box<Thread> {
        let mut thread = Box::new(Thread::new(1, tid));
        if syscall {
            thread.request_syscall();
        }
        if atomic {
            thread.request_atomic();
        }
        thread
    }

    #[test]
    fn tid_allocation_is_monotonic() {
        let mut sched = SchedState::default();
        let a = sched.allocate_thread(7, false);
        let b = sched.allocate_thread(7, false);
        assert_eq!(a.description().tid, 1);
        assert_eq!(b.description().tid, 2);
        assert_eq!(a.description().pid, 7);
    }

    #[test]
    fn kernel_work_requires_exclusivity() {
        let mut sched = SchedState::default();
        sched.add_thread(runnable_thread(1, true, false));
        // syscall-capable worker may take it when nothing runs
        assert!(sched.has_runnable_for(true, true));
        // but not while userspace is running
        sched.running.push(RunningJob { tid: 9, ring: Ring::Userspace, atomic: false });
        assert!(!sched.has_runnable_for(true, true));
        // and a userspace-only worker never sees kernel work
        sched.running.clear();
        assert!(!sched.has_runnable_for(false, false));
    }

    #[test]
    fn pending_kernel_work_starves_userspace() {
        let mut sched = SchedState::default();
        sched.add_thread(runnable_thread(1, true, false));
        sched.add_thread(runnable_thread(2, false, false));
        // plain workers must hold off while kernel work is pending
        assert!(!sched.has_runnable_for(false, false));
        // atomic-capable worker also yields to the syscall
        assert!(!sched.has_runnable_for(false, true));
    }

    #[test]
    fn atomic_needs_an_empty_machine() {
        let mut sched = SchedState::default();
        sched.add_thread(runnable_thread(1, false, true));
        assert!(sched.has_runnable_for(false, true));
        sched.running.push(RunningJob { tid: 9, ring: Ring::Userspace, atomic: false });
        assert!(!sched.has_runnable_for(false, true));
    }

    #[test]
    fn wake_op_decodes_the_operation_word() {
        // op=ADD(1), cmp=EQ(0), oparg=1, cmparg=0
        let val3 = (1u32 << 28) | (1 << 12);
        let mmu = crate::mem::FlatMmu::new();
        let vfs = crate::vfs::Vfs::new().unwrap();
        let mut kernel = Kernel::for_tests(vfs);
        mmu.write32(0x2000, 41);
        let woken = wake_op(&mut kernel, &mmu, 0x1000, 1, 0x2000, 1, val3);
        assert_eq!(woken, 0);
        assert_eq!(mmu.read32(0x2000), 42);
    }

    #[test]
    fn wake_op_shift_form_and_conditional_second_wake() {
        let mmu = crate::mem::FlatMmu::new();
        let vfs = crate::vfs::Vfs::new().unwrap();
        let mut kernel = Kernel::for_tests(vfs);

        // park two waiters, one per word
        futex_wait(&mut kernel, Box::new(Thread::new(1, 2)), 0x1000, 0, None);
        futex_wait(&mut kernel, Box::new(Thread::new(1, 3)), 0x2000, 0, None);
        assert_eq!(kernel.sched.blockers.len(), 2);

        // op = SET|8 (shift form): oparg=4 -> 1<<4 = 16; cmp GE, cmparg 3
        let val3 = ((8u32 | 0) << 28) | (5 << 24) | (4 << 12) | 3;
        mmu.write32(0x2000, 3);
        let woken = wake_op(&mut kernel, &mmu, 0x1000, 1, 0x2000, 1, val3);
        assert_eq!(mmu.read32(0x2000), 16);
        // oldval(3) >= cmparg(3): both words woken
        assert_eq!(woken, 2);
        assert!(kernel.sched.blockers.is_empty());
        assert_eq!(kernel.sched.runnable.len(), 2);
    }

    #[test]
    fn wake_releases_at_most_n_waiters() {
        let vfs = crate::vfs::Vfs::new().unwrap();
        let mut kernel = Kernel::for_tests(vfs);
        for tid in 2..5 {
            futex_wait(&mut kernel, Box::new(Thread::new(1, tid)), 0xabc0, 7, None);
        }
        assert_eq!(wake(&mut kernel, 0xabc0, 2), 2);
        assert_eq!(kernel.sched.blockers.len(), 1);
        assert_eq!(wake(&mut kernel, 0xdead, 5), 0);
        assert_eq!(wake(&mut kernel, 0xabc0, 5), 1);
    }

    #[test]
    fn terminate_queued_wakes_child_tid_watchers() {
        let mmu = crate::mem::FlatMmu::new();
        let vfs = crate::vfs::Vfs::new().unwrap();
        let mut kernel = Kernel::for_tests(vfs);

        // a watcher blocked on the child tid word
        let child_tid_addr = 0x7000;
        mmu.write32(child_tid_addr, 55);
        futex_wait(&mut kernel, Box::new(Thread::new(1, 2)), child_tid_addr, 55, None);

        // the dying thread carries the clear_child_tid address
        let mut dying = Box::new(Thread::new(1, 3));
        dying.set_clear_child_tid(child_tid_addr);
        kernel.sched.add_thread(dying);

        terminate_queued(&mut kernel, &mmu, 0);
        assert_eq!(mmu.read32(child_tid_addr), 0);
        // the watcher was woken and then terminated too
        assert!(kernel.sched.all_dead());
        assert_eq!(kernel.exit_status, Some(0));
    }
}
