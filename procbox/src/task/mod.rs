//! Guest threads.
//!
//! A `Thread` is the saved CPU state of one guest thread of execution plus
//! the bookkeeping the scheduler and syscall layer need: request flags,
//! the time slice, statistics and the profiling event log. The VM mutates
//! the thread while it runs a userspace job; everything else happens in
//! the kernel ring.

use std::collections::VecDeque;

use crate::mem::GuestAddr;

/// Cap on buffered profiling events per thread; older events are dropped.
const PROFILING_EVENT_CAP: usize = 1 << 16;

/// General-purpose registers plus rip, in the order the syscall ABI reads
/// them.
#[derive(Clone, Copy, Debug, Default)]
pub struct Registers {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
}

impl Registers {
    /// The six syscall argument registers, in ABI order.
    pub fn syscall_args(&self) -> [u64; 6] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SavedCpuState {
    pub regs: Registers,
    pub fs_base: u64,
}

/// The execution budget a job runs under. The VM increments
/// `instructions` and asks for a stop once the slice is spent.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeSlice {
    start_ns: u64,
    quantum_ns: u64,
    instructions: u64,
    stop_asked: bool,
}

impl TimeSlice {
    /// Nanoseconds of guest time represented by one instruction.
    pub const NS_PER_INSTRUCTION: u64 = 1;

    pub fn set_slice(&mut self, start_ns: u64, quantum_ns: u64) {
        self.start_ns = start_ns;
        self.quantum_ns = quantum_ns;
        self.stop_asked = false;
    }

    /// Guest-time position of this thread, in nanoseconds.
    pub fn ns(&self) -> u64 {
        self.start_ns + self.instructions * Self::NS_PER_INSTRUCTION
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Accounts executed instructions and trips the stop flag when the
    /// slice is spent.
    pub fn advance(&mut self, instructions: u64) {
        self.instructions += instructions;
        if self.instructions * Self::NS_PER_INSTRUCTION >= self.quantum_ns {
            self.stop_asked = true;
        }
    }

    pub fn is_stop_asked(&self) -> bool {
        self.stop_asked
    }

    pub fn ask_stop(&mut self) {
        self.stop_asked = true;
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadStats {
    pub syscalls: u64,
    pub function_calls: u64,
}

/// Profiling events, recorded by the running VM (single producer) and
/// drained under the scheduler lock.
#[derive(Clone, Copy, Debug)]
pub enum ProfilingEvent {
    Call { tick: u64, address: u64 },
    Ret { tick: u64 },
    Syscall { tick: u64, number: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadDescription {
    pub pid: i32,
    pub tid: i32,
}

#[derive(Debug)]
pub struct Thread {
    description: ThreadDescription,
    cpu: SavedCpuState,
    time: TimeSlice,
    stats: ThreadStats,
    clear_child_tid: GuestAddr,
    robust_list_head: GuestAddr,
    robust_list_len: u64,
    requests_syscall: bool,
    requests_atomic: bool,
    exit_status: Option<i32>,
    profiling: bool,
    events: VecDeque<ProfilingEvent>,
    callstack: Vec<u64>,
}

impl Thread {
    pub fn new(pid: i32, tid: i32) -> Thread {
        Thread {
            description: ThreadDescription { pid, tid },
            cpu: SavedCpuState::default(),
            time: TimeSlice::default(),
            stats: ThreadStats::default(),
            clear_child_tid: 0,
            robust_list_head: 0,
            robust_list_len: 0,
            requests_syscall: false,
            requests_atomic: false,
            exit_status: None,
            profiling: false,
            events: VecDeque::new(),
            callstack: Vec::new(),
        }
    }

    pub fn description(&self) -> ThreadDescription {
        self.description
    }

    pub fn cpu(&self) -> &SavedCpuState {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut SavedCpuState {
        &mut self.cpu
    }

    pub fn time(&self) -> &TimeSlice {
        &self.time
    }

    pub fn time_mut(&mut self) -> &mut TimeSlice {
        &mut self.time
    }

    pub fn stats(&self) -> ThreadStats {
        self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ThreadStats {
        &mut self.stats
    }

    /// Relinquishes the rest of the current slice.
    pub fn yield_now(&mut self) {
        self.time.ask_stop();
    }

    // request flags: set by the VM when the guest needs the kernel ring
    // or an exclusive (atomic) slice

    pub fn requests_syscall(&self) -> bool {
        self.requests_syscall
    }

    pub fn request_syscall(&mut self) {
        self.requests_syscall = true;
        self.time.ask_stop();
    }

    pub fn reset_syscall_request(&mut self) {
        self.requests_syscall = false;
    }

    pub fn requests_atomic(&self) -> bool {
        self.requests_atomic
    }

    pub fn request_atomic(&mut self) {
        self.requests_atomic = true;
        self.time.ask_stop();
    }

    pub fn reset_atomic_request(&mut self) {
        self.requests_atomic = false;
    }

    pub fn clear_child_tid(&self) -> GuestAddr {
        self.clear_child_tid
    }

    pub fn set_clear_child_tid(&mut self, addr: GuestAddr) {
        self.clear_child_tid = addr;
    }

    pub fn set_robust_list(&mut self, head: GuestAddr, len: u64) {
        self.robust_list_head = head;
        self.robust_list_len = len;
    }

    pub fn robust_list(&self) -> (GuestAddr, u64) {
        (self.robust_list_head, self.robust_list_len)
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn set_exit_status(&mut self, status: i32) {
        self.exit_status = Some(status);
    }

    pub fn set_profiling(&mut self, enabled: bool) {
        self.profiling = enabled;
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling
    }

    fn push_event(&mut self, event: ProfilingEvent) {
        if self.events.len() == PROFILING_EVENT_CAP {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Recorded by the VM on a call instruction.
    pub fn did_call(&mut self, address: u64) {
        self.stats.function_calls += 1;
        self.callstack.push(address);
        if self.profiling {
            self.push_event(ProfilingEvent::Call { tick: self.time.instructions(), address });
        }
    }

    /// Recorded by the VM on a ret instruction.
    pub fn did_ret(&mut self) {
        self.callstack.pop();
        if self.profiling {
            self.push_event(ProfilingEvent::Ret { tick: self.time.instructions() });
        }
    }

    /// Recorded by the syscall layer on dispatch.
    pub fn did_syscall(&mut self, number: u64) {
        if self.profiling {
            self.push_event(ProfilingEvent::Syscall { tick: self.time.instructions(), number });
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &ProfilingEvent> {
        self.events.iter()
    }

    pub fn callstack(&self) -> &[u64] {
        &self.callstack
    }

    pub fn summary(&self) -> String {
        format!(
            "thread pid={} tid={} rip={:#x} instructions={} syscalls={}",
            self.description.pid,
            self.description.tid,
            self.cpu.regs.rip,
            self.time.instructions(),
            self.stats.syscalls,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_expiry_asks_for_a_stop() {
        let mut slice = TimeSlice::default();
        slice.set_slice(0, 100);
        slice.advance(99);
        assert!(!slice.is_stop_asked());
        slice.advance(1);
        assert!(slice.is_stop_asked());
        // a new slice clears the flag but keeps the instruction count
        slice.set_slice(slice.ns(), 100);
        assert!(!slice.is_stop_asked());
        assert_eq!(slice.instructions(), 100);
    }

    #[test]
    fn syscall_request_also_yields() {
        let mut thread = Thread::new(1, 1);
        thread.time_mut().set_slice(0, 1_000_000);
        thread.request_syscall();
        assert!(thread.requests_syscall());
        assert!(thread.time().is_stop_asked());
        thread.reset_syscall_request();
        assert!(!thread.requests_syscall());
    }

    #[test]
    fn profiling_events_are_bounded() {
        let mut thread = Thread::new(1, 2);
        thread.set_profiling(true);
        for address in 0..(PROFILING_EVENT_CAP + 10) as u64 {
            thread.did_call(address);
        }
        assert_eq!(thread.events().count(), PROFILING_EVENT_CAP);
    }

    #[test]
    fn callstack_tracks_calls_and_rets() {
        let mut thread = Thread::new(1, 3);
        thread.did_call(0x1000);
        thread.did_call(0x2000);
        thread.did_ret();
        assert_eq!(thread.callstack(), &[0x1000]);
        assert_eq!(thread.stats().function_calls, 2);
    }

    #[test]
    fn syscall_args_follow_the_abi_order() {
        let mut thread = Thread::new(1, 4);
        let regs = &mut thread.cpu_mut().regs;
        regs.rdi = 1;
        regs.rsi = 2;
        regs.rdx = 3;
        regs.r10 = 4;
        regs.r8 = 5;
        regs.r9 = 6;
        assert_eq!(thread.cpu().regs.syscall_args(), [1, 2, 3, 4, 5, 6]);
    }
}
