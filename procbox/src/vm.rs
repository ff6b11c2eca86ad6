//! The CPU/JIT contract.
//!
//! The instruction decoder, IR generator and execute loop are external
//! collaborators; the scheduler only needs `execute` to run a thread until
//! it yields, requests the kernel ring, requests atomicity or spends its
//! slice, mutating the `Thread` in place. Each worker owns one `Vm`
//! instance produced by the factory.

use std::collections::BTreeMap;

use crate::task::Thread;

/// Static capabilities and tuning of one worker's VM.
#[derive(Clone, Debug)]
pub struct WorkerOptions {
    pub id: usize,
    pub can_run_syscalls: bool,
    pub can_run_atomics: bool,
    pub enable_jit: bool,
    pub optimization_level: i32,
}

pub trait Vm: Send {
    /// Runs the thread until it suspends. On return at least one of the
    /// suspension conditions holds: `time().is_stop_asked()`,
    /// `requests_syscall()` or `requests_atomic()`.
    fn execute(&mut self, thread: &mut Thread);

    /// Best-effort symbolization for profiling dumps and panic reports.
    fn try_retrieve_symbols(&mut self, addresses: &[u64], out: &mut BTreeMap<u64, String>) {
        let _ = (addresses, out);
    }
}

pub trait VmFactory: Send + Sync {
    fn create_vm(&self, worker: &WorkerOptions) -> Box<dyn Vm>;
}

impl<F> VmFactory for F
where
    F: Fn(&WorkerOptions) -> Box<dyn Vm> + Send + Sync,
{
    fn create_vm(&self, worker: &WorkerOptions) -> Box<dyn Vm> {
        self(worker)
    }
}
