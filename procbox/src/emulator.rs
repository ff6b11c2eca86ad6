//! The emulator context: one guest process.
//!
//! All mutable kernel-side state (VFS, timers, scheduler queues, kernel
//! time) lives behind a single mutex; that one lock is the entire
//! concurrency story of the kernel ring. Workers share the `Mmu`
//! lock-free while running userspace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{EmulatorError, EmulatorResult};
use crate::mem::Mmu;
use crate::sched::{self, SchedState};
use crate::task::Thread;
use crate::time::{PreciseTime, Timers};
use crate::verify;
use crate::vfs::Vfs;
use crate::vm::{VmFactory, WorkerOptions};

/// Knobs of one emulator instance, in the spirit of a runtime options
/// struct: everything is overridable, defaults are sensible.
#[derive(Clone, Debug)]
pub struct EmulatorConfig {
    /// Number of worker OS threads (virtual cores).
    pub nb_cores: usize,
    pub enable_jit: bool,
    pub optimization_level: i32,
    /// Emit one `tracing` debug line per syscall.
    pub log_syscalls: bool,
    /// Record per-thread call/ret/syscall events.
    pub profiling: bool,
}

impl Default for EmulatorConfig {
    fn default() -> EmulatorConfig {
        EmulatorConfig {
            nb_cores: 1,
            enable_jit: true,
            optimization_level: 2,
            log_syscalls: false,
            profiling: false,
        }
    }
}

/// Everything the scheduler mutex protects.
pub struct Kernel {
    pub vfs: Vfs,
    pub timers: Timers,
    pub sched: SchedState,
    pub current_time: PreciseTime,
    pub panicked: bool,
    pub exit_status: Option<i32>,
    pub log_syscalls: bool,
    pub profiling: bool,
}

impl Kernel {
    fn new(vfs: Vfs, config: &EmulatorConfig) -> Kernel {
        Kernel {
            vfs,
            timers: Timers::new(),
            sched: SchedState::default(),
            current_time: PreciseTime::ZERO,
            panicked: false,
            exit_status: None,
            log_syscalls: config.log_syscalls,
            profiling: config.profiling,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(vfs: Vfs) -> Kernel {
        Kernel::new(vfs, &EmulatorConfig::default())
    }
}

pub struct Emulator {
    mmu: Arc<dyn Mmu>,
    state: Mutex<Kernel>,
    has_runnable: Condvar,
    interrupt: AtomicBool,
    config: EmulatorConfig,
}

impl Emulator {
    pub fn new(mmu: Arc<dyn Mmu>, config: EmulatorConfig) -> EmulatorResult<Emulator> {
        if config.nb_cores == 0 {
            return Err(EmulatorError::Config("nb_cores must be at least 1".into()));
        }
        let vfs = Vfs::new()?;
        let kernel = Kernel::new(vfs, &config);
        Ok(Emulator {
            mmu,
            state: Mutex::new(kernel),
            has_runnable: Condvar::new(),
            interrupt: AtomicBool::new(false),
            config,
        })
    }

    pub fn mmu(&self) -> &dyn Mmu {
        self.mmu.as_ref()
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub(crate) fn lock_kernel(&self) -> MutexGuard<'_, Kernel> {
        self.state.lock()
    }

    /// Runs `f` under the scheduler lock. This is how embedders seed
    /// threads and inspect state between runs.
    pub fn with_kernel<R>(&self, f: impl FnOnce(&mut Kernel) -> R) -> R {
        let mut kernel = self.state.lock();
        f(&mut kernel)
    }

    pub(crate) fn wait_runnable(&self, guard: &mut MutexGuard<'_, Kernel>, timeout: Duration) {
        self.has_runnable.wait_for(guard, timeout);
    }

    pub(crate) fn notify_runnable(&self) {
        self.has_runnable.notify_all();
    }

    /// The process-wide interrupt flag polled by workers.
    pub fn request_interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        self.has_runnable.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_panicked(&self) {
        let mut kernel = self.state.lock();
        kernel.panicked = true;
        drop(kernel);
        self.has_runnable.notify_all();
    }

    pub fn has_panicked(&self) -> bool {
        self.state.lock().panicked
    }

    /// Registers the loaded program: procfs entries plus the main thread
    /// with its initial CPU state. Returns the main thread's tid.
    pub fn load_program(&self, pid: i32, program_path: &str, rip: u64, rsp: u64) -> i32 {
        let mut kernel = self.state.lock();
        kernel.vfs.reset_proc_fs(pid, program_path);
        let profiling = kernel.profiling;
        let mut thread = kernel.sched.allocate_thread(pid, profiling);
        verify!(thread.description().tid == 1, "the main thread must be tid 1");
        thread.cpu_mut().regs.rip = rip;
        thread.cpu_mut().regs.rsp = rsp;
        let tid = thread.description().tid;
        kernel.sched.add_thread(thread);
        drop(kernel);
        self.has_runnable.notify_all();
        tid
    }

    /// Adds an already-built thread (used by scripted test VMs).
    pub fn add_thread(&self, thread: Box<Thread>) {
        let mut kernel = self.state.lock();
        kernel.sched.add_thread(thread);
        drop(kernel);
        self.has_runnable.notify_all();
    }

    /// Allocates a thread without scheduling it.
    pub fn allocate_thread(&self, pid: i32) -> Box<Thread> {
        let mut kernel = self.state.lock();
        let profiling = kernel.profiling;
        kernel.sched.allocate_thread(pid, profiling)
    }

    /// Drives the guest to completion on `nb_cores` workers. Returns the
    /// process exit status, when one was recorded.
    pub fn run(&self, factory: &dyn VmFactory) -> Option<i32> {
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.config.nb_cores);
            for id in 0..self.config.nb_cores {
                let options = WorkerOptions {
                    id,
                    // the first worker is the only one allowed kernel and
                    // atomic jobs
                    can_run_syscalls: id == 0,
                    can_run_atomics: id == 0,
                    enable_jit: self.config.enable_jit,
                    optimization_level: self.config.optimization_level,
                };
                let vm = factory.create_vm(&options);
                handles.push(scope.spawn(move || sched::run_worker(self, options, vm)));
            }
            for handle in handles {
                let _ = handle.join();
            }
        });
        self.state.lock().exit_status
    }

    /// Drains the recorded profiling events, symbol map included.
    pub fn retrieve_profiling_data(&self) -> ProfilingData {
        let kernel = self.state.lock();
        let mut data = ProfilingData::default();
        kernel.sched.for_each_thread(|thread| {
            let description = thread.description();
            let events = thread.events().copied().collect();
            data.threads.push(ThreadProfilingData {
                pid: description.pid,
                tid: description.tid,
                events,
            });
        });
        data.symbols = kernel.sched.address_to_symbol.clone();
        data
    }
}

/// Per-thread profiling events plus the shared symbol map; serialization
/// is a consumer concern.
#[derive(Default)]
pub struct ProfilingData {
    pub threads: Vec<ThreadProfilingData>,
    pub symbols: std::collections::BTreeMap<u64, String>,
}

pub struct ThreadProfilingData {
    pub pid: i32,
    pub tid: i32,
    pub events: Vec<crate::task::ProfilingEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::FlatMmu;

    #[test]
    fn zero_cores_is_a_config_error() {
        let mmu = Arc::new(FlatMmu::new());
        let config = EmulatorConfig { nb_cores: 0, ..EmulatorConfig::default() };
        assert!(matches!(Emulator::new(mmu, config), Err(EmulatorError::Config(_))));
    }

    #[test]
    fn load_program_seeds_main_thread_and_procfs() {
        let mmu = Arc::new(FlatMmu::new());
        let emulator = Emulator::new(mmu, EmulatorConfig::default()).unwrap();
        let tid = emulator.load_program(100, "/bin/prog", 0x401000, 0x7fff_0000);
        assert_eq!(tid, 1);
        emulator.with_kernel(|kernel| {
            assert_eq!(kernel.sched.runnable.len(), 1);
            let exe = kernel.vfs.readlink("/proc/100/exe", 64).unwrap();
            assert_eq!(exe, b"/bin/prog");
        });
    }

    #[test]
    fn interrupt_flag_round_trips() {
        let mmu = Arc::new(FlatMmu::new());
        let emulator = Emulator::new(mmu, EmulatorConfig::default()).unwrap();
        assert!(!emulator.is_interrupted());
        emulator.request_interrupt();
        assert!(emulator.is_interrupted());
    }
}
