//! End-to-end scenarios driven through scripted VMs.
//!
//! Each test seeds guest threads with a step script; steps either perform
//! userspace work against the MMU or arm a syscall and trap into the
//! kernel ring, exactly the way the real CPU front-end would. A thread
//! whose script runs dry exits cleanly.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use procbox::mem::{FlatMmu, Mmu};
use procbox::task::Thread;
use procbox::vm::{Vm, WorkerOptions};
use procbox::{Emulator, EmulatorConfig};
use procbox_abi::flags as abi;
use procbox_abi::nr;
use procbox_abi::structs::{self, Pollfd};

type StepFn = Box<dyn FnOnce(&mut Thread, &dyn Mmu) + Send>;

enum Step {
    /// Userspace work: runs inline, execution continues.
    Run(StepFn),
    /// Arm registers for a syscall and trap into the kernel ring.
    Syscall(StepFn),
    /// Give up the slice without trapping.
    Yield,
}

type ScriptMap = Arc<Mutex<HashMap<i32, VecDeque<Step>>>>;

struct ScriptedVm {
    mmu: Arc<FlatMmu>,
    scripts: ScriptMap,
}

impl Vm for ScriptedVm {
    fn execute(&mut self, thread: &mut Thread) {
        let tid = thread.description().tid;
        let mut scripts = self.scripts.lock().unwrap();
        let steps = scripts.entry(tid).or_default();
        loop {
            thread.time_mut().advance(1);
            match steps.pop_front() {
                Some(Step::Run(step)) => {
                    step(thread, self.mmu.as_ref());
                }
                Some(Step::Syscall(step)) => {
                    step(thread, self.mmu.as_ref());
                    thread.request_syscall();
                    return;
                }
                Some(Step::Yield) => {
                    thread.yield_now();
                    return;
                }
                None => {
                    // script exhausted: exit(0)
                    thread.cpu_mut().regs.rax = nr::EXIT;
                    thread.cpu_mut().regs.rdi = 0;
                    thread.request_syscall();
                    return;
                }
            }
        }
    }
}

struct Rig {
    mmu: Arc<FlatMmu>,
    emulator: Arc<Emulator>,
    scripts: ScriptMap,
    results: Arc<Mutex<Vec<i64>>>,
}

impl Rig {
    fn new() -> Rig {
        Rig::with_config(EmulatorConfig::default())
    }

    fn with_config(config: EmulatorConfig) -> Rig {
        let mmu = Arc::new(FlatMmu::new());
        let emulator = Arc::new(Emulator::new(mmu.clone(), config).expect("emulator"));
        Rig {
            mmu,
            emulator,
            scripts: Arc::new(Mutex::new(HashMap::new())),
            results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn spawn_thread(&self, steps: Vec<Step>) -> i32 {
        let thread = self.emulator.allocate_thread(1);
        let tid = thread.description().tid;
        self.scripts.lock().unwrap().insert(tid, steps.into());
        self.emulator.add_thread(thread);
        tid
    }

    /// Registers a script for a tid that will be created later (clone).
    fn script_for(&self, tid: i32, steps: Vec<Step>) {
        self.scripts.lock().unwrap().insert(tid, steps.into());
    }

    fn run(&self) -> Option<i32> {
        let mmu = self.mmu.clone();
        let scripts = self.scripts.clone();
        let factory = move |_options: &WorkerOptions| -> Box<dyn Vm> {
            Box::new(ScriptedVm { mmu: mmu.clone(), scripts: scripts.clone() })
        };
        self.emulator.run(&factory)
    }

    fn recorded(&self) -> Vec<i64> {
        self.results.lock().unwrap().clone()
    }

    /// A step that records RAX (the result of the previous syscall).
    fn record_ret(&self) -> Step {
        let results = self.results.clone();
        Step::Run(Box::new(move |thread, _mmu| {
            results.lock().unwrap().push(thread.cpu().regs.rax as i64);
        }))
    }
}

/// A step arming a plain six-argument syscall.
fn sys(number: u64, args: [u64; 6]) -> Step {
    Step::Syscall(Box::new(move |thread, _mmu| {
        let regs = &mut thread.cpu_mut().regs;
        regs.rax = number;
        regs.rdi = args[0];
        regs.rsi = args[1];
        regs.rdx = args[2];
        regs.r10 = args[3];
        regs.r8 = args[4];
        regs.r9 = args[5];
    }))
}

/// A step arming a syscall with late-bound arguments.
fn sys_with(
    number: u64,
    f: impl FnOnce(&mut Thread, &dyn Mmu) -> [u64; 6] + Send + 'static,
) -> Step {
    Step::Syscall(Box::new(move |thread, mmu| {
        let args = f(thread, mmu);
        let regs = &mut thread.cpu_mut().regs;
        regs.rax = number;
        regs.rdi = args[0];
        regs.rsi = args[1];
        regs.rdx = args[2];
        regs.r10 = args[3];
        regs.r8 = args[4];
        regs.r9 = args[5];
    }))
}

fn write_cstr(mmu: &dyn Mmu, addr: u64, s: &str) {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    mmu.copy_to_mmu(addr, &bytes);
}

// ============================================================================
// S1: pipe + poll + read
// ============================================================================

#[test]
fn pipe_poll_read_hands_bytes_across_threads() {
    let rig = Rig::new();
    let (reader, writer) =
        rig.emulator.with_kernel(|kernel| kernel.vfs.pipe2(0).expect("pipe2"));

    const FDS: u64 = 0x10_000;
    const BUF: u64 = 0x11_000;
    const MSG: u64 = 0x12_000;

    let results = rig.results.clone();
    rig.spawn_thread(vec![
        // poll({pipe-reader, POLLIN}, timeout = -1): blocks until the
        // writer thread delivers
        Step::Run(Box::new(move |_thread, mmu| {
            let pfd = Pollfd { fd: reader.raw(), events: abi::PollEvents::IN.bits(), revents: 0 };
            mmu.copy_to_mmu(FDS, structs::bytes_of(&pfd));
        })),
        sys(nr::POLL, [FDS, 1, u64::MAX, 0, 0, 0]),
        rig.record_ret(),
        Step::Run(Box::new(move |_thread, mmu| {
            let mut raw = [0u8; std::mem::size_of::<Pollfd>()];
            mmu.copy_from_mmu(&mut raw, FDS);
            let pfd: Pollfd = structs::read_struct(&raw);
            assert_ne!(pfd.revents & abi::PollEvents::IN.bits(), 0, "POLLIN must be set");
        })),
        sys(nr::READ, [reader.raw() as u64, BUF, 16, 0, 0, 0]),
        rig.record_ret(),
        Step::Run(Box::new(move |_thread, mmu| {
            let mut received = [0u8; 5];
            mmu.copy_from_mmu(&mut received, BUF);
            assert_eq!(&received, b"hello");
        })),
    ]);

    rig.spawn_thread(vec![
        Step::Yield,
        Step::Run(Box::new(move |_thread, mmu| {
            mmu.copy_to_mmu(MSG, b"hello");
        })),
        sys(nr::WRITE, [writer.raw() as u64, MSG, 5, 0, 0, 0]),
        rig.record_ret(),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert!(!rig.emulator.has_panicked());
    let recorded = results.lock().unwrap().clone();
    // poll saw one ready fd, the write moved 5 bytes, the read got them
    assert!(recorded.contains(&1));
    assert!(recorded.contains(&5));
    assert_eq!(recorded.iter().filter(|&&value| value == 5).count(), 2);
}

// ============================================================================
// S2: futex as a mutex handoff
// ============================================================================

#[test]
fn futex_wait_wake_handoff() {
    let rig = Rig::new();
    const WORD: u64 = 0x20_000;
    rig.mmu.write32(WORD, 1);

    rig.spawn_thread(vec![
        // A: wait while *WORD == 1
        sys(nr::FUTEX, [WORD, abi::FUTEX_WAIT as u64, 1, 0, 0, 0]),
        rig.record_ret(),
        Step::Run(Box::new(move |_thread, mmu| {
            assert_eq!(mmu.read32(WORD), 0, "woken thread must observe the store");
        })),
    ]);

    rig.spawn_thread(vec![
        Step::Yield,
        // B: store 0 then wake one waiter
        Step::Run(Box::new(move |_thread, mmu| {
            mmu.write32(WORD, 0);
        })),
        sys(nr::FUTEX, [WORD, abi::FUTEX_WAKE as u64, 1, 0, 0, 0]),
        rig.record_ret(),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert!(!rig.emulator.has_panicked());
    assert_eq!(rig.recorded(), vec![0, 1]);
}

// ============================================================================
// S3: openat + writev + readv
// ============================================================================

#[test]
fn openat_writev_readv_round_trip() {
    let rig = Rig::new();
    const PATH: u64 = 0x30_000;
    const IOV: u64 = 0x31_000;
    const DATA_AB: u64 = 0x32_000;
    const DATA_CDE: u64 = 0x33_000;
    const READ_1: u64 = 0x34_000;
    const READ_2: u64 = 0x35_000;

    let fd_slot = Arc::new(Mutex::new(0u64));
    let fd_for_writev = fd_slot.clone();
    let fd_for_lseek = fd_slot.clone();
    let fd_for_readv = fd_slot.clone();
    let fd_capture = fd_slot.clone();

    rig.spawn_thread(vec![
        Step::Run(Box::new(move |_thread, mmu| {
            write_cstr(mmu, PATH, "/tmp/procbox-scenario-x");
            mmu.copy_to_mmu(DATA_AB, b"ab");
            mmu.copy_to_mmu(DATA_CDE, b"cde");
        })),
        sys(
            nr::OPENAT,
            [
                abi::AT_FDCWD as i64 as u64,
                PATH,
                (abi::O_RDWR | abi::O_CREAT) as u64,
                0o644,
                0,
                0,
            ],
        ),
        Step::Run(Box::new(move |thread, _mmu| {
            *fd_capture.lock().unwrap() = thread.cpu().regs.rax;
        })),
        sys_with(nr::WRITEV, move |_thread, mmu| {
            let iovecs = [
                structs::Iovec { base: DATA_AB, len: 2 },
                structs::Iovec { base: DATA_CDE, len: 3 },
            ];
            mmu.copy_to_mmu(IOV, structs::bytes_of(&iovecs[0]));
            mmu.copy_to_mmu(IOV + 16, structs::bytes_of(&iovecs[1]));
            [*fd_for_writev.lock().unwrap(), IOV, 2, 0, 0, 0]
        }),
        rig.record_ret(),
        sys_with(nr::LSEEK, move |_thread, _mmu| {
            [*fd_for_lseek.lock().unwrap(), 0, abi::SEEK_SET as u64, 0, 0, 0]
        }),
        sys_with(nr::READV, move |_thread, mmu| {
            let iovecs = [
                structs::Iovec { base: READ_1, len: 2 },
                structs::Iovec { base: READ_2, len: 3 },
            ];
            mmu.copy_to_mmu(IOV, structs::bytes_of(&iovecs[0]));
            mmu.copy_to_mmu(IOV + 16, structs::bytes_of(&iovecs[1]));
            [*fd_for_readv.lock().unwrap(), IOV, 2, 0, 0, 0]
        }),
        rig.record_ret(),
        Step::Run(Box::new(move |_thread, mmu| {
            let mut first = [0u8; 2];
            let mut second = [0u8; 3];
            mmu.copy_from_mmu(&mut first, READ_1);
            mmu.copy_from_mmu(&mut second, READ_2);
            assert_eq!(&first, b"ab");
            assert_eq!(&second, b"cde");
        })),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert!(!rig.emulator.has_panicked());
    assert_eq!(rig.recorded(), vec![5, 5]);
}

// ============================================================================
// S4: dup2 shares one open-file description
// ============================================================================

#[test]
fn dup2_shares_offset_across_descriptors() {
    let rig = Rig::new();
    const PATH: u64 = 0x40_000;

    let fd_slot = Arc::new(Mutex::new(0u64));
    let fd_for_dup = fd_slot.clone();
    let fd_for_lseek = fd_slot.clone();
    let fd_capture = fd_slot.clone();

    rig.spawn_thread(vec![
        Step::Run(Box::new(move |_thread, mmu| {
            write_cstr(mmu, PATH, "/tmp/procbox-scenario-dup");
        })),
        sys(
            nr::OPENAT,
            [
                abi::AT_FDCWD as i64 as u64,
                PATH,
                (abi::O_RDWR | abi::O_CREAT) as u64,
                0o644,
                0,
                0,
            ],
        ),
        Step::Run(Box::new(move |thread, _mmu| {
            *fd_capture.lock().unwrap() = thread.cpu().regs.rax;
        })),
        sys_with(nr::DUP2, move |_thread, _mmu| {
            [*fd_for_dup.lock().unwrap(), 7, 0, 0, 0, 0]
        }),
        rig.record_ret(),
        sys_with(nr::LSEEK, move |_thread, _mmu| {
            [*fd_for_lseek.lock().unwrap(), 10, abi::SEEK_SET as u64, 0, 0, 0]
        }),
        rig.record_ret(),
        // querying through the dup'd descriptor sees the same offset
        sys(nr::LSEEK, [7, 0, abi::SEEK_CUR as u64, 0, 0, 0]),
        rig.record_ret(),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert!(!rig.emulator.has_panicked());
    assert_eq!(rig.recorded(), vec![7, 10, 10]);
}

// ============================================================================
// S5: clone + CHILD_CLEARTID wakes the joining parent
// ============================================================================

#[test]
fn clone_child_tid_clear_wakes_joiner() {
    let rig = Rig::new();
    const CHILD_TID: u64 = 0x50_000;
    const CHILD_STACK: u64 = 0x58_000;

    let clone_flags: u64 = abi::CLONE_CHILD_CLEARTID
        | abi::CLONE_SIGHAND
        | abi::CLONE_FILES
        | abi::CLONE_FS
        | abi::CLONE_PARENT_SETTID
        | abi::CLONE_SETTLS
        | abi::CLONE_THREAD
        | abi::CLONE_VM;

    const PARENT_TID_OUT: u64 = 0x51_000;

    let tid_slot = Arc::new(Mutex::new(0u64));
    let tid_for_wait = tid_slot.clone();
    let tid_capture = tid_slot.clone();

    // the child thread will be tid 2; it yields once so the parent's join
    // is installed first, then exits
    rig.script_for(2, vec![Step::Yield, sys(nr::EXIT, [0, 0, 0, 0, 0, 0])]);

    rig.spawn_thread(vec![
        sys(
            nr::CLONE,
            [clone_flags, CHILD_STACK, PARENT_TID_OUT, CHILD_TID, 0xdead_0000, 0],
        ),
        Step::Run(Box::new(move |thread, mmu| {
            let child = thread.cpu().regs.rax;
            assert_eq!(child, 2, "first clone must produce tid 2");
            // publish the tid the way pthread_create would before join
            mmu.write32(CHILD_TID, child as u32);
            *tid_capture.lock().unwrap() = child;
        })),
        // join: wait until the kernel clears the child tid word
        sys_with(nr::FUTEX, move |_thread, _mmu| {
            let tid = *tid_for_wait.lock().unwrap();
            [CHILD_TID, abi::FUTEX_WAIT as u64, tid, 0, 0, 0]
        }),
        rig.record_ret(),
        Step::Run(Box::new(move |_thread, mmu| {
            assert_eq!(mmu.read32(CHILD_TID), 0, "terminator must clear the tid word");
        })),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert!(!rig.emulator.has_panicked());
    assert_eq!(rig.recorded(), vec![0]);
}

// ============================================================================
// S6: epoll ready set
// ============================================================================

#[test]
fn epoll_reports_readable_end_after_write() {
    let rig = Rig::new();
    let (reader, writer) =
        rig.emulator.with_kernel(|kernel| kernel.vfs.pipe2(0).expect("pipe2"));

    const EVENT: u64 = 0x60_000;
    const EVENTS_OUT: u64 = 0x61_000;
    const MSG: u64 = 0x62_000;

    let epfd_slot = Arc::new(Mutex::new(0u64));
    let epfd_for_ctl = epfd_slot.clone();
    let epfd_for_wait = epfd_slot.clone();
    let epfd_capture = epfd_slot.clone();

    rig.spawn_thread(vec![
        sys(nr::EPOLL_CREATE1, [0, 0, 0, 0, 0, 0]),
        Step::Run(Box::new(move |thread, _mmu| {
            *epfd_capture.lock().unwrap() = thread.cpu().regs.rax;
        })),
        sys_with(nr::EPOLL_CTL, move |_thread, mmu| {
            let event = structs::EpollEvent {
                events: abi::EpollEvents::IN.bits(),
                data: 0x5151,
            };
            mmu.copy_to_mmu(EVENT, structs::bytes_of(&event));
            [
                *epfd_for_ctl.lock().unwrap(),
                abi::EPOLL_CTL_ADD as u64,
                reader.raw() as u64,
                EVENT,
                0,
                0,
            ]
        }),
        rig.record_ret(),
        Step::Run(Box::new(move |_thread, mmu| {
            mmu.copy_to_mmu(MSG, b"!");
        })),
        sys(nr::WRITE, [writer.raw() as u64, MSG, 1, 0, 0, 0]),
        sys_with(nr::EPOLL_WAIT, move |_thread, _mmu| {
            [*epfd_for_wait.lock().unwrap(), EVENTS_OUT, 8, 0, 0, 0]
        }),
        rig.record_ret(),
        Step::Run(Box::new(move |_thread, mmu| {
            let mut raw = [0u8; std::mem::size_of::<structs::EpollEvent>()];
            mmu.copy_from_mmu(&mut raw, EVENTS_OUT);
            let event: structs::EpollEvent = structs::read_struct(&raw);
            assert_eq!({ event.data }, 0x5151);
            assert_ne!({ event.events } & abi::EpollEvents::IN.bits(), 0);
        })),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert!(!rig.emulator.has_panicked());
    assert_eq!(rig.recorded(), vec![0, 1]);
}

// ============================================================================
// Timeouts, negative cases, deadlock
// ============================================================================

#[test]
fn clock_nanosleep_wakes_after_kernel_time_advances() {
    let rig = Rig::new();
    const REQUEST: u64 = 0x70_000;

    rig.spawn_thread(vec![
        Step::Run(Box::new(move |_thread, mmu| {
            let request = structs::Timespec { tv_sec: 0, tv_nsec: 3_000_000 };
            mmu.copy_to_mmu(REQUEST, structs::bytes_of(&request));
        })),
        sys(nr::CLOCK_NANOSLEEP, [0, 0, REQUEST, 0, 0, 0]),
        rig.record_ret(),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert!(!rig.emulator.has_panicked());
    assert_eq!(rig.recorded(), vec![0]);
}

#[test]
fn poll_timeout_returns_zero_ready() {
    let rig = Rig::new();
    let (reader, _writer) =
        rig.emulator.with_kernel(|kernel| kernel.vfs.pipe2(0).expect("pipe2"));
    const FDS: u64 = 0x71_000;

    rig.spawn_thread(vec![
        Step::Run(Box::new(move |_thread, mmu| {
            let pfd = Pollfd { fd: reader.raw(), events: abi::PollEvents::IN.bits(), revents: 0 };
            mmu.copy_to_mmu(FDS, structs::bytes_of(&pfd));
        })),
        // 3 ms timeout on a pipe nobody writes to
        sys(nr::POLL, [FDS, 1, 3, 0, 0, 0]),
        rig.record_ret(),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert!(!rig.emulator.has_panicked());
    assert_eq!(rig.recorded(), vec![0]);
}

#[test]
fn futex_wait_value_mismatch_is_eagain() {
    let rig = Rig::new();
    const WORD: u64 = 0x72_000;
    rig.mmu.write32(WORD, 7);

    rig.spawn_thread(vec![
        sys(nr::FUTEX, [WORD, abi::FUTEX_WAIT as u64, 6, 0, 0, 0]),
        rig.record_ret(),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert_eq!(rig.recorded(), vec![-(libc::EAGAIN as i64)]);
}

#[test]
fn lseek_on_tty_reports_espipe() {
    let rig = Rig::new();
    rig.spawn_thread(vec![
        sys(nr::LSEEK, [1, 0, abi::SEEK_SET as u64, 0, 0, 0]),
        rig.record_ret(),
    ]);
    assert_eq!(rig.run(), Some(0));
    assert_eq!(rig.recorded(), vec![-(libc::ESPIPE as i64)]);
}

#[test]
fn read_write_only_fd_reports_ebadf() {
    let rig = Rig::new();
    const PATH: u64 = 0x73_000;
    const BUF: u64 = 0x74_000;

    let fd_slot = Arc::new(Mutex::new(0u64));
    let fd_for_read = fd_slot.clone();
    let fd_capture = fd_slot.clone();

    rig.spawn_thread(vec![
        Step::Run(Box::new(move |_thread, mmu| {
            write_cstr(mmu, PATH, "/tmp/procbox-wronly");
        })),
        sys(
            nr::OPENAT,
            [
                abi::AT_FDCWD as i64 as u64,
                PATH,
                (abi::O_WRONLY | abi::O_CREAT) as u64,
                0o644,
                0,
                0,
            ],
        ),
        Step::Run(Box::new(move |thread, _mmu| {
            *fd_capture.lock().unwrap() = thread.cpu().regs.rax;
        })),
        sys_with(nr::READ, move |_thread, _mmu| {
            [*fd_for_read.lock().unwrap(), BUF, 8, 0, 0, 0]
        }),
        rig.record_ret(),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert_eq!(rig.recorded(), vec![-(libc::EBADF as i64)]);
}

#[test]
fn memfd_write_seek_read_round_trip() {
    let rig = Rig::new();
    const NAME: u64 = 0x75_000;
    const OUT: u64 = 0x76_000;
    const IN: u64 = 0x77_000;

    let fd_slot = Arc::new(Mutex::new(0u64));
    let fd_a = fd_slot.clone();
    let fd_b = fd_slot.clone();
    let fd_capture = fd_slot.clone();

    rig.spawn_thread(vec![
        Step::Run(Box::new(move |_thread, mmu| {
            write_cstr(mmu, NAME, "scratch");
            mmu.copy_to_mmu(OUT, b"payload");
        })),
        sys(nr::MEMFD_CREATE, [NAME, 0, 0, 0, 0, 0]),
        Step::Run(Box::new(move |thread, _mmu| {
            *fd_capture.lock().unwrap() = thread.cpu().regs.rax;
        })),
        sys_with(nr::WRITE, move |_thread, _mmu| {
            [*fd_a.lock().unwrap(), OUT, 7, 0, 0, 0]
        }),
        sys_with(nr::LSEEK, move |_thread, _mmu| {
            let fd = *fd_b.lock().unwrap();
            [fd, 0, abi::SEEK_SET as u64, 0, 0, 0]
        }),
        sys_with(nr::READ, {
            let fd_slot = fd_slot.clone();
            move |_thread, _mmu| [*fd_slot.lock().unwrap(), IN, 16, 0, 0, 0]
        }),
        rig.record_ret(),
        Step::Run(Box::new(move |_thread, mmu| {
            let mut received = [0u8; 7];
            mmu.copy_from_mmu(&mut received, IN);
            assert_eq!(&received, b"payload");
        })),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert!(!rig.emulator.has_panicked());
    assert_eq!(rig.recorded(), vec![7]);
}

#[test]
fn untimed_futex_deadlock_panics_the_machine() {
    let rig = Rig::new();
    const WORD_A: u64 = 0x78_000;
    const WORD_B: u64 = 0x79_000;

    rig.spawn_thread(vec![sys(nr::FUTEX, [WORD_A, abi::FUTEX_WAIT as u64, 0, 0, 0, 0])]);
    rig.spawn_thread(vec![sys(nr::FUTEX, [WORD_B, abi::FUTEX_WAIT as u64, 0, 0, 0, 0])]);

    rig.run();
    assert!(rig.emulator.has_panicked(), "deadlock must be detected and fatal");
}

#[test]
fn exit_group_takes_every_thread_down() {
    let rig = Rig::new();
    const WORD: u64 = 0x7a_000;

    // one thread parks forever; the other pulls the plug
    rig.spawn_thread(vec![sys(nr::FUTEX, [WORD, abi::FUTEX_WAIT as u64, 0, 0, 0, 0])]);
    rig.spawn_thread(vec![Step::Yield, sys(nr::EXIT_GROUP, [41, 0, 0, 0, 0, 0])]);

    assert_eq!(rig.run(), Some(41));
    assert!(!rig.emulator.has_panicked());
}

#[test]
fn multicore_workers_drain_parallel_userspace() {
    let config = EmulatorConfig { nb_cores: 4, ..EmulatorConfig::default() };
    let rig = Rig::with_config(config);
    const MARKS: u64 = 0x90_000;

    for index in 0..4u64 {
        rig.spawn_thread(vec![
            Step::Run(Box::new(move |_thread, mmu| {
                mmu.write32(MARKS + index * 4, 1);
            })),
            Step::Yield,
            Step::Run(Box::new(move |_thread, mmu| {
                let seen = mmu.read32(MARKS + index * 4);
                mmu.write32(MARKS + index * 4, seen + 1);
            })),
        ]);
    }

    assert_eq!(rig.run(), Some(0));
    assert!(!rig.emulator.has_panicked());
    for index in 0..4u64 {
        assert_eq!(rig.mmu.read32(MARKS + index * 4), 2, "thread {index} must run twice");
    }
}

#[test]
fn stat_of_open_shadow_file_matches_fstat() {
    let rig = Rig::new();
    const PATH: u64 = 0x7b_000;
    const STAT_A: u64 = 0x7c_000;
    const STAT_B: u64 = 0x7d_000;

    let fd_slot = Arc::new(Mutex::new(0u64));
    let fd_for_fstat = fd_slot.clone();
    let fd_capture = fd_slot.clone();

    rig.spawn_thread(vec![
        Step::Run(Box::new(move |_thread, mmu| {
            write_cstr(mmu, PATH, "/tmp/procbox-stat-x");
        })),
        sys(
            nr::OPENAT,
            [
                abi::AT_FDCWD as i64 as u64,
                PATH,
                (abi::O_RDWR | abi::O_CREAT) as u64,
                0o644,
                0,
                0,
            ],
        ),
        Step::Run(Box::new(move |thread, _mmu| {
            *fd_capture.lock().unwrap() = thread.cpu().regs.rax;
        })),
        sys(nr::STAT, [PATH, STAT_A, 0, 0, 0, 0]),
        rig.record_ret(),
        sys_with(nr::FSTAT, move |_thread, _mmu| {
            [*fd_for_fstat.lock().unwrap(), STAT_B, 0, 0, 0, 0]
        }),
        rig.record_ret(),
        Step::Run(Box::new(move |_thread, mmu| {
            // st_mode sits at offset 24 in struct stat on x86-64
            let mode_a = mmu.read32(STAT_A + 24);
            let mode_b = mmu.read32(STAT_B + 24);
            assert_eq!(mode_a, mode_b);
            assert_eq!(mode_a & abi::S_IFMT, abi::S_IFREG);
        })),
    ]);

    assert_eq!(rig.run(), Some(0));
    assert!(!rig.emulator.has_panicked());
    assert_eq!(rig.recorded(), vec![0, 0]);
}
