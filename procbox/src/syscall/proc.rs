//! Thread, process, identity and futex syscalls.

use procbox_abi::errno::{Errno, SysResult};
use procbox_abi::flags as abi;
use procbox_abi::structs::{self, CloneArgs};

use crate::host;
use crate::sched;
use crate::task::Thread;
use crate::verify;
use crate::verify_unreachable;

use super::Ctx;

// ============================================================================
// clone family
// ============================================================================

/// The only supported clone shape is the thread-creation profile pthreads
/// use; anything else is a guest we cannot model, so it is fatal.
fn check_clone_flags(flags: u64) {
    let is_set = |bit: u64| flags & bit != 0;
    verify!(is_set(abi::CLONE_CHILD_CLEARTID), "expected CLONE_CHILD_CLEARTID");
    verify!(!is_set(abi::CLONE_CHILD_SETTID), "expected no CLONE_CHILD_SETTID");
    verify!(!is_set(abi::CLONE_CLEAR_SIGHAND), "expected no CLONE_CLEAR_SIGHAND");
    verify!(is_set(abi::CLONE_SIGHAND), "expected CLONE_SIGHAND");
    verify!(is_set(abi::CLONE_FILES), "expected CLONE_FILES");
    verify!(is_set(abi::CLONE_FS), "expected CLONE_FS");
    verify!(!is_set(abi::CLONE_IO), "expected no CLONE_IO");
    verify!(!is_set(abi::CLONE_PARENT), "expected no CLONE_PARENT");
    verify!(is_set(abi::CLONE_PARENT_SETTID), "expected CLONE_PARENT_SETTID");
    verify!(!is_set(abi::CLONE_PIDFD), "expected no CLONE_PIDFD");
    verify!(is_set(abi::CLONE_SETTLS), "expected CLONE_SETTLS");
    verify!(is_set(abi::CLONE_THREAD), "expected CLONE_THREAD");
    verify!(is_set(abi::CLONE_VM), "expected CLONE_VM");
    verify!(!is_set(abi::CLONE_VFORK), "expected no CLONE_VFORK");
}

fn spawn_thread(
    ctx: &mut Ctx,
    parent: &Thread,
    stack: u64,
    tls: u64,
) -> (Box<Thread>, i32) {
    let profiling = ctx.kernel.profiling;
    let mut child = ctx.kernel.sched.allocate_thread(parent.description().pid, profiling);
    *child.cpu_mut() = *parent.cpu();
    child.cpu_mut().regs.rax = 0;
    child.cpu_mut().regs.rsp = stack;
    child.cpu_mut().fs_base = tls;
    let tid = child.description().tid;
    ctx.emulator.mmu().set_region_name(stack, &format!("Stack of thread {tid}"));
    (child, tid)
}

pub(super) fn clone(ctx: &mut Ctx, parent: &Thread, args: [u64; 6]) -> SysResult<i64> {
    let (flags, stack, parent_tid, child_tid, tls) = (args[0], args[1], args[2], args[3], args[4]);
    check_clone_flags(flags);

    let (mut child, tid) = spawn_thread(ctx, parent, stack, tls);
    child.set_clear_child_tid(child_tid);
    if parent_tid != 0 {
        ctx.emulator.mmu().write32(parent_tid, tid as u32);
    }
    ctx.kernel.sched.add_thread(child);
    ctx.emulator.notify_runnable();
    Ok(tid as i64)
}

pub(super) fn clone3(ctx: &mut Ctx, parent: &Thread, args: [u64; 6]) -> SysResult<i64> {
    let (uargs, size) = (args[0], args[1] as usize);
    verify!(size >= std::mem::size_of::<CloneArgs>(), "clone3 argument block too small");
    let mut raw = vec![0u8; std::mem::size_of::<CloneArgs>()];
    ctx.emulator.mmu().copy_from_mmu(&mut raw, uargs);
    let clone_args: CloneArgs = structs::read_struct(&raw);

    let stack_top = clone_args.stack + clone_args.stack_size;
    let (mut child, tid) = spawn_thread(ctx, parent, stack_top, clone_args.tls);
    child.set_clear_child_tid(clone_args.child_tid);
    if clone_args.child_tid != 0 {
        ctx.emulator.mmu().write32(clone_args.child_tid, tid as u32);
    }
    ctx.kernel.sched.add_thread(child);
    ctx.emulator.notify_runnable();
    Ok(tid as i64)
}

// ============================================================================
// exits
// ============================================================================

pub(super) fn exit(ctx: &mut Ctx, thread: Box<Thread>, args: [u64; 6]) -> Option<Box<Thread>> {
    let status = args[0] as i32;
    tracing::debug!("thread {} exits with status {status}", thread.description().tid);
    sched::terminate_current(ctx.kernel, ctx.emulator.mmu(), thread, status);
    ctx.emulator.notify_runnable();
    None
}

pub(super) fn exit_group(
    ctx: &mut Ctx,
    thread: Box<Thread>,
    args: [u64; 6],
) -> Option<Box<Thread>> {
    let status = args[0] as i32;
    tracing::debug!("exit_group with status {status}");
    sched::terminate_queued(ctx.kernel, ctx.emulator.mmu(), status);
    sched::terminate_current(ctx.kernel, ctx.emulator.mmu(), thread, status);
    ctx.emulator.notify_runnable();
    None
}

pub(super) fn tgkill(ctx: &mut Ctx, thread: Box<Thread>, args: [u64; 6]) -> Option<Box<Thread>> {
    let (tgid, tid, sig) = (args[0] as i32, args[1] as i32, args[2] as i32);
    tracing::debug!("tgkill(tgid={tgid}, tid={tid}, sig={sig}) takes the whole process down");
    sched::terminate_queued(ctx.kernel, ctx.emulator.mmu(), 516);
    sched::terminate_current(ctx.kernel, ctx.emulator.mmu(), thread, 516);
    ctx.emulator.notify_runnable();
    None
}

pub(super) fn kill(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("kill not implemented");
    Errno::ENOTSUP.to_ret()
}

// ============================================================================
// futex
// ============================================================================

pub(super) fn futex(ctx: &mut Ctx, mut thread: Box<Thread>, args: [u64; 6]) -> Option<Box<Thread>> {
    let mmu = ctx.emulator.mmu();
    let uaddr = args[0];
    let op = args[1] as i32 & abi::FUTEX_CMD_MASK;
    let val = args[2] as u32;
    let timeout = args[3];
    let uaddr2 = args[4];
    let val3 = args[5] as u32;

    match op {
        abi::FUTEX_WAIT => {
            let loaded = mmu.read32(uaddr);
            if loaded != val {
                thread.cpu_mut().regs.rax = Errno::EAGAIN.to_ret() as u64;
                return Some(thread);
            }
            let current_time = ctx.kernel.current_time;
            let timer = match ctx.kernel.timers.get_or_try_create(0) {
                Some(timer) => timer,
                None => unreachable!("clock 0 always exists"),
            };
            timer.update(current_time);
            let deadline = timer.read_relative_timespec(mmu, timeout).map(|diff| timer.now() + diff);
            sched::futex_wait(ctx.kernel, thread, uaddr, val, deadline);
            None
        }
        abi::FUTEX_WAKE => {
            let woken = sched::wake(ctx.kernel, uaddr, val);
            ctx.emulator.notify_runnable();
            thread.cpu_mut().regs.rax = woken as u64;
            Some(thread)
        }
        abi::FUTEX_WAKE_OP => {
            let val2 = timeout as u32;
            let woken = sched::wake_op(ctx.kernel, mmu, uaddr, val, uaddr2, val2, val3);
            ctx.emulator.notify_runnable();
            thread.cpu_mut().regs.rax = woken as u64;
            Some(thread)
        }
        abi::FUTEX_UNLOCK_PI => {
            tracing::warn!("futex_unlock_pi returns a bogus ENOSYS");
            thread.cpu_mut().regs.rax = Errno::ENOSYS.to_ret() as u64;
            Some(thread)
        }
        abi::FUTEX_WAIT_BITSET if val3 == u32::MAX => {
            let loaded = mmu.read32(uaddr);
            if loaded != val {
                thread.cpu_mut().regs.rax = Errno::EAGAIN.to_ret() as u64;
                return Some(thread);
            }
            let current_time = ctx.kernel.current_time;
            let timer = match ctx.kernel.timers.get_or_try_create(0) {
                Some(timer) => timer,
                None => unreachable!("clock 0 always exists"),
            };
            timer.update(current_time);
            let deadline = timer.read_absolute_timespec(mmu, timeout);
            sched::futex_wait(ctx.kernel, thread, uaddr, val, deadline);
            None
        }
        other => verify_unreachable!("futex op {other} is not supported"),
    }
}

// ============================================================================
// identity, scheduling attributes, signals
// ============================================================================

pub(super) fn sched_yield(thread: &mut Thread) -> i64 {
    thread.yield_now();
    0
}

pub(super) fn set_tid_address(_ctx: &mut Ctx, thread: &mut Thread, args: [u64; 6]) -> i64 {
    thread.set_clear_child_tid(args[0]);
    thread.description().tid as i64
}

pub(super) fn set_robust_list(_ctx: &mut Ctx, thread: &mut Thread, args: [u64; 6]) -> i64 {
    thread.set_robust_list(args[0], args[1]);
    0
}

pub(super) fn get_robust_list(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    verify_unreachable!("get_robust_list is not implemented")
}

pub(super) fn arch_prctl(_ctx: &mut Ctx, thread: &mut Thread, args: [u64; 6]) -> i64 {
    let code = args[0] as i32;
    if code != abi::ARCH_SET_FS {
        return Errno::EINVAL.to_ret();
    }
    thread.cpu_mut().fs_base = args[1];
    0
}

pub(super) fn rt_sigaction(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    // signal delivery beyond termination is out of scope; accept and ignore
    0
}

pub(super) fn rt_sigprocmask(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    0
}

pub(super) fn sigaltstack(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("sigaltstack not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn prctl(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("prctl not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn uname(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let bytes = host::uname_bytes()?;
    ctx.emulator.mmu().copy_to_mmu(args[0], &bytes);
    Ok(0)
}

pub(super) fn sysinfo(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let bytes = host::sysinfo_bytes()?;
    ctx.emulator.mmu().copy_to_mmu(args[0], &bytes);
    Ok(0)
}

pub(super) fn getgroups(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let size = args[0] as i32;
    let bytes = host::getgroups_bytes(size)?;
    if size > 0 {
        ctx.emulator.mmu().copy_to_mmu(args[1], &bytes);
    }
    Ok((bytes.len() / std::mem::size_of::<libc::gid_t>()) as i64)
}

pub(super) fn getresuid(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let creds = host::user_credentials();
    let mmu = ctx.emulator.mmu();
    mmu.write32(args[0], creds.ruid);
    mmu.write32(args[1], creds.euid);
    mmu.write32(args[2], creds.suid);
    0
}

pub(super) fn getresgid(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let creds = host::user_credentials();
    let mmu = ctx.emulator.mmu();
    mmu.write32(args[0], creds.rgid);
    mmu.write32(args[1], creds.egid);
    mmu.write32(args[2], creds.sgid);
    0
}

pub(super) fn prlimit64(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let old_limit = args[3];
    if old_limit == 0 {
        return Ok(0);
    }
    let bytes = host::getrlimit_bytes(args[0] as i32, args[1] as i32)?;
    ctx.emulator.mmu().copy_to_mmu(old_limit, &bytes);
    Ok(0)
}

pub(super) fn setpriority(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("setpriority not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn sched_getparam(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("sched_getparam not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn sched_setscheduler(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("sched_setscheduler not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn sched_getscheduler(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("sched_getscheduler not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn sched_setaffinity(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("sched_setaffinity not implemented");
    Errno::ENOTSUP.to_ret()
}

/// Pretends only cpu 0 exists, and only for the calling process.
pub(super) fn sched_getaffinity(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let (pid, cpusetsize, mask) = (args[0] as i32, args[1] as usize, args[2]);
    if pid != 0 {
        return Errno::EPERM.to_ret();
    }
    let mut buffer = vec![0u8; cpusetsize];
    if let Some(first) = buffer.first_mut() {
        *first |= 0x1;
    }
    ctx.emulator.mmu().copy_to_mmu(mask, &buffer);
    1
}

pub(super) fn sched_setattr(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    0
}

pub(super) fn sched_getattr(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    // sched_attr with SCHED_OTHER defaults; size is validated like the
    // kernel does
    const SCHED_ATTR_SIZE: usize = 56;
    let size = args[2] as usize;
    if size < SCHED_ATTR_SIZE {
        return Errno::EINVAL.to_ret();
    }
    let mut attr = vec![0u8; SCHED_ATTR_SIZE];
    attr[..4].copy_from_slice(&(SCHED_ATTR_SIZE as u32).to_le_bytes());
    ctx.emulator.mmu().copy_to_mmu(args[1], &attr);
    0
}
