//! Clock and timer syscalls. All of them answer from the kernel's own
//! monotonic time, never the host wall clock.

use procbox_abi::errno::{Errno, SysResult};
use procbox_abi::structs;

use crate::sched;
use crate::task::Thread;
use crate::verify;

use super::Ctx;

pub(super) fn gettimeofday(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let mmu = ctx.emulator.mmu();
    let now = ctx.kernel.current_time;
    if args[0] != 0 {
        mmu.copy_to_mmu(args[0], structs::bytes_of(&now.to_timeval()));
    }
    if args[1] != 0 {
        // timezone: UTC, no DST
        mmu.copy_to_mmu(args[1], &[0u8; 8]);
    }
    0
}

pub(super) fn clock_gettime(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let clock_id = args[0] as i32;
    let now = ctx.kernel.current_time;
    let timer = ctx.kernel.timers.get_or_try_create(clock_id).ok_or(Errno::EINVAL)?;
    timer.update(now);
    let timespec = timer.now().to_timespec();
    ctx.emulator.mmu().copy_to_mmu(args[1], structs::bytes_of(&timespec));
    Ok(0)
}

pub(super) fn clock_getres(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let resolution = structs::Timespec { tv_sec: 0, tv_nsec: 1 };
    if args[1] != 0 {
        ctx.emulator.mmu().copy_to_mmu(args[1], structs::bytes_of(&resolution));
    }
    0
}

pub(super) fn clock_nanosleep(
    ctx: &mut Ctx,
    mut thread: Box<Thread>,
    args: [u64; 6],
) -> Option<Box<Thread>> {
    let (clock_id, flags, request) = (args[0] as i32, args[1] as i32, args[2]);
    verify!(flags == 0, "clock_nanosleep supports relative sleeps only");
    let current_time = ctx.kernel.current_time;
    let Some(timer) = ctx.kernel.timers.get_or_try_create(clock_id) else {
        thread.cpu_mut().regs.rax = Errno::EINVAL.to_ret() as u64;
        return Some(thread);
    };
    let Some(duration) = timer.read_relative_timespec(ctx.emulator.mmu(), request) else {
        thread.cpu_mut().regs.rax = Errno::EFAULT.to_ret() as u64;
        return Some(thread);
    };
    timer.update(current_time);
    let deadline = timer.now() + duration;
    thread.cpu_mut().regs.rax = 0;
    sched::sleep(ctx.kernel, thread, clock_id, deadline);
    None
}

pub(super) fn time(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let seconds = ctx.kernel.current_time.seconds() as i64;
    if args[0] != 0 {
        ctx.emulator.mmu().write64(args[0], seconds as u64);
    }
    seconds
}

pub(super) fn times(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("times not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn setitimer(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("setitimer not implemented");
    Errno::ENOTSUP.to_ret()
}
