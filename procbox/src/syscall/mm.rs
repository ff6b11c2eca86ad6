//! Memory-management syscalls: thin shims over the MMU contract.

use procbox_abi::errno::Errno;
use procbox_abi::flags::{MADV_DONTNEED, MapFlags, ProtFlags};

use crate::verify;
use crate::vfs::fd::Fd;

use super::Ctx;

pub(super) fn mmap(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let mmu = ctx.emulator.mmu();
    let (addr, length) = (args[0], args[1]);
    let prot = ProtFlags::from_bits_truncate(args[2] as u32);
    let mut flags = MapFlags::from_bits_truncate(args[3] as u32);
    let fd = args[4] as i32;
    let offset = args[5] as i64;

    if flags.contains(MapFlags::SHARED) && prot.contains(ProtFlags::WRITE) {
        tracing::warn!("writable shared mapping not supported, downgrading to private");
        flags -= MapFlags::SHARED;
        flags |= MapFlags::PRIVATE;
    }

    let base = mmu.mmap(addr, length, prot, flags);
    if !flags.contains(MapFlags::ANONYMOUS) {
        verify!(fd >= 0, "file mapping without a file descriptor");
        match ctx.kernel.vfs.pread(Fd(fd), length as usize, offset) {
            Err(errno) => {
                let filename = ctx.kernel.vfs.filename(Fd(fd));
                tracing::warn!("could not mmap file \"{filename}\" with fd={fd}");
                return errno.to_ret();
            }
            Ok(data) => {
                // the target pages may not be writable; lift the protection
                // for the copy and put it back
                let saved = mmu.prot(base);
                mmu.mprotect(base, length, saved | ProtFlags::WRITE);
                mmu.copy_to_mmu(base, &data);
                mmu.mprotect(base, length, saved);
                let filename = ctx.kernel.vfs.filename(Fd(fd));
                mmu.set_region_name(base, &filename);
            }
        }
    }
    base as i64
}

pub(super) fn mprotect(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let prot = ProtFlags::from_bits_truncate(args[2] as u32);
    ctx.emulator.mmu().mprotect(args[0], args[1], prot) as i64
}

pub(super) fn munmap(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    ctx.emulator.mmu().munmap(args[0], args[1]) as i64
}

pub(super) fn brk(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    ctx.emulator.mmu().brk(args[0]) as i64
}

pub(super) fn mremap(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("mremap not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn mincore(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let mmu = ctx.emulator.mmu();
    let residency = mmu.mincore(args[0], args[1]);
    mmu.copy_to_mmu(args[2], &residency);
    0
}

pub(super) fn madvise(_ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let advice = args[2] as i32;
    if advice != MADV_DONTNEED {
        tracing::warn!("madvise advice {advice} not implemented, claiming success");
    }
    0
}

pub(super) fn mlock(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    0
}

pub(super) fn mbind(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("mbind not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn shmget(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("shmget not implemented");
    Errno::ENOTSUP.to_ret()
}

/// Deterministic bytes: reproducible guest runs beat entropy here.
pub(super) fn getrandom(ctx: &mut Ctx, args: [u64; 6]) -> i64 {
    let len = args[1] as usize;
    let buffer: Vec<u8> = (0..len).map(|index| index as u8).collect();
    ctx.emulator.mmu().copy_to_mmu(args[0], &buffer);
    len as i64
}
