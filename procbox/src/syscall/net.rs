//! Socket syscalls: marshalling around the host-socket passthrough.

use procbox_abi::errno::{Errno, SysResult};
use procbox_abi::structs::{self, Iovec, Msghdr};

use crate::host::Message;
use crate::mem::Mmu;
use crate::verify;
use crate::vfs::fd::Fd;

use super::Ctx;

fn copy_in(mmu: &dyn Mmu, addr: u64, len: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; len];
    mmu.copy_from_mmu(&mut buffer, addr);
    buffer
}

pub(super) fn socket(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let fd = ctx.kernel.vfs.socket(args[0] as i32, args[1] as i32, args[2] as i32)?;
    Ok(fd.raw() as i64)
}

pub(super) fn connect(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let addr = copy_in(ctx.emulator.mmu(), args[1], args[2] as usize);
    ctx.kernel.vfs.connect(Fd(args[0] as i32), &addr)
}

pub(super) fn bind(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let addr = copy_in(ctx.emulator.mmu(), args[1], args[2] as usize);
    ctx.kernel.vfs.bind(Fd(args[0] as i32), &addr)
}

pub(super) fn listen(_ctx: &mut Ctx, _args: [u64; 6]) -> i64 {
    tracing::warn!("listen not implemented");
    Errno::ENOTSUP.to_ret()
}

pub(super) fn shutdown(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    ctx.kernel.vfs.shutdown(Fd(args[0] as i32), args[1] as i32)
}

pub(super) fn sendto(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    // sendto with an explicit destination is not part of the supported
    // surface; connected sockets only
    verify!(args[4] == 0, "sendto with a destination address is not supported");
    verify!(args[5] == 0, "sendto with a destination length is not supported");
    let buffer = copy_in(ctx.emulator.mmu(), args[1], args[2] as usize);
    ctx.kernel.vfs.send(Fd(args[0] as i32), &buffer, args[3] as i32)
}

pub(super) fn recvfrom(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let (src_addr, addrlen_addr) = (args[4], args[5]);
    let want_src_address = src_addr != 0 && addrlen_addr != 0;
    let (data, address) = ctx.kernel.vfs.recvfrom(
        Fd(args[0] as i32),
        args[2] as usize,
        args[3] as i32,
        want_src_address,
    )?;
    mmu.copy_to_mmu(args[1], &data);
    if want_src_address {
        mmu.copy_to_mmu(src_addr, &address);
        mmu.write32(addrlen_addr, address.len() as u32);
    }
    Ok(data.len() as i64)
}

pub(super) fn getsockname(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let buffer_size = mmu.read32(args[2]);
    let name = ctx.kernel.vfs.getsockname(Fd(args[0] as i32), buffer_size)?;
    mmu.copy_to_mmu(args[1], &name);
    mmu.write32(args[2], name.len() as u32);
    Ok(0)
}

pub(super) fn getpeername(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let buffer_size = mmu.read32(args[2]);
    let name = ctx.kernel.vfs.getpeername(Fd(args[0] as i32), buffer_size)?;
    mmu.copy_to_mmu(args[1], &name);
    mmu.write32(args[2], name.len() as u32);
    Ok(0)
}

pub(super) fn setsockopt(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    verify!(args[3] != 0, "setsockopt with null optval not implemented");
    let buffer = copy_in(ctx.emulator.mmu(), args[3], args[4] as usize);
    ctx.kernel.vfs.setsockopt(Fd(args[0] as i32), args[1] as i32, args[2] as i32, &buffer)
}

pub(super) fn getsockopt(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    verify!(args[3] != 0, "getsockopt with null optval not implemented");
    verify!(args[4] != 0, "getsockopt with null optlen not implemented");
    let mmu = ctx.emulator.mmu();
    let len = mmu.read32(args[4]);
    let input = copy_in(mmu, args[3], len as usize);
    let output =
        ctx.kernel.vfs.getsockopt(Fd(args[0] as i32), args[1] as i32, args[2] as i32, &input)?;
    mmu.copy_to_mmu(args[3], &output);
    mmu.write32(args[4], output.len() as u32);
    Ok(0)
}

fn read_message(mmu: &dyn Mmu, msg_addr: u64) -> (Msghdr, Vec<Iovec>, Message) {
    let raw = copy_in(mmu, msg_addr, std::mem::size_of::<Msghdr>());
    let header: Msghdr = structs::read_struct(&raw);

    let mut message = Message { flags: header.flags, ..Message::default() };
    if header.name != 0 && header.namelen > 0 {
        message.name = copy_in(mmu, header.name, header.namelen as usize);
    }
    let raw_iov = copy_in(mmu, header.iov, header.iovlen as usize * std::mem::size_of::<Iovec>());
    let iovecs: Vec<Iovec> =
        raw_iov.chunks_exact(std::mem::size_of::<Iovec>()).map(structs::read_struct).collect();
    for iov in &iovecs {
        message.iov.push(copy_in(mmu, iov.base, iov.len as usize));
    }
    if header.control != 0 && header.controllen > 0 {
        message.control = copy_in(mmu, header.control, header.controllen as usize);
    }
    (header, iovecs, message)
}

pub(super) fn sendmsg(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let (_header, _iovecs, message) = read_message(mmu, args[1]);
    ctx.kernel.vfs.sendmsg(Fd(args[0] as i32), args[2] as i32, &message)
}

pub(super) fn recvmsg(ctx: &mut Ctx, args: [u64; 6]) -> SysResult<i64> {
    let mmu = ctx.emulator.mmu();
    let (mut header, iovecs, mut message) = read_message(mmu, args[1]);

    let received = ctx.kernel.vfs.recvmsg(Fd(args[0] as i32), args[2] as i32, &mut message)?;

    // scatter results and updated lengths back into guest memory
    header.namelen = message.name.len() as u32;
    if header.name != 0 {
        mmu.copy_to_mmu(header.name, &message.name);
    }
    for (iov, buffer) in iovecs.iter().zip(&message.iov) {
        mmu.copy_to_mmu(iov.base, buffer);
    }
    header.controllen = message.control.len() as u64;
    if header.control != 0 {
        mmu.copy_to_mmu(header.control, &message.control);
    }
    header.flags = message.flags;
    mmu.copy_to_mmu(args[1], structs::bytes_of(&header));
    Ok(received)
}
