//! Guest virtual memory contract.
//!
//! The page-table machinery itself is an external collaborator; the kernel
//! model only consumes the capability set below. Userspace jobs on other
//! workers read and write the same memory without the scheduler lock, so
//! implementations must tolerate concurrent access (`&self` + `Send + Sync`).

mod flat;

pub use flat::FlatMmu;

use procbox_abi::flags::{MapFlags, ProtFlags};

/// A guest virtual address.
pub type GuestAddr = u64;

/// Capability set the kernel model needs from the guest MMU.
pub trait Mmu: Send + Sync {
    fn read8(&self, addr: GuestAddr) -> u8;
    fn read16(&self, addr: GuestAddr) -> u16;
    fn read32(&self, addr: GuestAddr) -> u32;
    fn read64(&self, addr: GuestAddr) -> u64;

    fn write8(&self, addr: GuestAddr, value: u8);
    fn write16(&self, addr: GuestAddr, value: u16);
    fn write32(&self, addr: GuestAddr, value: u32);
    fn write64(&self, addr: GuestAddr, value: u64);

    /// Copies `dst.len()` bytes out of guest memory.
    fn copy_from_mmu(&self, dst: &mut [u8], src: GuestAddr);

    /// Copies `src` into guest memory at `dst`.
    fn copy_to_mmu(&self, dst: GuestAddr, src: &[u8]);

    /// Reads a NUL-terminated guest string (unbounded).
    fn read_string(&self, addr: GuestAddr) -> String;

    fn mmap(&self, addr: GuestAddr, length: u64, prot: ProtFlags, flags: MapFlags) -> u64;
    fn mprotect(&self, addr: GuestAddr, length: u64, prot: ProtFlags) -> i32;
    fn munmap(&self, addr: GuestAddr, length: u64) -> i32;
    fn brk(&self, addr: GuestAddr) -> u64;

    /// Protection bits currently covering `addr`.
    fn prot(&self, addr: GuestAddr) -> ProtFlags;

    /// Attaches a diagnostic name to the region containing `addr`.
    fn set_region_name(&self, addr: GuestAddr, name: &str);

    /// One byte per page, bit 0 set when the page is resident.
    fn mincore(&self, addr: GuestAddr, length: u64) -> Vec<u8>;
}
