//! Linux x86-64 guest ABI definitions.
//!
//! Everything the emulated kernel exchanges with guest code lives here:
//! errno values, syscall numbers, flag constants and the `#[repr(C)]` wire
//! structs that cross the guest/host memory boundary. The emulator core
//! (`procbox`) never hard-codes a raw constant; it goes through this crate.

pub mod errno;
pub mod flags;
pub mod nr;
pub mod structs;

pub use errno::{Errno, SysResult};
