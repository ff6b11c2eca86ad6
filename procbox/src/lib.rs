//! procbox: user-mode emulation of a 64-bit x86 Linux process.
//!
//! This crate is the software kernel of the emulator: a cooperative
//! multi-core scheduler, a Linux syscall layer and a virtual file system,
//! driven against guest threads supplied by an external CPU/JIT through
//! the [`vm::Vm`] and [`mem::Mmu`] contracts.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

#[macro_use]
pub mod verify;

pub mod emulator;
pub mod error;
pub mod host;
pub mod mem;
pub mod sched;
pub mod syscall;
pub mod task;
pub mod time;
pub mod vfs;
pub mod vm;

pub use emulator::{Emulator, EmulatorConfig, ProfilingData};
pub use error::{EmulatorError, EmulatorResult};
pub use mem::{FlatMmu, Mmu};
pub use task::Thread;
pub use vm::{Vm, VmFactory, WorkerOptions};

static LOG_INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing for the emulator.
///
/// Uses the `RUST_LOG` environment variable for filtering (defaults to
/// `info`); syscall traces appear at `debug`. Idempotent: subsequent calls
/// return immediately, and a subscriber installed by the embedding host is
/// left alone.
pub fn init_logging() {
    LOG_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
