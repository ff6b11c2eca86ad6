//! Emulator-setup errors.
//!
//! Guest-visible failures travel as `Errno`; this type only covers the
//! paths where the emulator itself cannot come up (missing cwd, bad
//! configuration). Invariant violations go through `verify!` instead.

use thiserror::Error;

pub type EmulatorResult<T> = Result<T, EmulatorError>;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("filesystem setup failed: {0}")]
    FsSetup(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
