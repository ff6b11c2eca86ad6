//! Hard invariant checks.
//!
//! A failed `verify!` means the emulator (or the guest) is in a state the
//! kernel model does not cover. The policy is to surface that immediately:
//! log through tracing, then panic. Workers catch the unwind only to flip
//! the global panic flag and shut the scheduler down.

/// Logs and panics when the condition does not hold.
#[macro_export]
macro_rules! verify {
    ($cond:expr) => {
        if !$cond {
            tracing::error!("verification failed: {}", stringify!($cond));
            panic!("verification failed: {}", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            let message = format!($($arg)+);
            tracing::error!("verification failed: {message}");
            panic!("verification failed: {message}");
        }
    };
}

/// Unconditional verification failure, for unreachable branches.
#[macro_export]
macro_rules! verify_unreachable {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);
        tracing::error!("verification failed: {message}");
        panic!("verification failed: {message}");
    }};
}
