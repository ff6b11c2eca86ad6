//! Kernel time.
//!
//! The emulated kernel advances a monotonic nanosecond counter under
//! scheduler control; it does not track host wall-clock time. Per-clock
//! [`Timer`] objects are dragged forward to the scheduler's current time
//! whenever the kernel ring runs, so blocked sleepers observe progress.

use std::ops::{Add, AddAssign, Sub};

use procbox_abi::flags::CLOCK_MAX;
use procbox_abi::structs::{Timespec, Timeval};

use crate::mem::{GuestAddr, Mmu};

/// A point on the kernel's monotonic timeline, in nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PreciseTime {
    ns: u64,
}

impl PreciseTime {
    pub const ZERO: PreciseTime = PreciseTime { ns: 0 };

    pub fn from_nanos(ns: u64) -> PreciseTime {
        PreciseTime { ns }
    }

    pub fn nanos(self) -> u64 {
        self.ns
    }

    pub fn seconds(self) -> u64 {
        self.ns / 1_000_000_000
    }

    pub fn to_timespec(self) -> Timespec {
        Timespec::from_nanos(self.ns)
    }

    pub fn to_timeval(self) -> Timeval {
        Timeval::from_nanos(self.ns)
    }
}

/// A signed span between two [`PreciseTime`] points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeDifference {
    ns: i64,
}

impl TimeDifference {
    pub fn from_nanos(ns: i64) -> TimeDifference {
        TimeDifference { ns }
    }

    pub fn from_millis(ms: i64) -> TimeDifference {
        TimeDifference { ns: ms * 1_000_000 }
    }

    pub fn from_timespec(ts: Timespec) -> TimeDifference {
        TimeDifference { ns: ts.as_nanos() }
    }

    pub fn nanos(self) -> i64 {
        self.ns
    }
}

impl Add<TimeDifference> for PreciseTime {
    type Output = PreciseTime;

    fn add(self, rhs: TimeDifference) -> PreciseTime {
        PreciseTime { ns: self.ns.saturating_add_signed(rhs.ns) }
    }
}

impl AddAssign<TimeDifference> for PreciseTime {
    fn add_assign(&mut self, rhs: TimeDifference) {
        *self = *self + rhs;
    }
}

impl Sub<PreciseTime> for PreciseTime {
    type Output = TimeDifference;

    fn sub(self, rhs: PreciseTime) -> TimeDifference {
        TimeDifference { ns: self.ns as i64 - rhs.ns as i64 }
    }
}

/// One guest-visible clock, dragged along by the scheduler.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timer {
    now: PreciseTime,
}

impl Timer {
    pub fn now(&self) -> PreciseTime {
        self.now
    }

    /// Advances the clock; timers never move backwards.
    pub fn update(&mut self, time: PreciseTime) {
        if time > self.now {
            self.now = time;
        }
    }

    /// Reads a relative `timespec` from guest memory; `None` for a null
    /// pointer (infinite timeout to the callers that take one).
    pub fn read_relative_timespec(&self, mmu: &dyn Mmu, addr: GuestAddr) -> Option<TimeDifference> {
        if addr == 0 {
            return None;
        }
        let mut raw = [0u8; std::mem::size_of::<Timespec>()];
        mmu.copy_from_mmu(&mut raw, addr);
        let ts: Timespec = procbox_abi::structs::read_struct(&raw);
        Some(TimeDifference::from_timespec(ts))
    }

    /// Reads an absolute `timespec` deadline from guest memory.
    pub fn read_absolute_timespec(&self, mmu: &dyn Mmu, addr: GuestAddr) -> Option<PreciseTime> {
        let diff = self.read_relative_timespec(mmu, addr)?;
        Some(PreciseTime::ZERO + diff)
    }

    /// Reads a `timeval` from guest memory as a span.
    pub fn read_timeval(&self, mmu: &dyn Mmu, addr: GuestAddr) -> Option<TimeDifference> {
        if addr == 0 {
            return None;
        }
        let mut raw = [0u8; std::mem::size_of::<Timeval>()];
        mmu.copy_from_mmu(&mut raw, addr);
        let tv: Timeval = procbox_abi::structs::read_struct(&raw);
        Some(TimeDifference::from_nanos(tv.tv_sec * 1_000_000_000 + tv.tv_usec * 1_000))
    }
}

/// The per-clock timer table.
#[derive(Debug, Default)]
pub struct Timers {
    timers: Vec<Option<Timer>>,
}

impl Timers {
    pub fn new() -> Timers {
        Timers::default()
    }

    /// Fetches the timer for `clock_id`, creating it on first use.
    /// Unknown clock ids yield `None`, which callers turn into -EINVAL.
    pub fn get_or_try_create(&mut self, clock_id: i32) -> Option<&mut Timer> {
        if !(0..=CLOCK_MAX).contains(&clock_id) {
            return None;
        }
        let index = clock_id as usize;
        if self.timers.len() <= index {
            self.timers.resize(index + 1, None);
        }
        Some(self.timers[index].get_or_insert_with(Timer::default))
    }

    /// Drags every live clock forward to `time`.
    pub fn update_all(&mut self, time: PreciseTime) {
        for timer in self.timers.iter_mut().flatten() {
            timer.update(time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_and_ordering() {
        let base = PreciseTime::from_nanos(1_000);
        let later = base + TimeDifference::from_millis(2);
        assert_eq!(later.nanos(), 2_001_000);
        assert_eq!((later - base).nanos(), 2_000_000);
        assert!(later > base);
    }

    #[test]
    fn timers_never_run_backwards() {
        let mut timer = Timer::default();
        timer.update(PreciseTime::from_nanos(500));
        timer.update(PreciseTime::from_nanos(100));
        assert_eq!(timer.now().nanos(), 500);
    }

    #[test]
    fn timer_table_rejects_bogus_clock_ids() {
        let mut timers = Timers::new();
        assert!(timers.get_or_try_create(0).is_some());
        assert!(timers.get_or_try_create(CLOCK_MAX).is_some());
        assert!(timers.get_or_try_create(-1).is_none());
        assert!(timers.get_or_try_create(CLOCK_MAX + 1).is_none());
    }

    #[test]
    fn update_all_advances_created_clocks() {
        let mut timers = Timers::new();
        timers.get_or_try_create(1);
        timers.update_all(PreciseTime::from_nanos(42));
        assert_eq!(timers.get_or_try_create(1).unwrap().now().nanos(), 42);
    }
}
