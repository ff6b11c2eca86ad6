//! Pipes: a bounded FIFO shared by a reader node and a writer node.
//!
//! The buffer lives in a central table because the two end nodes close
//! independently; the pipe itself dies when both ends are gone. Reads on an
//! empty pipe return EAGAIN (guests sit in poll until data arrives — the
//! scheduler has no pipe blocker, matching the reference behavior).

use std::collections::VecDeque;

use procbox_abi::errno::{Errno, SysResult};

pub const PIPE_CAPACITY: usize = 64 * 1024;

/// Index of a pipe in the [`PipeTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipeId(pub u32);

#[derive(Debug)]
pub struct PipeState {
    buffer: VecDeque<u8>,
    capacity: usize,
    readers: u32,
    writers: u32,
}

impl PipeState {
    fn new() -> PipeState {
        PipeState { buffer: VecDeque::new(), capacity: PIPE_CAPACITY, readers: 1, writers: 1 }
    }

    pub fn read(&mut self, count: usize) -> SysResult<Vec<u8>> {
        if self.buffer.is_empty() {
            if self.writers == 0 {
                return Ok(Vec::new());
            }
            return Err(Errno::EAGAIN);
        }
        let take = count.min(self.buffer.len());
        Ok(self.buffer.drain(..take).collect())
    }

    pub fn write(&mut self, buf: &[u8]) -> SysResult<i64> {
        if self.readers == 0 {
            return Err(Errno::EPIPE);
        }
        let space = self.capacity - self.buffer.len();
        if space == 0 {
            return Err(Errno::EAGAIN);
        }
        let put = buf.len().min(space);
        self.buffer.extend(&buf[..put]);
        Ok(put as i64)
    }

    pub fn can_read(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn can_write(&self) -> bool {
        self.readers > 0 && self.buffer.len() < self.capacity
    }

    pub fn occupancy(&self) -> usize {
        self.buffer.len()
    }
}

#[derive(Debug, Default)]
pub struct PipeTable {
    slots: Vec<Option<PipeState>>,
}

impl PipeTable {
    /// Allocates a fresh pipe with one reader and one writer reference.
    pub fn create(&mut self) -> PipeId {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(PipeState::new());
                return PipeId(index as u32);
            }
        }
        self.slots.push(Some(PipeState::new()));
        PipeId(self.slots.len() as u32 - 1)
    }

    pub fn get(&self, id: PipeId) -> &PipeState {
        self.slots[id.0 as usize].as_ref().expect("stale pipe id")
    }

    pub fn get_mut(&mut self, id: PipeId) -> &mut PipeState {
        self.slots[id.0 as usize].as_mut().expect("stale pipe id")
    }

    /// Drops one reader reference; frees the pipe when both sides are gone.
    pub fn release_reader(&mut self, id: PipeId) {
        let free = {
            let pipe = self.get_mut(id);
            pipe.readers = pipe.readers.saturating_sub(1);
            pipe.readers == 0 && pipe.writers == 0
        };
        if free {
            self.slots[id.0 as usize] = None;
        }
    }

    /// Drops one writer reference; frees the pipe when both sides are gone.
    pub fn release_writer(&mut self, id: PipeId) {
        let free = {
            let pipe = self.get_mut(id);
            pipe.writers = pipe.writers.saturating_sub(1);
            pipe.readers == 0 && pipe.writers == 0
        };
        if free {
            self.slots[id.0 as usize] = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_come_out_in_order() {
        let mut pipes = PipeTable::default();
        let id = pipes.create();
        assert_eq!(pipes.get_mut(id).write(b"hello").unwrap(), 5);
        assert_eq!(pipes.get_mut(id).read(2).unwrap(), b"he");
        assert_eq!(pipes.get_mut(id).read(16).unwrap(), b"llo");
    }

    #[test]
    fn empty_pipe_reads_eagain_until_writers_close() {
        let mut pipes = PipeTable::default();
        let id = pipes.create();
        assert_eq!(pipes.get_mut(id).read(1).unwrap_err(), Errno::EAGAIN);
        pipes.release_writer(id);
        assert_eq!(pipes.get_mut(id).read(1).unwrap(), b"");
    }

    #[test]
    fn write_after_reader_gone_is_epipe() {
        let mut pipes = PipeTable::default();
        let id = pipes.create();
        pipes.release_reader(id);
        assert_eq!(pipes.get_mut(id).write(b"x").unwrap_err(), Errno::EPIPE);
    }

    #[test]
    fn full_pipe_short_writes_then_eagain() {
        let mut pipes = PipeTable::default();
        let id = pipes.create();
        let big = vec![0u8; PIPE_CAPACITY + 100];
        assert_eq!(pipes.get_mut(id).write(&big).unwrap(), PIPE_CAPACITY as i64);
        assert_eq!(pipes.get_mut(id).write(b"x").unwrap_err(), Errno::EAGAIN);
        assert!(!pipes.get(id).can_write());
        assert!(pipes.get(id).can_read());
    }

    #[test]
    fn pipe_is_freed_when_both_ends_close() {
        let mut pipes = PipeTable::default();
        let id = pipes.create();
        pipes.release_reader(id);
        pipes.release_writer(id);
        assert!(pipes.slots[id.0 as usize].is_none());
    }
}
