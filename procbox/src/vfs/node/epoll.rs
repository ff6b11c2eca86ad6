//! epoll instances: a watched-fd interest list behind a descriptor.

use std::collections::BTreeMap;

use procbox_abi::errno::{Errno, SysResult};
use procbox_abi::flags::EpollEvents;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpollEntry {
    pub events: EpollEvents,
    pub data: u64,
}

#[derive(Debug, Default)]
pub struct EpollState {
    interest: BTreeMap<i32, EpollEntry>,
}

impl EpollState {
    pub fn add_entry(&mut self, fd: i32, events: EpollEvents, data: u64) -> SysResult<()> {
        if self.interest.contains_key(&fd) {
            return Err(Errno::EEXIST);
        }
        self.interest.insert(fd, EpollEntry { events, data });
        Ok(())
    }

    pub fn change_entry(&mut self, fd: i32, events: EpollEvents, data: u64) -> SysResult<()> {
        match self.interest.get_mut(&fd) {
            Some(entry) => {
                *entry = EpollEntry { events, data };
                Ok(())
            }
            None => Err(Errno::ENOENT),
        }
    }

    pub fn delete_entry(&mut self, fd: i32) -> SysResult<()> {
        match self.interest.remove(&fd) {
            Some(_) => Ok(()),
            None => Err(Errno::ENOENT),
        }
    }

    pub fn interest_list(&self) -> impl Iterator<Item = (i32, EpollEntry)> + '_ {
        self.interest.iter().map(|(fd, entry)| (*fd, *entry))
    }

    pub fn len(&self) -> usize {
        self.interest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interest.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_adds_and_missing_changes_are_rejected() {
        let mut epoll = EpollState::default();
        epoll.add_entry(3, EpollEvents::IN, 7).unwrap();
        assert_eq!(epoll.add_entry(3, EpollEvents::IN, 8).unwrap_err(), Errno::EEXIST);
        assert_eq!(epoll.change_entry(4, EpollEvents::OUT, 0).unwrap_err(), Errno::ENOENT);
        epoll.change_entry(3, EpollEvents::OUT, 9).unwrap();
        let entries: Vec<_> = epoll.interest_list().collect();
        assert_eq!(entries, vec![(3, EpollEntry { events: EpollEvents::OUT, data: 9 })]);
    }

    #[test]
    fn delete_removes_exactly_once() {
        let mut epoll = EpollState::default();
        epoll.add_entry(5, EpollEvents::IN, 0).unwrap();
        epoll.delete_entry(5).unwrap();
        assert_eq!(epoll.delete_entry(5).unwrap_err(), Errno::ENOENT);
        assert!(epoll.is_empty());
    }
}
