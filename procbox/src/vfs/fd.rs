//! File descriptors and open-file descriptions.
//!
//! An open-file description carries the per-open state (offset, access
//! mode, status flags, advisory lock) and is shared by every descriptor
//! produced by the dup family; the close-on-exec bit lives on the fd entry
//! itself, per POSIX.

use bitflags::bitflags;

use crate::vfs::node::NodeId;

/// A guest file descriptor. Negative values encode `-errno` on syscall
/// return paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fd(pub i32);

impl Fd {
    pub fn raw(self) -> i32 {
        self.0
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AccessMode: u8 {
        const READ = 0x1;
        const WRITE = 0x2;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const APPEND = 0x1;
        const LARGEFILE = 0x2;
        const NONBLOCK = 0x4;
        const DIRECT = 0x8;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CreationFlags: u8 {
        const CLOEXEC = 0x1;
        const CREAT = 0x2;
        const DIRECTORY = 0x4;
        const TRUNC = 0x8;
    }
}

/// flock(2) state held per description.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LockState {
    #[default]
    None,
    Shared,
    Exclusive,
}

/// Index of an open-file description in the VFS description table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescId(pub u32);

/// Per-open state shared across dup'd descriptors.
#[derive(Debug)]
pub struct OpenFileDescription {
    pub node: NodeId,
    pub access: AccessMode,
    pub status: StatusFlags,
    pub offset: i64,
    pub lock: LockState,
}

impl OpenFileDescription {
    pub fn new(node: NodeId, access: AccessMode, status: StatusFlags) -> OpenFileDescription {
        OpenFileDescription { node, access, status, offset: 0, lock: LockState::None }
    }

    pub fn is_readable(&self) -> bool {
        self.access.contains(AccessMode::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.access.contains(AccessMode::WRITE)
    }
}

/// One row of the fd table.
#[derive(Clone, Copy, Debug)]
pub struct FdEntry {
    pub fd: Fd,
    pub desc: DescId,
    pub close_on_exec: bool,
}

/// Stable container for descriptions; ids stay valid while any fd
/// references them.
#[derive(Debug, Default)]
pub struct DescriptionTable {
    slots: Vec<Option<OpenFileDescription>>,
}

impl DescriptionTable {
    pub fn insert(&mut self, desc: OpenFileDescription) -> DescId {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(desc);
                return DescId(index as u32);
            }
        }
        self.slots.push(Some(desc));
        DescId(self.slots.len() as u32 - 1)
    }

    pub fn remove(&mut self, id: DescId) -> OpenFileDescription {
        self.slots[id.0 as usize].take().expect("description removed twice")
    }

    pub fn get(&self, id: DescId) -> &OpenFileDescription {
        self.slots[id.0 as usize].as_ref().expect("stale description id")
    }

    pub fn get_mut(&mut self, id: DescId) -> &mut OpenFileDescription {
        self.slots[id.0 as usize].as_mut().expect("stale description id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_table_reuses_free_slots() {
        let mut table = DescriptionTable::default();
        let a = table.insert(OpenFileDescription::new(NodeId(0), AccessMode::READ, StatusFlags::empty()));
        let b = table.insert(OpenFileDescription::new(NodeId(1), AccessMode::WRITE, StatusFlags::empty()));
        assert_ne!(a, b);
        table.remove(a);
        let c = table.insert(OpenFileDescription::new(NodeId(2), AccessMode::READ, StatusFlags::empty()));
        assert_eq!(a, c);
        assert_eq!(table.get(c).node, NodeId(2));
    }

    #[test]
    fn access_mode_queries() {
        let desc = OpenFileDescription::new(
            NodeId(0),
            AccessMode::READ | AccessMode::WRITE,
            StatusFlags::NONBLOCK,
        );
        assert!(desc.is_readable() && desc.is_writable());
        assert!(desc.status.contains(StatusFlags::NONBLOCK));
        assert_eq!(desc.offset, 0);
    }
}
