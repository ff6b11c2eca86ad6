//! File nodes.
//!
//! Every object the guest can hold an fd to is a `Node` in a central arena,
//! addressed by `NodeId`. Parent links are arena indices, never pointers;
//! a parent directory owns its children's ids. The node kinds form a sealed
//! sum type operated on through the capability methods below plus the
//! kind-specific modules.

pub mod epoll;
pub mod event;
pub mod host;
pub mod pipe;
pub mod shadow;
pub mod socket;
pub mod tty;

use std::collections::BTreeMap;

use crate::host::HostFd;
use crate::verify_unreachable;

/// Arena index of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// Where a directory's entries come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirBacking {
    /// Mirrors a host directory; unknown entries may be discovered lazily.
    Host,
    /// Exists only inside the emulator.
    Shadow,
}

#[derive(Debug)]
pub struct DirectoryState {
    pub children: BTreeMap<String, NodeId>,
    pub backing: DirBacking,
    /// Host fd held while the directory itself is open (getdents64).
    pub host_fd: Option<HostFd>,
}

impl DirectoryState {
    pub fn new(backing: DirBacking) -> DirectoryState {
        DirectoryState { children: BTreeMap::new(), backing, host_fd: None }
    }
}

#[derive(Debug)]
pub struct SymlinkState {
    pub target: String,
}

#[derive(Debug)]
pub enum NodeKind {
    Directory(DirectoryState),
    Symlink(SymlinkState),
    HostFile(host::HostFileState),
    HostDevice(host::HostDeviceState),
    ShadowFile(shadow::ShadowFileState),
    Tty(tty::TtyState),
    Null,
    PipeReader(pipe::PipeId),
    PipeWriter(pipe::PipeId),
    Socket(socket::SocketState),
    Event(event::EventState),
    Epoll(epoll::EpollState),
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Directory(_) => "Directory",
            NodeKind::Symlink(_) => "Symlink",
            NodeKind::HostFile(_) => "HostFile",
            NodeKind::HostDevice(_) => "HostDevice",
            NodeKind::ShadowFile(_) => "ShadowFile",
            NodeKind::Tty(_) => "Tty",
            NodeKind::Null => "NullDevice",
            NodeKind::PipeReader(_) => "PipeReader",
            NodeKind::PipeWriter(_) => "PipeWriter",
            NodeKind::Socket(_) => "Socket",
            NodeKind::Event(_) => "Event",
            NodeKind::Epoll(_) => "Epoll",
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub ref_count: u32,
    pub delete_after_close: bool,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(name: impl Into<String>, parent: Option<NodeId>, kind: NodeKind) -> Node {
        Node { name: name.into(), parent, ref_count: 0, delete_after_close: false, kind }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, NodeKind::Symlink(_))
    }

    pub fn is_regular_file(&self) -> bool {
        matches!(self.kind, NodeKind::HostFile(_) | NodeKind::ShadowFile(_))
    }

    pub fn is_shadow(&self) -> bool {
        matches!(self.kind, NodeKind::ShadowFile(_))
    }

    pub fn is_socket(&self) -> bool {
        matches!(self.kind, NodeKind::Socket(_))
    }

    pub fn is_epoll(&self) -> bool {
        matches!(self.kind, NodeKind::Epoll(_))
    }

    /// Static readability of the node type, independent of any description.
    pub fn is_readable(&self) -> bool {
        match self.kind {
            NodeKind::HostFile(_)
            | NodeKind::HostDevice(_)
            | NodeKind::ShadowFile(_)
            | NodeKind::Tty(_)
            | NodeKind::PipeReader(_)
            | NodeKind::Socket(_)
            | NodeKind::Event(_) => true,
            NodeKind::Null => true,
            _ => false,
        }
    }

    pub fn is_writable(&self) -> bool {
        match self.kind {
            NodeKind::ShadowFile(_)
            | NodeKind::Tty(_)
            | NodeKind::PipeWriter(_)
            | NodeKind::Socket(_)
            | NodeKind::Event(_) => true,
            NodeKind::Null => true,
            _ => false,
        }
    }

    /// Whether the node participates in poll/select/epoll.
    pub fn is_pollable(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::HostFile(_)
                | NodeKind::Tty(_)
                | NodeKind::PipeReader(_)
                | NodeKind::PipeWriter(_)
                | NodeKind::Socket(_)
                | NodeKind::Event(_)
                | NodeKind::Epoll(_)
        )
    }

    /// Nodes that survive in the tree after their last fd closes.
    pub fn keep_after_close(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Directory(_) | NodeKind::Symlink(_) | NodeKind::ShadowFile(_)
        )
    }

    /// The host descriptor behind this node, when one exists.
    pub fn host_file_descriptor(&self) -> Option<i32> {
        match &self.kind {
            NodeKind::Directory(dir) => dir.host_fd.as_ref().map(|fd| fd.raw()),
            NodeKind::HostFile(file) => Some(file.fd.raw()),
            NodeKind::HostDevice(dev) => Some(dev.fd.raw()),
            NodeKind::Tty(tty) => tty.host_fd.as_ref().map(|fd| fd.raw()),
            NodeKind::Socket(sock) => Some(sock.fd.raw()),
            _ => None,
        }
    }
}

/// Central node arena. Ids stay stable until the node is removed.
#[derive(Debug, Default)]
pub struct NodeTable {
    slots: Vec<Option<Node>>,
}

impl NodeTable {
    pub fn insert(&mut self, node: Node) -> NodeId {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(node);
                return NodeId(index as u32);
            }
        }
        self.slots.push(Some(node));
        NodeId(self.slots.len() as u32 - 1)
    }

    pub fn remove(&mut self, id: NodeId) -> Node {
        self.slots[id.0 as usize].take().expect("node removed twice")
    }

    pub fn get(&self, id: NodeId) -> &Node {
        match self.slots[id.0 as usize].as_ref() {
            Some(node) => node,
            None => verify_unreachable!("stale node id {:?}", id),
        }
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        match self.slots[id.0 as usize].as_mut() {
            Some(node) => node,
            None => verify_unreachable!("stale node id {:?}", id),
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slots.get(id.0 as usize).map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Absolute path of a node, derived from the parent chain.
    pub fn path(&self, id: NodeId) -> String {
        let mut components = Vec::new();
        let mut cursor = Some(id);
        while let Some(node_id) = cursor {
            let node = self.get(node_id);
            if node.parent.is_some() {
                components.push(node.name.clone());
            }
            cursor = node.parent;
        }
        if components.is_empty() {
            "/".to_string()
        } else {
            components.reverse();
            format!("/{}", components.join("/"))
        }
    }

    pub fn directory(&self, id: NodeId) -> Option<&DirectoryState> {
        match &self.get(id).kind {
            NodeKind::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn directory_mut(&mut self, id: NodeId) -> Option<&mut DirectoryState> {
        match &mut self.get_mut(id).kind {
            NodeKind::Directory(dir) => Some(dir),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_parent_chain() {
        let mut nodes = NodeTable::default();
        let root = nodes.insert(Node::new("", None, NodeKind::Directory(DirectoryState::new(DirBacking::Host))));
        let usr = nodes.insert(Node::new("usr", Some(root), NodeKind::Directory(DirectoryState::new(DirBacking::Shadow))));
        let file = nodes.insert(Node::new(
            "data",
            Some(usr),
            NodeKind::ShadowFile(shadow::ShadowFileState::default()),
        ));
        assert_eq!(nodes.path(root), "/");
        assert_eq!(nodes.path(usr), "/usr");
        assert_eq!(nodes.path(file), "/usr/data");
    }

    #[test]
    fn arena_slots_are_reused() {
        let mut nodes = NodeTable::default();
        let a = nodes.insert(Node::new("a", None, NodeKind::Null));
        nodes.remove(a);
        let b = nodes.insert(Node::new("b", None, NodeKind::Null));
        assert_eq!(a, b);
        assert!(nodes.contains(b));
    }

    #[test]
    fn capability_defaults_per_kind() {
        let null = Node::new("null", None, NodeKind::Null);
        assert!(null.is_readable() && null.is_writable() && !null.is_pollable());

        let epoll = Node::new("", None, NodeKind::Epoll(epoll::EpollState::default()));
        assert!(epoll.is_pollable() && !epoll.is_readable());

        let link = Node::new("self", None, NodeKind::Symlink(SymlinkState { target: "/proc/1".into() }));
        assert!(link.keep_after_close() && !link.is_pollable());
    }
}
