// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem nodes

use crate::block::BlockStore;
use crate::error::{FsError, FsResult};
use crate::types::{Qid, QidKind, DMDIR};

/// Stable node identity; never reused for the lifetime of a filesystem
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Lifecycle of a node. `Destroyed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Live,
    /// Removed while open; destroyed on the last close
    PendingDelete,
    /// Unlinked and freed; kept only as a tombstone for handles still bound to it
    Destroyed,
}

/// One file or directory.
///
/// Directories own the chain starting at `first_child`; `parent` and
/// `sibling` are non-owning links resolved through the tree.
#[derive(Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) perm: u32,
    pub(crate) version: u32,
    pub(crate) parent: Option<NodeId>,
    pub(crate) sibling: Option<NodeId>,
    pub(crate) first_child: Option<NodeId>,
    pub(crate) data: BlockStore,
    /// Handles that opened this node and have not closed it
    pub(crate) open_count: usize,
    /// Handles bound to this node, opened or not
    pub(crate) refs: usize,
    pub(crate) state: Lifecycle,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String, perm: u32, parent: Option<NodeId>) -> Self {
        Self {
            id,
            name,
            perm,
            version: 0,
            parent,
            sibling: None,
            first_child: None,
            data: BlockStore::new(),
            open_count: 0,
            refs: 0,
            state: Lifecycle::Live,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn perm(&self) -> u32 {
        self.perm
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn open_count(&self) -> usize {
        self.open_count
    }

    pub fn is_dir(&self) -> bool {
        self.perm & DMDIR != 0
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Logical length; directories always report 0
    pub fn len(&self) -> u64 {
        if self.is_dir() {
            0
        } else {
            self.data.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn qid(&self) -> Qid {
        Qid {
            kind: QidKind::from_perm(self.perm),
            version: self.version,
            path: self.id.0,
        }
    }

    pub(crate) fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Integrity check for operations that only read through a handle
    pub fn ensure_valid(&self) -> FsResult<()> {
        match self.state {
            Lifecycle::Destroyed => Err(FsError::InvalidHandle),
            Lifecycle::Live | Lifecycle::PendingDelete => Ok(()),
        }
    }

    /// Integrity check for operations that would give the node new users
    pub fn ensure_live(&self) -> FsResult<()> {
        match self.state {
            Lifecycle::Live => Ok(()),
            Lifecycle::PendingDelete => Err(FsError::NotFound),
            Lifecycle::Destroyed => Err(FsError::InvalidHandle),
        }
    }
}

/// Names must be non-empty, not `.` or `..`, free of `/`, and no longer than
/// `max_len` bytes (see [`crate::dir::max_name_len`]).
pub fn validate_name(name: &str, max_len: usize) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::BadCharacter);
    }
    if name.len() > max_len {
        return Err(FsError::BadCharacter);
    }
    Ok(())
}

/// Copy a name into a freshly reserved buffer
pub(crate) fn alloc_name(name: &str) -> FsResult<String> {
    let mut owned = String::new();
    owned.try_reserve_exact(name.len()).map_err(|_| FsError::ResourceExhausted)?;
    owned.push_str(name);
    Ok(owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_separator_and_dots() {
        assert_eq!(validate_name("a/b", 255), Err(FsError::BadCharacter));
        assert_eq!(validate_name("", 255), Err(FsError::BadCharacter));
        assert_eq!(validate_name(".", 255), Err(FsError::BadCharacter));
        assert_eq!(validate_name("..", 255), Err(FsError::BadCharacter));
        assert!(validate_name("...", 255).is_ok());
        assert!(validate_name("héllo wörld", 255).is_ok());
    }

    #[test]
    fn rejects_names_over_limit() {
        assert!(validate_name("abcd", 4).is_ok());
        assert_eq!(validate_name("abcde", 4), Err(FsError::BadCharacter));
    }

    #[test]
    fn lifecycle_gates_access() {
        let mut node = Node::new(NodeId(7), "f".into(), 0o644, Some(NodeId(1)));
        assert!(node.ensure_live().is_ok());

        node.state = Lifecycle::PendingDelete;
        assert!(node.ensure_valid().is_ok());
        assert_eq!(node.ensure_live(), Err(FsError::NotFound));

        node.state = Lifecycle::Destroyed;
        assert_eq!(node.ensure_valid(), Err(FsError::InvalidHandle));
        assert_eq!(node.ensure_live(), Err(FsError::InvalidHandle));
    }

    #[test]
    fn qid_tracks_identity_kind_and_version() {
        let mut dir = Node::new(NodeId(9), "d".into(), DMDIR | 0o755, None);
        assert!(dir.is_root());
        assert_eq!(dir.qid().path, 9);
        assert!(dir.qid().is_dir());
        dir.bump_version();
        assert_eq!(dir.qid().version, 1);
    }
}
