// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The namespace: an arena of nodes linked by parent/first-child/sibling ids.
//!
//! New children are prepended, so a directory lists its entries newest first.
//! Ids are allocated monotonically and never reused; a destroyed node stays in
//! the arena as a tombstone until the last handle bound to it is released.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::error::{FsError, FsResult};
use crate::node::{Lifecycle, Node, NodeId};

pub const ROOT_NAME: &str = "/";

#[derive(Debug)]
pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
}

impl Tree {
    pub fn new(root_perm: u32) -> Self {
        let root = NodeId(1);
        let mut nodes = HashMap::new();
        nodes.insert(root, Node::new(root, ROOT_NAME.to_string(), root_perm, None));
        Self {
            nodes,
            root,
            next_id: 2,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Look up a node; ids that left the arena are stale handles
    pub fn get(&self, id: NodeId) -> FsResult<&Node> {
        self.nodes.get(&id).ok_or(FsError::InvalidHandle)
    }

    pub fn get_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(FsError::InvalidHandle)
    }

    /// Every node still in the arena, tombstones included
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Allocate a node and prepend it to `parent`'s child chain
    pub fn insert_child(&mut self, parent: NodeId, name: String, perm: u32) -> FsResult<NodeId> {
        let first = {
            let dir = self.get(parent)?;
            if !dir.is_dir() {
                return Err(FsError::PermissionDenied);
            }
            dir.first_child
        };
        self.nodes.try_reserve(1).map_err(|_| FsError::ResourceExhausted)?;

        let id = NodeId(self.next_id);
        self.next_id += 1;
        let mut node = Node::new(id, name, perm, Some(parent));
        node.sibling = first;
        self.nodes.insert(id, node);
        self.get_mut(parent)?.first_child = Some(id);
        Ok(id)
    }

    pub fn children(&self, dir: NodeId) -> Children<'_> {
        let next = self.nodes.get(&dir).and_then(|n| n.first_child);
        Children { tree: self, next }
    }

    /// The `pos`-th entry of a directory's chain
    pub fn child_at(&self, dir: NodeId, pos: usize) -> Option<&Node> {
        self.children(dir).nth(pos)
    }

    pub fn has_children(&self, dir: NodeId) -> bool {
        self.nodes.get(&dir).is_some_and(|n| n.first_child.is_some())
    }

    /// How many entries of `dir` carry `name`
    pub fn count_named(&self, dir: NodeId, name: &str) -> usize {
        self.children(dir).filter(|n| n.name == name).count()
    }

    /// Detach `id` from its parent's chain
    pub fn unlink(&mut self, id: NodeId) -> FsResult<()> {
        let (parent, sibling) = {
            let node = self.get(id)?;
            (node.parent.ok_or(FsError::PermissionDenied)?, node.sibling)
        };
        let first = self.get(parent)?.first_child;
        if first == Some(id) {
            self.get_mut(parent)?.first_child = sibling;
        } else {
            let prev = self
                .children(parent)
                .find(|n| n.sibling == Some(id))
                .map(|n| n.id)
                .ok_or(FsError::NotFound)?;
            self.get_mut(prev)?.sibling = sibling;
        }
        self.get_mut(id)?.sibling = None;
        Ok(())
    }

    /// Unlink a node, free its storage and mark it destroyed. The slot is
    /// dropped right away when no handle is bound to it.
    pub fn destroy(&mut self, id: NodeId) -> FsResult<()> {
        debug_assert!(!self.has_children(id), "destroying a non-empty directory");
        self.unlink(id)?;
        let node = self.get_mut(id)?;
        node.data.free();
        node.state = Lifecycle::Destroyed;
        if node.refs == 0 {
            self.nodes.remove(&id);
        }
        Ok(())
    }

    /// Drop one handle reference, reaping the tombstone of a destroyed node
    pub fn release(&mut self, id: NodeId) {
        let reap = match self.nodes.get_mut(&id) {
            Some(node) => {
                node.refs = node.refs.saturating_sub(1);
                node.refs == 0 && node.state == Lifecycle::Destroyed
            }
            None => false,
        };
        if reap {
            self.nodes.remove(&id);
        }
    }

    /// Slash-separated path from the root
    pub fn path_of(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut cur = self.nodes.get(&id);
        while let Some(node) = cur {
            let Some(parent) = node.parent else { break };
            names.push(node.name.as_str());
            cur = self.nodes.get(&parent);
        }
        if names.is_empty() {
            return ROOT_NAME.to_string();
        }
        names.iter().rev().fold(String::new(), |mut path, name| {
            path.push('/');
            path.push_str(name);
            path
        })
    }

    /// Indented listing of the whole tree, one node per line
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let parent = node.parent.map(|p| p.0.to_string()).unwrap_or_else(|| "-".into());
        let _ = writeln!(
            out,
            "{:indent$}{} id={} parent={} len={} perm={:o} state={:?}",
            "",
            node.name,
            node.id.0,
            parent,
            node.len(),
            node.perm,
            node.state,
            indent = depth * 2
        );
        let mut next = node.first_child;
        while let Some(child) = next {
            self.dump_node(child, depth + 1, out);
            next = self.nodes.get(&child).and_then(|n| n.sibling);
        }
    }
}

/// Iterator over a directory's child chain
pub struct Children<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
}

impl<'a> Iterator for Children<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.tree.nodes.get(&self.next?)?;
        self.next = node.sibling;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DMDIR;

    fn names(tree: &Tree, dir: NodeId) -> Vec<String> {
        tree.children(dir).map(|n| n.name.clone()).collect()
    }

    #[test]
    fn children_are_prepended() {
        let mut tree = Tree::new(DMDIR | 0o777);
        let root = tree.root();
        tree.insert_child(root, "a".into(), 0o644).unwrap();
        tree.insert_child(root, "b".into(), 0o644).unwrap();
        tree.insert_child(root, "c".into(), 0o644).unwrap();
        assert_eq!(names(&tree, root), ["c", "b", "a"]);
        assert_eq!(tree.child_at(root, 2).map(|n| n.name.as_str()), Some("a"));
        assert!(tree.child_at(root, 3).is_none());
    }

    #[test]
    fn insert_under_file_is_denied() {
        let mut tree = Tree::new(DMDIR | 0o777);
        let file = tree.insert_child(tree.root(), "f".into(), 0o644).unwrap();
        assert_eq!(
            tree.insert_child(file, "x".into(), 0o644),
            Err(FsError::PermissionDenied)
        );
    }

    #[test]
    fn unlink_first_middle_and_last() {
        let mut tree = Tree::new(DMDIR | 0o777);
        let root = tree.root();
        let a = tree.insert_child(root, "a".into(), 0o644).unwrap();
        let b = tree.insert_child(root, "b".into(), 0o644).unwrap();
        let c = tree.insert_child(root, "c".into(), 0o644).unwrap();
        let d = tree.insert_child(root, "d".into(), 0o644).unwrap();

        tree.unlink(c).unwrap();
        assert_eq!(names(&tree, root), ["d", "b", "a"]);
        tree.unlink(d).unwrap();
        assert_eq!(names(&tree, root), ["b", "a"]);
        tree.unlink(a).unwrap();
        assert_eq!(names(&tree, root), ["b"]);
        assert_eq!(tree.unlink(a), Err(FsError::NotFound));
        tree.unlink(b).unwrap();
        assert!(!tree.has_children(root));
    }

    #[test]
    fn root_cannot_be_unlinked() {
        let mut tree = Tree::new(DMDIR | 0o777);
        assert_eq!(tree.unlink(tree.root()), Err(FsError::PermissionDenied));
    }

    #[test]
    fn destroyed_node_lingers_while_referenced() {
        let mut tree = Tree::new(DMDIR | 0o777);
        let root = tree.root();
        let f = tree.insert_child(root, "f".into(), 0o644).unwrap();
        tree.get_mut(f).unwrap().refs = 1;

        tree.destroy(f).unwrap();
        assert_eq!(tree.get(f).unwrap().state, Lifecycle::Destroyed);
        assert!(!tree.has_children(root));

        tree.release(f);
        assert_eq!(tree.get(f).map(|_| ()), Err(FsError::InvalidHandle));
    }

    #[test]
    fn unreferenced_node_is_dropped_on_destroy() {
        let mut tree = Tree::new(DMDIR | 0o777);
        let f = tree.insert_child(tree.root(), "f".into(), 0o644).unwrap();
        tree.destroy(f).unwrap();
        assert!(tree.get(f).is_err());
        assert_eq!(tree.nodes().count(), 1);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut tree = Tree::new(DMDIR | 0o777);
        let root = tree.root();
        let a = tree.insert_child(root, "a".into(), 0o644).unwrap();
        tree.destroy(a).unwrap();
        let b = tree.insert_child(root, "a".into(), 0o644).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn paths_and_dump() {
        let mut tree = Tree::new(DMDIR | 0o777);
        let root = tree.root();
        let dir = tree.insert_child(root, "a".into(), DMDIR | 0o755).unwrap();
        let file = tree.insert_child(dir, "b.txt".into(), 0o644).unwrap();
        assert_eq!(tree.path_of(root), "/");
        assert_eq!(tree.path_of(file), "/a/b.txt");

        let dump = tree.dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("/ id=1 parent=-"));
        assert!(lines[1].starts_with("  a id="));
        assert!(lines[2].starts_with("    b.txt id="));
    }

    #[test]
    fn duplicate_names_are_counted_not_rejected() {
        let mut tree = Tree::new(DMDIR | 0o777);
        let root = tree.root();
        tree.insert_child(root, "x".into(), 0o644).unwrap();
        tree.insert_child(root, "x".into(), 0o644).unwrap();
        assert_eq!(tree.count_named(root, "x"), 2);
    }
}
