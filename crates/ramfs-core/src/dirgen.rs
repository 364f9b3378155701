// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Directory generation: the single enumeration primitive behind walk, stat
//! listings and directory reads.

use crate::dir::Dir;
use crate::error::FsResult;
use crate::node::{Node, NodeId};
use crate::tree::Tree;
use crate::types::DEVICE_CHAR;

/// Position asked of the generator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenPos {
    /// The `..` entry; the root is its own parent
    Parent,
    /// Zero-based index into the child chain
    Index(usize),
}

/// Outcome of one generator step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Gen {
    /// Entry exists and matches the name filter (or no filter was given)
    Match(Dir),
    /// Entry exists but carries a different name
    Mismatch(Dir),
    /// No entry at this position
    End,
}

/// Render a node as a directory entry
pub fn dir_entry(node: &Node, owner: &str) -> Dir {
    Dir {
        dev_type: DEVICE_CHAR as u16,
        dev: 0,
        qid: node.qid(),
        mode: node.perm,
        atime: 0,
        mtime: 0,
        length: node.len(),
        name: node.name.clone(),
        uid: owner.to_string(),
        gid: owner.to_string(),
        muid: owner.to_string(),
    }
}

pub fn gen(tree: &Tree, owner: &str, dir: NodeId, pos: GenPos, name: Option<&str>) -> FsResult<Gen> {
    let current = tree.get(dir)?;
    current.ensure_valid()?;
    let entry = match pos {
        GenPos::Parent => match current.parent {
            Some(parent) => tree.get(parent)?,
            None => current,
        },
        GenPos::Index(index) => {
            if !current.is_dir() {
                return Ok(Gen::End);
            }
            match tree.child_at(dir, index) {
                Some(child) => child,
                None => return Ok(Gen::End),
            }
        }
    };
    let rendered = dir_entry(entry, owner);
    match name {
        Some(wanted) if wanted != entry.name => Ok(Gen::Mismatch(rendered)),
        _ => Ok(Gen::Match(rendered)),
    }
}

/// Resolve `name` inside `dir` by stepping the generator until a match or the
/// end of the directory. With duplicate names the newest entry wins.
pub fn lookup(tree: &Tree, owner: &str, dir: NodeId, name: &str) -> FsResult<Option<NodeId>> {
    if name == ".." {
        return match gen(tree, owner, dir, GenPos::Parent, None)? {
            Gen::Match(d) | Gen::Mismatch(d) => Ok(Some(NodeId(d.qid.path))),
            Gen::End => Ok(None),
        };
    }
    let mut index = 0;
    loop {
        match gen(tree, owner, dir, GenPos::Index(index), Some(name))? {
            Gen::Match(d) => return Ok(Some(NodeId(d.qid.path))),
            Gen::Mismatch(_) => index += 1,
            Gen::End => return Ok(None),
        }
    }
}

/// Position of `id` within `dir`'s entries, found by stepping the generator
pub fn position_of(tree: &Tree, owner: &str, dir: NodeId, id: NodeId) -> FsResult<Option<usize>> {
    let mut index = 0;
    loop {
        match gen(tree, owner, dir, GenPos::Index(index), None)? {
            Gen::Match(d) | Gen::Mismatch(d) if d.qid.path == id.as_u64() => return Ok(Some(index)),
            Gen::Match(_) | Gen::Mismatch(_) => index += 1,
            Gen::End => return Ok(None),
        }
    }
}
