// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The operation surface of the ram filesystem.
//!
//! One mutex guards the whole tree, every block and the handle table. Each
//! operation runs as a single transaction under it; change events gathered
//! during the transaction are delivered only after the lock is released.

use std::collections::HashMap;
#[cfg(feature = "events")]
use std::sync::Arc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::config::RamFsConfig;
use crate::dir::{max_name_len, Dir};
use crate::dirgen::{self, Gen, GenPos};
use crate::error::{FsError, FsResult};
use crate::fault::{FaultInjector, FaultOp, FaultPolicy};
use crate::node::{alloc_name, validate_name, Lifecycle, NodeId};
use crate::tree::Tree;
use crate::types::{
    EventKind, Fid, FsStats, OpenMode, Qid, RemoveOutcome, Walk, DEVICE_CHAR, DMDIR,
};
#[cfg(feature = "events")]
use crate::types::{EventSink, SubscriptionId};

/// Caller-held reference to a node plus its open state
#[derive(Debug)]
struct Handle {
    node: NodeId,
    /// Cosmetic channel path, `#@spec/a/b`
    path: String,
    open: Option<OpenMode>,
    /// Next child index for sequential directory reads
    dir_cursor: usize,
}

#[derive(Debug)]
struct FsState {
    tree: Tree,
    handles: HashMap<Fid, Handle>,
    next_fid: u64,
}

impl FsState {
    fn handle(&self, fid: Fid) -> FsResult<&Handle> {
        self.handles.get(&fid).ok_or(FsError::InvalidHandle)
    }

    fn handle_mut(&mut self, fid: Fid) -> FsResult<&mut Handle> {
        self.handles.get_mut(&fid).ok_or(FsError::InvalidHandle)
    }

    fn bind(&mut self, node: NodeId, path: String) -> FsResult<Fid> {
        self.handles.try_reserve(1).map_err(|_| FsError::ResourceExhausted)?;
        self.tree.get_mut(node)?.refs += 1;
        let fid = Fid::new(self.next_fid);
        self.next_fid += 1;
        self.handles.insert(
            fid,
            Handle {
                node,
                path,
                open: None,
                dir_cursor: 0,
            },
        );
        Ok(fid)
    }

    /// Node behind an open handle, checked for the requested direction
    fn open_node(&self, fid: Fid, write: bool) -> FsResult<NodeId> {
        let handle = self.handle(fid)?;
        let mode = handle.open.ok_or(FsError::NotOpen)?;
        let allowed = if write {
            mode.access.can_write()
        } else {
            mode.access.can_read()
        };
        if !allowed {
            return Err(FsError::BadMode);
        }
        self.tree.get(handle.node)?.ensure_valid()?;
        Ok(handle.node)
    }
}

/// Events recorded during one transaction
struct Events {
    enabled: bool,
    pending: Vec<EventKind>,
}

impl Events {
    fn record(&mut self, make: impl FnOnce() -> EventKind) {
        if self.enabled {
            self.pending.push(make());
        }
    }
}

fn join_path(path: &str, name: &str) -> String {
    match name {
        "." => path.to_string(),
        ".." => match path.rfind('/') {
            Some(cut) => path[..cut].to_string(),
            None => path.to_string(),
        },
        _ => format!("{path}/{name}"),
    }
}

/// An in-memory filesystem instance
pub struct RamFs {
    config: RamFsConfig,
    state: Mutex<FsState>,
    faults: FaultInjector,
    #[cfg(feature = "events")]
    next_subscription_id: Mutex<u64>,
    #[cfg(feature = "events")]
    event_subscriptions: Mutex<HashMap<SubscriptionId, Arc<dyn EventSink>>>,
}

impl Default for RamFs {
    fn default() -> Self {
        Self::with_valid_config(RamFsConfig::default())
    }
}

impl RamFs {
    /// Create a filesystem holding only its root directory
    pub fn new(config: RamFsConfig) -> FsResult<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: RamFsConfig) -> Self {
        debug!(owner = %config.owner, root_perm = format_args!("{:o}", config.root_perm), "ramfs init");
        Self {
            state: Mutex::new(FsState {
                tree: Tree::new(config.root_perm),
                handles: HashMap::new(),
                next_fid: 1,
            }),
            faults: FaultInjector::with_policy(config.faults.clone()),
            config,
            #[cfg(feature = "events")]
            next_subscription_id: Mutex::new(1),
            #[cfg(feature = "events")]
            event_subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RamFsConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, FsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` under the filesystem lock, then deliver its events
    fn transact<T>(
        &self,
        op: impl FnOnce(&mut FsState, &mut Events) -> FsResult<T>,
    ) -> FsResult<T> {
        let mut events = Events {
            enabled: cfg!(feature = "events") && self.config.track_events,
            pending: Vec::new(),
        };
        let result = {
            let mut state = self.lock();
            op(&mut state, &mut events)
        };
        self.emit(events.pending);
        result
    }

    /// Bind a fresh handle to the root
    pub fn attach(&self, spec: &str) -> FsResult<Fid> {
        self.transact(|state, _| {
            let root = state.tree.root();
            let fid = state.bind(root, format!("#{DEVICE_CHAR}{spec}"))?;
            debug!(%fid, spec, "attach");
            Ok(fid)
        })
    }

    /// New handle bound to the same node as `fid`
    pub fn clone_fid(&self, fid: Fid) -> FsResult<Fid> {
        let walk = self.walk::<&str>(fid, &[])?;
        walk.fid.ok_or(FsError::InvalidHandle)
    }

    /// Resolve `names` one step at a time starting from `fid`'s node.
    ///
    /// Failing on the first name is an error; failing later returns the qids
    /// of the steps that resolved and no handle.
    pub fn walk<S: AsRef<str>>(&self, fid: Fid, names: &[S]) -> FsResult<Walk> {
        self.transact(|state, _| {
            let (start, mut path) = {
                let handle = state.handle(fid)?;
                (handle.node, handle.path.clone())
            };
            state.tree.get(start)?.ensure_valid()?;

            let mut current = start;
            let mut qids = Vec::with_capacity(names.len());
            for (step, name) in names.iter().enumerate() {
                let name: &str = name.as_ref();
                if !state.tree.get(current)?.is_dir() {
                    if step == 0 {
                        return Err(FsError::NotADirectory);
                    }
                    break;
                }
                let next = if name == "." {
                    Some(current)
                } else {
                    dirgen::lookup(&state.tree, &self.config.owner, current, name)?
                };
                let Some(next) = next else {
                    if step == 0 {
                        return Err(FsError::NotFound);
                    }
                    break;
                };
                current = next;
                qids.push(state.tree.get(current)?.qid());
                path = join_path(&path, name);
            }

            let new_fid = if qids.len() == names.len() {
                Some(state.bind(current, path)?)
            } else {
                None
            };
            trace!(%fid, requested = names.len(), resolved = qids.len(), "walk");
            Ok(Walk { qids, fid: new_fid })
        })
    }

    pub fn open(&self, fid: Fid, mode: OpenMode) -> FsResult<Qid> {
        self.transact(|state, _| {
            let handle = state.handle(fid)?;
            if handle.open.is_some() {
                return Err(FsError::AlreadyOpen);
            }
            let node_id = handle.node;
            let node = state.tree.get(node_id)?;
            node.ensure_live()?;
            if let Some(parent) = node.parent {
                if dirgen::position_of(&state.tree, &self.config.owner, parent, node_id)?.is_none() {
                    return Err(FsError::NotFound);
                }
            }
            let node = state.tree.get_mut(node_id)?;
            if node.is_dir() && mode.access.can_write() {
                return Err(FsError::IsADirectory);
            }
            if mode.remove_on_close && node.is_root() {
                return Err(FsError::PermissionDenied);
            }
            node.open_count += 1;
            let qid = node.qid();

            let handle = state.handle_mut(fid)?;
            handle.open = Some(mode);
            handle.dir_cursor = 0;
            trace!(%fid, node = node_id.as_u64(), ?mode, "open");
            Ok(qid)
        })
    }

    /// Create `name` in the directory behind `fid` and rebind `fid` to the new,
    /// already opened, node.
    pub fn create(&self, fid: Fid, name: &str, mode: OpenMode, perm: u32) -> FsResult<Qid> {
        self.transact(|state, events| {
            let handle = state.handle(fid)?;
            if handle.open.is_some() {
                return Err(FsError::AlreadyOpen);
            }
            let parent = handle.node;
            let dir = state.tree.get(parent)?;
            dir.ensure_valid()?;
            if !dir.is_dir() {
                return Err(FsError::PermissionDenied);
            }
            dir.ensure_live()?;
            validate_name(name, max_name_len(&self.config.owner))?;
            if perm & DMDIR != 0 && mode.access.can_write() {
                return Err(FsError::IsADirectory);
            }

            self.faults.check(FaultOp::AllocName)?;
            let owned = alloc_name(name)?;
            self.faults.check(FaultOp::AllocNode)?;
            let id = state.tree.insert_child(parent, owned, perm)?;
            let node = state.tree.get_mut(id)?;
            node.open_count = 1;
            node.refs = 1;
            let qid = node.qid();
            state.tree.release(parent);

            let handle = state.handle_mut(fid)?;
            handle.node = id;
            handle.open = Some(mode);
            handle.dir_cursor = 0;
            handle.path = join_path(&handle.path, name);

            let path = state.tree.path_of(id);
            if state.tree.count_named(parent, name) > 1 {
                warn!(%path, "duplicate name in directory");
                events.record(|| EventKind::NameCollision { path: path.clone() });
            }
            debug!(%fid, node = id.as_u64(), %path, perm = format_args!("{perm:o}"), "create");
            events.record(|| EventKind::Created { path });
            Ok(qid)
        })
    }

    /// Read up to `buf.len()` bytes at `offset`.
    ///
    /// Files are read one block per step until the request is satisfied or a
    /// step transfers nothing. Directories return whole stat records.
    pub fn read(&self, fid: Fid, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        if self.is_dir(fid)? {
            return self.read_dir(fid, offset, buf);
        }
        let mut total = 0;
        while total < buf.len() {
            let amt = self.read_block(fid, offset.saturating_add(total as u64), &mut buf[total..])?;
            if amt == 0 {
                break;
            }
            total += amt;
        }
        Ok(total)
    }

    /// Single-block read primitive; never crosses a block boundary
    pub fn read_block(&self, fid: Fid, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        self.transact(|state, _| {
            let id = state.open_node(fid, false)?;
            let node = state.tree.get(id)?;
            if node.is_dir() {
                return Err(FsError::IsADirectory);
            }
            let n = node.data.read_block(offset, buf);
            trace!(%fid, offset, requested = buf.len(), n, "read block");
            Ok(n)
        })
    }

    /// Write `data` at `offset`, one block per step, stopping early when a
    /// step transfers nothing (the size ceiling).
    pub fn write(&self, fid: Fid, offset: u64, data: &[u8]) -> FsResult<usize> {
        let mut total = 0;
        while total < data.len() {
            let amt = self.write_block(fid, offset.saturating_add(total as u64), &data[total..])?;
            if amt == 0 {
                break;
            }
            total += amt;
        }
        Ok(total)
    }

    /// Single-block write primitive; never crosses a block boundary
    pub fn write_block(&self, fid: Fid, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.transact(|state, events| {
            let id = state.open_node(fid, true)?;
            let node = state.tree.get_mut(id)?;
            if node.is_dir() {
                return Err(FsError::IsADirectory);
            }
            if !data.is_empty() && node.data.needs_block(offset) {
                self.faults.check(FaultOp::AllocBlock)?;
            }
            let n = node.data.write_block(offset, data)?;
            if n > 0 {
                node.bump_version();
                events.record(|| EventKind::Modified {
                    path: state.tree.path_of(id),
                });
            }
            trace!(%fid, offset, requested = data.len(), n, "write block");
            Ok(n)
        })
    }

    fn read_dir(&self, fid: Fid, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        self.transact(|state, _| {
            let id = state.open_node(fid, false)?;
            if buf.is_empty() {
                return Ok(0);
            }
            let mut index = if offset == 0 {
                0
            } else {
                state.handle(fid)?.dir_cursor
            };
            let mut used = 0;
            loop {
                let entry = match dirgen::gen(
                    &state.tree,
                    &self.config.owner,
                    id,
                    GenPos::Index(index),
                    None,
                )? {
                    Gen::Match(dir) | Gen::Mismatch(dir) => dir,
                    Gen::End => break,
                };
                let bytes = entry.encode()?;
                if used + bytes.len() > buf.len() {
                    if used == 0 {
                        return Err(FsError::ShortBuffer);
                    }
                    break;
                }
                buf[used..used + bytes.len()].copy_from_slice(&bytes);
                used += bytes.len();
                index += 1;
            }
            state.handle_mut(fid)?.dir_cursor = index;
            trace!(%fid, offset, used, next = index, "read dir");
            Ok(used)
        })
    }

    fn is_dir(&self, fid: Fid) -> FsResult<bool> {
        self.transact(|state, _| {
            let node = state.tree.get(state.handle(fid)?.node)?;
            node.ensure_valid()?;
            Ok(node.is_dir())
        })
    }

    /// Directory entry of the node behind `fid`
    pub fn stat_dir(&self, fid: Fid) -> FsResult<Dir> {
        self.transact(|state, _| {
            let node = state.tree.get(state.handle(fid)?.node)?;
            node.ensure_valid()?;
            Ok(dirgen::dir_entry(node, &self.config.owner))
        })
    }

    /// Encoded directory entry of the node behind `fid`
    pub fn stat(&self, fid: Fid) -> FsResult<Vec<u8>> {
        self.stat_dir(fid)?.encode()
    }

    pub fn qid(&self, fid: Fid) -> FsResult<Qid> {
        Ok(self.stat_dir(fid)?.qid)
    }

    /// Cosmetic channel path of a handle
    pub fn path(&self, fid: Fid) -> FsResult<String> {
        self.transact(|state, _| Ok(state.handle(fid)?.path.clone()))
    }

    /// Apply a partial directory entry. All-ones integers and empty strings
    /// leave the field unchanged; nothing is applied unless every field passes.
    pub fn wstat(&self, fid: Fid, stat: &[u8]) -> FsResult<usize> {
        self.transact(|state, events| {
            let id = state.handle(fid)?.node;
            let node = state.tree.get(id)?;
            node.ensure_valid()?;

            let (dir, used) = Dir::decode(stat)?;
            if used == 0 {
                return Err(FsError::ShortStat);
            }

            let new_perm = if dir.mode != u32::MAX {
                if (dir.mode ^ node.perm) & DMDIR != 0 {
                    return Err(FsError::PermissionDenied);
                }
                Some(dir.mode)
            } else {
                None
            };
            for owner in [&dir.uid, &dir.gid] {
                if !owner.is_empty() && *owner != self.config.owner {
                    return Err(FsError::PermissionDenied);
                }
            }
            if dir.length != u64::MAX && dir.length != node.len() {
                return Err(FsError::PermissionDenied);
            }
            let new_name = if !dir.name.is_empty() && dir.name != node.name {
                validate_name(&dir.name, max_name_len(&self.config.owner))?;
                if node.is_root() {
                    return Err(FsError::PermissionDenied);
                }
                self.faults.check(FaultOp::AllocName)?;
                Some(alloc_name(&dir.name)?)
            } else {
                None
            };

            if new_perm.is_none() && new_name.is_none() {
                return Ok(used);
            }
            let from = state.tree.path_of(id);
            let node = state.tree.get_mut(id)?;
            if let Some(perm) = new_perm {
                node.perm = perm;
            }
            let renamed = new_name.is_some();
            if let Some(name) = new_name {
                node.name = name;
            }
            node.bump_version();

            if renamed {
                let to = state.tree.path_of(id);
                let node = state.tree.get(id)?;
                let duplicated = node
                    .parent
                    .is_some_and(|parent| state.tree.count_named(parent, &node.name) > 1);
                if duplicated {
                    warn!(path = %to, "rename produced a duplicate name");
                    events.record(|| EventKind::NameCollision { path: to.clone() });
                }
                debug!(%fid, %from, %to, "rename");
                events.record(|| EventKind::Renamed { from, to });
            } else {
                debug!(%fid, path = %from, perm = format_args!("{:o}", new_perm.unwrap_or_default()), "wstat");
                events.record(|| EventKind::Modified { path: from });
            }
            Ok(used)
        })
    }

    /// Remove the node behind `fid`. The handle is released whatever the
    /// outcome. Destruction waits for the last other open handle to close.
    pub fn remove(&self, fid: Fid) -> FsResult<RemoveOutcome> {
        self.transact(|state, events| {
            let handle = state.handles.remove(&fid).ok_or(FsError::InvalidHandle)?;
            let result = self.remove_node(state, handle.node, handle.open.is_some(), events);
            state.tree.release(handle.node);
            result
        })
    }

    fn remove_node(
        &self,
        state: &mut FsState,
        id: NodeId,
        was_open: bool,
        events: &mut Events,
    ) -> FsResult<RemoveOutcome> {
        let has_children = state.tree.has_children(id);
        let node = state.tree.get_mut(id)?;
        if node.state == Lifecycle::Destroyed {
            return Err(FsError::NotFound);
        }
        if was_open {
            node.open_count = node.open_count.saturating_sub(1);
        }
        if node.is_root() {
            return Err(FsError::PermissionDenied);
        }
        if has_children {
            return Err(FsError::NotEmpty);
        }
        if node.open_count > 0 {
            node.state = Lifecycle::PendingDelete;
            debug!(node = id.as_u64(), open = node.open_count, "remove deferred");
            return Ok(RemoveOutcome::Deferred);
        }
        self.destroy(state, id, events)?;
        Ok(RemoveOutcome::Removed)
    }

    /// Release a handle. Closing the last open handle of a node that was
    /// removed (or opened with remove-on-close) destroys it.
    pub fn close(&self, fid: Fid) -> FsResult<()> {
        self.transact(|state, events| {
            let handle = state.handles.remove(&fid).ok_or(FsError::InvalidHandle)?;
            let result = match handle.open {
                Some(mode) => self.release_open(state, handle.node, mode, events),
                None => Ok(()),
            };
            state.tree.release(handle.node);
            trace!(%fid, node = handle.node.as_u64(), "close");
            result
        })
    }

    fn release_open(
        &self,
        state: &mut FsState,
        id: NodeId,
        mode: OpenMode,
        events: &mut Events,
    ) -> FsResult<()> {
        let has_children = state.tree.has_children(id);
        let node = state.tree.get_mut(id)?;
        if node.state == Lifecycle::Destroyed {
            return Ok(());
        }
        node.open_count = node.open_count.saturating_sub(1);
        if mode.remove_on_close && node.state == Lifecycle::Live {
            if has_children {
                warn!(node = id.as_u64(), "remove-on-close skipped for non-empty directory");
            } else {
                node.state = Lifecycle::PendingDelete;
            }
        }
        if node.state == Lifecycle::PendingDelete && node.open_count == 0 {
            self.destroy(state, id, events)?;
        }
        Ok(())
    }

    fn destroy(&self, state: &mut FsState, id: NodeId, events: &mut Events) -> FsResult<()> {
        let path = state.tree.path_of(id);
        state.tree.destroy(id)?;
        debug!(node = id.as_u64(), %path, "destroyed");
        if self.config.dump_tree {
            debug!(tree = %state.tree.dump(), "ram tree");
        }
        events.record(|| EventKind::Removed { path });
        Ok(())
    }

    pub fn stats(&self) -> FsStats {
        let state = self.lock();
        let mut stats = FsStats {
            handles: state.handles.len(),
            open_files: state.handles.values().filter(|h| h.open.is_some()).count(),
            ..FsStats::default()
        };
        for node in state.tree.nodes() {
            match node.state() {
                Lifecycle::Destroyed => continue,
                Lifecycle::PendingDelete => stats.pending_delete += 1,
                Lifecycle::Live => {}
            }
            stats.nodes += 1;
            stats.blocks += node.data.block_count();
            stats.bytes_in_memory += node.data.bytes_in_memory();
        }
        stats
    }

    /// Indented listing of the whole tree
    pub fn dump_tree(&self) -> String {
        self.lock().tree.dump()
    }

    pub fn fault_policy(&self) -> FaultPolicy {
        self.faults.snapshot()
    }

    pub fn set_fault_policy(&self, policy: FaultPolicy) {
        debug!(enabled = policy.enabled, rules = policy.rules.len(), "fault policy set");
        self.faults.set_policy(policy);
    }

    pub fn clear_fault_policy(&self) {
        self.faults.clear();
    }

    #[cfg(feature = "events")]
    pub fn subscribe_events(&self, cb: Arc<dyn EventSink>) -> FsResult<SubscriptionId> {
        let mut next_id = self.next_subscription_id.lock().unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId::new(*next_id);
        *next_id += 1;
        self.event_subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, cb);
        Ok(id)
    }

    #[cfg(feature = "events")]
    pub fn unsubscribe_events(&self, sub: SubscriptionId) -> FsResult<()> {
        self.event_subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&sub)
            .map(|_| ())
            .ok_or(FsError::NotFound)
    }

    #[cfg(feature = "events")]
    fn emit(&self, events: Vec<EventKind>) {
        if events.is_empty() {
            return;
        }
        let sinks: Vec<Arc<dyn EventSink>> = self
            .event_subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for event in &events {
            for sink in &sinks {
                sink.on_event(event);
            }
        }
    }

    #[cfg(not(feature = "events"))]
    fn emit(&self, _events: Vec<EventKind>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BLOCK_SIZE;
    use crate::fault::FaultRule;

    fn fs() -> RamFs {
        RamFs::default()
    }

    fn create_file(fs: &RamFs, dir: Fid, name: &str) -> Fid {
        let fid = fs.clone_fid(dir).unwrap();
        fs.create(fid, name, OpenMode::read_write(), 0o644).unwrap();
        fid
    }

    #[test]
    fn attach_binds_root() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        let qid = fs.qid(root).unwrap();
        assert!(qid.is_dir());
        assert_eq!(fs.path(root).unwrap(), "#@");
        assert_eq!(fs.stat_dir(root).unwrap().name, "/");
    }

    #[test]
    fn create_rebinds_handle_and_opens() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        let fid = create_file(&fs, root, "f");
        assert_eq!(fs.path(fid).unwrap(), "#@/f");
        assert_eq!(fs.open(fid, OpenMode::read()), Err(FsError::AlreadyOpen));
        let stats = fs.stats();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.open_files, 1);
    }

    #[test]
    fn create_under_file_is_denied() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        let file = create_file(&fs, root, "f");
        fs.close(file).unwrap();
        let walked = fs.walk(root, &["f"]).unwrap().fid.unwrap();
        assert_eq!(
            fs.create(walked, "x", OpenMode::read(), 0o644),
            Err(FsError::PermissionDenied)
        );
    }

    #[test]
    fn create_rejects_bad_names() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        let fid = fs.clone_fid(root).unwrap();
        assert_eq!(
            fs.create(fid, "a/b", OpenMode::read(), 0o644),
            Err(FsError::BadCharacter)
        );
        assert_eq!(
            fs.create(fid, "..", OpenMode::read(), 0o644),
            Err(FsError::BadCharacter)
        );
    }

    #[test]
    fn directory_cannot_be_opened_for_write() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        let fid = fs.clone_fid(root).unwrap();
        assert_eq!(fs.open(fid, OpenMode::write()), Err(FsError::IsADirectory));
        let dir = fs.clone_fid(root).unwrap();
        assert_eq!(
            fs.create(dir, "d", OpenMode::read_write(), DMDIR | 0o755),
            Err(FsError::IsADirectory)
        );
    }

    #[test]
    fn io_requires_open_handle_with_matching_mode() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        let fid = create_file(&fs, root, "f");
        fs.close(fid).unwrap();

        let walked = fs.walk(root, &["f"]).unwrap().fid.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(walked, 0, &mut buf), Err(FsError::NotOpen));
        fs.open(walked, OpenMode::read()).unwrap();
        assert_eq!(fs.write(walked, 0, b"x"), Err(FsError::BadMode));
    }

    #[test]
    fn outer_write_spans_blocks() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        let fid = create_file(&fs, root, "big");
        let data: Vec<u8> = (0..8200u32).map(|i| (i % 251) as u8).collect();

        assert_eq!(fs.write_block(fid, 0, &data).unwrap(), BLOCK_SIZE);
        assert_eq!(fs.write_block(fid, BLOCK_SIZE as u64, &data[BLOCK_SIZE..]).unwrap(), 8);
        assert_eq!(fs.write(fid, 0, &data).unwrap(), 8200);

        let mut back = vec![0u8; 8200];
        assert_eq!(fs.read_block(fid, 0, &mut back).unwrap(), BLOCK_SIZE);
        assert_eq!(fs.read(fid, 0, &mut back).unwrap(), 8200);
        assert_eq!(back, data);
        assert_eq!(fs.stats().blocks, 2);
    }

    #[test]
    fn write_bumps_qid_version() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        let fid = create_file(&fs, root, "f");
        let before = fs.qid(fid).unwrap();
        fs.write(fid, 0, b"abc").unwrap();
        let after = fs.qid(fid).unwrap();
        assert_eq!(before.path, after.path);
        assert_eq!(after.version, before.version + 1);
    }

    #[test]
    fn block_allocation_fault_surfaces_resource_exhausted() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        let fid = create_file(&fs, root, "f");
        fs.set_fault_policy(FaultPolicy {
            enabled: true,
            rules: vec![FaultRule {
                op: FaultOp::AllocBlock,
                start_after: 1,
                max_faults: Some(1),
            }],
        });

        let data = vec![1u8; 2 * BLOCK_SIZE];
        assert_eq!(fs.write(fid, 0, &data), Err(FsError::ResourceExhausted));
        // first block landed before the fault
        assert_eq!(fs.stat_dir(fid).unwrap().length, BLOCK_SIZE as u64);
        assert_eq!(fs.write(fid, 0, &data).unwrap(), data.len());
        fs.clear_fault_policy();
        assert!(!fs.fault_policy().enabled);
    }

    #[test]
    fn node_allocation_fault_leaves_tree_untouched() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        fs.set_fault_policy(FaultPolicy {
            enabled: true,
            rules: vec![FaultRule {
                op: FaultOp::AllocNode,
                ..FaultRule::default()
            }],
        });
        let fid = fs.clone_fid(root).unwrap();
        assert_eq!(
            fs.create(fid, "f", OpenMode::read_write(), 0o644),
            Err(FsError::ResourceExhausted)
        );
        assert_eq!(fs.stats().nodes, 1);
        assert!(fs.qid(fid).unwrap().is_dir());
    }

    #[test]
    fn remove_of_root_is_denied() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        let other = fs.clone_fid(root).unwrap();
        assert_eq!(fs.remove(other), Err(FsError::PermissionDenied));
        assert_eq!(fs.close(other), Err(FsError::InvalidHandle));
        assert!(fs.qid(root).unwrap().is_dir());
    }

    #[test]
    fn dump_tree_lists_nodes() {
        let fs = fs();
        let root = fs.attach("").unwrap();
        let fid = create_file(&fs, root, "notes");
        fs.write(fid, 0, b"12345").unwrap();
        let dump = fs.dump_tree();
        assert!(dump.contains("notes"));
        assert!(dump.contains("len=5"));
    }

    #[cfg(feature = "events")]
    #[test]
    fn sink_sees_events_after_lock_release() {
        use crate::types::MockEventSink;
        use std::sync::Arc;

        let fs = Arc::new(fs());
        let root = fs.attach("").unwrap();
        let mut mock = MockEventSink::new();
        let inner = Arc::clone(&fs);
        mock.expect_on_event()
            .withf(|evt| matches!(evt, EventKind::Created { path } if path == "/reentrant"))
            .times(1)
            .returning(move |_| {
                // re-entering the filesystem from a sink must not deadlock
                assert_eq!(inner.stats().nodes, 2);
            });
        let sub = fs.subscribe_events(Arc::new(mock)).unwrap();
        let fid = fs.clone_fid(root).unwrap();
        fs.create(fid, "reentrant", OpenMode::read(), 0o644).unwrap();
        fs.unsubscribe_events(sub).unwrap();
    }

    #[test]
    fn join_path_handles_dots() {
        assert_eq!(join_path("#@/a/b", ".."), "#@/a");
        assert_eq!(join_path("#@/a", "."), "#@/a");
        assert_eq!(join_path("#@", "x"), "#@/x");
    }
}
