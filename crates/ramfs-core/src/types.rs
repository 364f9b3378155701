// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for the ram filesystem protocol surface

use crate::error::{FsError, FsResult};

/// Directory bit in a permission word
pub const DMDIR: u32 = 0x8000_0000;

/// Device character reported in the `type` field of every directory entry
pub const DEVICE_CHAR: char = '@';

/// 9P open-mode bits
pub const OREAD: u8 = 0;
pub const OWRITE: u8 = 1;
pub const ORDWR: u8 = 2;
pub const OEXEC: u8 = 3;
pub const OTRUNC: u8 = 0x10;
pub const ORCLOSE: u8 = 0x40;

/// Opaque handle identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fid(pub u64);

impl Fid {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for Fid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fid{}", self.0)
    }
}

/// Kind bit carried by a qid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QidKind {
    File,
    Dir,
}

impl QidKind {
    pub const DIR_BITS: u8 = 0x80;

    pub fn bits(self) -> u8 {
        match self {
            QidKind::File => 0,
            QidKind::Dir => Self::DIR_BITS,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        if bits & Self::DIR_BITS != 0 {
            QidKind::Dir
        } else {
            QidKind::File
        }
    }

    pub fn from_perm(perm: u32) -> Self {
        if perm & DMDIR != 0 {
            QidKind::Dir
        } else {
            QidKind::File
        }
    }
}

/// (path, version, type) triple identifying a node to callers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Qid {
    pub kind: QidKind,
    pub version: u32,
    pub path: u64,
}

impl Qid {
    pub fn is_dir(&self) -> bool {
        self.kind == QidKind::Dir
    }
}

/// Access half of an open mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
    Exec,
}

impl Access {
    pub fn can_read(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite | Access::Exec)
    }

    pub fn can_write(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// Mode a handle is opened with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenMode {
    pub access: Access,
    /// Remove the file when this handle is closed (`ORCLOSE`)
    pub remove_on_close: bool,
}

impl OpenMode {
    pub const fn new(access: Access) -> Self {
        Self {
            access,
            remove_on_close: false,
        }
    }

    pub const fn read() -> Self {
        Self::new(Access::Read)
    }

    pub const fn write() -> Self {
        Self::new(Access::Write)
    }

    pub const fn read_write() -> Self {
        Self::new(Access::ReadWrite)
    }

    pub fn with_remove_on_close(mut self) -> Self {
        self.remove_on_close = true;
        self
    }

    /// Parse a 9P mode byte. Truncation is not supported by this device.
    pub fn from_bits(bits: u8) -> FsResult<Self> {
        if bits & !(3 | ORCLOSE) != 0 {
            return Err(FsError::BadMode);
        }
        let access = match bits & 3 {
            OREAD => Access::Read,
            OWRITE => Access::Write,
            ORDWR => Access::ReadWrite,
            _ => Access::Exec,
        };
        Ok(Self {
            access,
            remove_on_close: bits & ORCLOSE != 0,
        })
    }

    pub fn bits(self) -> u8 {
        let access = match self.access {
            Access::Read => OREAD,
            Access::Write => OWRITE,
            Access::ReadWrite => ORDWR,
            Access::Exec => OEXEC,
        };
        if self.remove_on_close {
            access | ORCLOSE
        } else {
            access
        }
    }
}

/// Result of a walk: one qid per resolved name, and a new handle only when
/// every name resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Walk {
    pub qids: Vec<Qid>,
    pub fid: Option<Fid>,
}

impl Walk {
    pub fn is_complete(&self) -> bool {
        self.fid.is_some()
    }
}

/// What a remove request did to the node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Node was destroyed immediately
    Removed,
    /// Node is still open elsewhere and will be destroyed on the last close
    Deferred,
}

/// Filesystem statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsStats {
    pub nodes: usize,
    pub pending_delete: usize,
    pub handles: usize,
    pub open_files: usize,
    pub blocks: usize,
    pub bytes_in_memory: u64,
}

/// Event kinds for filesystem change notifications
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Created { path: String },
    Removed { path: String },
    Modified { path: String },
    Renamed { from: String, to: String },
    /// A create or rename left two siblings with the same name
    NameCollision { path: String },
}

/// Event sink trait for receiving filesystem change notifications
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn on_event(&self, evt: &EventKind);
}

/// Opaque event subscription identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}
