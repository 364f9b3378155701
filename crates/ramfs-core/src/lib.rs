// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RamFS Core - an in-memory hierarchical filesystem with 9P-style semantics
//!
//! Files and directories live entirely in memory. Clients attach to the root,
//! walk names to obtain handles, then open, read, write, stat and remove
//! through those handles. File contents are kept in sparse fixed-size blocks.

pub mod block;
pub mod config;
pub mod dir;
pub mod dirgen;
pub mod error;
pub mod fault;
pub mod node;
pub mod session;
pub mod testing;
pub mod tree;
pub mod types;

pub use block::{BlockStore, BLOCK_SIZE, MAX_BLOCKS, MAX_FILE_SIZE};
pub use config::RamFsConfig;
pub use dir::Dir;
pub use error::{FsError, FsResult};
pub use fault::{FaultInjector, FaultOp, FaultPolicy, FaultRule};
pub use node::{Lifecycle, NodeId};
pub use session::RamFs;
pub use types::*;
