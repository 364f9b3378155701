// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-file block storage
//!
//! File data lives in fixed 8 KiB blocks kept in a sparse map keyed by block
//! index. A block is allocated (zero-filled) the first time a write touches it.
//! Every primitive transfers at most the remainder of the block containing the
//! starting offset; callers loop to cover larger spans.

use std::collections::BTreeMap;

use crate::error::{FsError, FsResult};

pub const BLOCK_SHIFT: u32 = 13;
pub const BLOCK_SIZE: usize = 1 << BLOCK_SHIFT;
pub const MAX_BLOCKS: usize = 4096;
pub const MAX_FILE_SIZE: u64 = (BLOCK_SIZE as u64) * (MAX_BLOCKS as u64);

/// Where a single-block transfer lands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSpan {
    pub index: u64,
    pub offset_in_block: usize,
    pub len: usize,
}

impl BlockSpan {
    /// Clamp a request of `len` bytes at `offset` to the block holding `offset`
    pub fn at(offset: u64, len: usize) -> Self {
        let offset_in_block = (offset & (BLOCK_SIZE as u64 - 1)) as usize;
        Self {
            index: offset >> BLOCK_SHIFT,
            offset_in_block,
            len: len.min(BLOCK_SIZE - offset_in_block),
        }
    }

    pub fn in_range(&self) -> bool {
        self.index < MAX_BLOCKS as u64
    }
}

#[derive(Debug, Default)]
pub struct BlockStore {
    blocks: BTreeMap<usize, Box<[u8]>>,
    length: u64,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logical size in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn bytes_in_memory(&self) -> u64 {
        (self.blocks.len() * BLOCK_SIZE) as u64
    }

    /// True when a write at `offset` would have to allocate a fresh block
    pub fn needs_block(&self, offset: u64) -> bool {
        let span = BlockSpan::at(offset, 0);
        span.in_range() && !self.blocks.contains_key(&(span.index as usize))
    }

    /// Read from the block holding `offset`. Unallocated blocks inside the
    /// logical length read as zeros; reads at or past the end return 0.
    pub fn read_block(&self, offset: u64, buf: &mut [u8]) -> usize {
        if offset >= self.length {
            return 0;
        }
        let span = BlockSpan::at(offset, buf.len());
        if !span.in_range() {
            return 0;
        }
        let n = span.len.min((self.length - offset) as usize);
        let dst = &mut buf[..n];
        match self.blocks.get(&(span.index as usize)) {
            Some(block) => {
                dst.copy_from_slice(&block[span.offset_in_block..span.offset_in_block + n])
            }
            None => dst.fill(0),
        }
        n
    }

    /// Write into the block holding `offset`, allocating it on first touch and
    /// extending the logical length. Returns 0 past the block ceiling.
    pub fn write_block(&mut self, offset: u64, data: &[u8]) -> FsResult<usize> {
        let span = BlockSpan::at(offset, data.len());
        if !span.in_range() || span.len == 0 {
            return Ok(0);
        }
        let block = match self.blocks.entry(span.index as usize) {
            std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::btree_map::Entry::Vacant(e) => e.insert(allocate_block()?),
        };
        block[span.offset_in_block..span.offset_in_block + span.len]
            .copy_from_slice(&data[..span.len]);
        let end = offset + span.len as u64;
        if end > self.length {
            self.length = end;
        }
        Ok(span.len)
    }

    /// Drop every block buffer
    pub fn free(&mut self) {
        self.blocks.clear();
    }
}

fn allocate_block() -> FsResult<Box<[u8]>> {
    let mut block = Vec::new();
    block.try_reserve_exact(BLOCK_SIZE).map_err(|_| FsError::ResourceExhausted)?;
    block.resize(BLOCK_SIZE, 0);
    Ok(block.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_clamps_to_block_boundary() {
        let span = BlockSpan::at(8000, 500);
        assert_eq!(span.index, 0);
        assert_eq!(span.offset_in_block, 8000);
        assert_eq!(span.len, 192);

        let span = BlockSpan::at(8192, 8200);
        assert_eq!(span.index, 1);
        assert_eq!(span.len, BLOCK_SIZE);
    }

    #[test]
    fn write_is_single_block_and_extends_length() {
        let mut store = BlockStore::new();
        let data = vec![7u8; 8200];
        assert_eq!(store.write_block(0, &data).unwrap(), 8192);
        assert_eq!(store.len(), 8192);
        assert_eq!(store.write_block(8192, &data[8192..]).unwrap(), 8);
        assert_eq!(store.len(), 8200);
        assert_eq!(store.block_count(), 2);
    }

    #[test]
    fn write_never_shrinks_length() {
        let mut store = BlockStore::new();
        store.write_block(100, b"tail").unwrap();
        store.write_block(0, b"head").unwrap();
        assert_eq!(store.len(), 104);
    }

    #[test]
    fn holes_read_as_zeros_within_length() {
        let mut store = BlockStore::new();
        store.write_block(3 * BLOCK_SIZE as u64, b"x").unwrap();
        assert_eq!(store.block_count(), 1);

        let mut buf = [0xaau8; 16];
        assert_eq!(store.read_block(BLOCK_SIZE as u64, &mut buf), 16);
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn read_clamps_to_length_and_block() {
        let mut store = BlockStore::new();
        store.write_block(0, b"hello").unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(store.read_block(0, &mut buf), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(store.read_block(5, &mut buf), 0);
        assert_eq!(store.read_block(1 << 40, &mut buf), 0);
    }

    #[test]
    fn writes_past_ceiling_transfer_nothing() {
        let mut store = BlockStore::new();
        assert_eq!(store.write_block(MAX_FILE_SIZE, b"x").unwrap(), 0);
        assert_eq!(store.write_block(MAX_FILE_SIZE - 1, b"xy").unwrap(), 1);
        assert_eq!(store.len(), MAX_FILE_SIZE);
        assert!(!store.needs_block(MAX_FILE_SIZE));
    }

    #[test]
    fn free_releases_blocks() {
        let mut store = BlockStore::new();
        store.write_block(0, b"abc").unwrap();
        assert!(!store.needs_block(10));
        store.free();
        assert_eq!(store.block_count(), 0);
        assert_eq!(store.bytes_in_memory(), 0);
        assert!(store.needs_block(10));
    }
}
