use crate::{Error, Result};
use alloc::vec;
use alloc::vec::Vec;

/// In-memory allocation file: one bit per allocation block, set when the
/// block is in use. Block 0 is the most significant bit of byte 0.
#[derive(Debug, Clone)]
pub struct AllocationBitmap {
    bits: Vec<u8>,
    total_blocks: u32,
    free_blocks: u32,
}

impl AllocationBitmap {
    pub fn new(total_blocks: u32) -> Self {
        Self {
            bits: vec![0; (total_blocks as usize).div_ceil(8)],
            total_blocks,
            free_blocks: total_blocks,
        }
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    pub fn free_blocks(&self) -> u32 {
        self.free_blocks
    }

    pub fn is_used(&self, block: u32) -> bool {
        block < self.total_blocks && self.bits[(block / 8) as usize] & (0x80 >> (block % 8)) != 0
    }

    fn set(&mut self, block: u32) {
        let byte = &mut self.bits[(block / 8) as usize];
        let mask = 0x80 >> (block % 8);
        if *byte & mask == 0 {
            *byte |= mask;
            self.free_blocks -= 1;
        }
    }

    /// Marks `start..start + count` used regardless of its current state.
    pub fn mark_used(&mut self, start: u32, count: u32) -> Result<()> {
        let end = start
            .checked_add(count)
            .filter(|&end| end <= self.total_blocks)
            .ok_or(Error::OutOfRange {
                start,
                count,
                total: self.total_blocks,
            })?;
        for block in start..end {
            self.set(block);
        }
        Ok(())
    }

    /// Finds the first run of `count` free blocks at or after `hint`, marks
    /// it used and returns its first block. The search does not wrap.
    pub fn allocate(&mut self, count: u32, hint: u32) -> Result<u32> {
        if count == 0 {
            return Ok(hint.min(self.total_blocks));
        }
        let mut run_start = hint;
        let mut run_len = 0;
        let mut block = hint;
        while block < self.total_blocks {
            if self.is_used(block) {
                run_len = 0;
                run_start = block + 1;
            } else {
                run_len += 1;
                if run_len == count {
                    self.mark_used(run_start, count)?;
                    return Ok(run_start);
                }
            }
            block += 1;
        }
        Err(Error::NoSpace { count })
    }

    /// Serializes the map padded with zeros to `len` bytes.
    pub fn to_bytes(&self, len: usize) -> Vec<u8> {
        let mut bytes = self.bits.clone();
        bytes.resize(len.max(bytes.len()), 0);
        bytes
    }
}

/// Allocation blocks needed to hold a bitmap for `total_blocks` blocks.
pub fn bitmap_blocks(total_blocks: u64, block_size: u32) -> u64 {
    total_blocks.div_ceil(8).div_ceil(block_size as u64)
}
