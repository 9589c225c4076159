//! Heap consistency checker.
//!
//! Not used on any allocation path; tests and paranoid mode call it after the
//! fact to catch double frees, foreign pointers and allocator bugs.

use thiserror::Error;

use crate::{
  bins::{self, BinTable, MIN_BLOCK_SIZE, NODE_SIZE, NUM_BINS},
  block::{self, FOOTER_SIZE, HEADER_SIZE, INIT_OFFSET, MAX_DATA_SIZE, TAG_OVERHEAD},
};

/// First inconsistency found by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
  #[error("heap of {len:#x} bytes is shorter than its init padding")]
  Uninitialized { len: usize },
  #[error("block with header at {at:#x} runs past the heap end {len:#x}")]
  HeapWalk { at: usize, len: usize },
  #[error("block {ptr:#x}: header says {header:#x}, footer says {footer:#x}")]
  TagMismatch {
    ptr: usize,
    header: usize,
    footer: usize,
  },
  #[error("free block {ptr:#x} is smaller than a free list node")]
  Undersized { ptr: usize },
  #[error("free block {ptr:#x} should have merged with the free block before it")]
  Uncoalesced { ptr: usize },
  #[error("bin {bin}: links around {ptr:#x} do not agree")]
  BrokenLink { bin: usize, ptr: usize },
  #[error("bin {bin}: block {ptr:#x} is not tagged free")]
  NotFree { bin: usize, ptr: usize },
  #[error("bin {bin}: block {ptr:#x} belongs in bin {expected}")]
  WrongBin {
    bin: usize,
    ptr: usize,
    expected: usize,
  },
  #[error("{walked} free blocks on the heap but {linked} in the bins")]
  LostFreeBlock { walked: usize, linked: usize },
}

/// Checks that the block tags tile `mem` exactly and that the bins hold
/// exactly the free blocks, with consistent links.
pub fn validate(
  mem: &[u8],
  bins: &BinTable,
) -> Result<(), Corruption> {
  let walked = walk_heap(mem)?;
  let linked = walk_bins(mem, bins, walked)?;
  if walked != linked {
    return Err(Corruption::LostFreeBlock { walked, linked });
  }
  Ok(())
}

/// Walks headers from the bottom of the heap; returns the free block count.
fn walk_heap(mem: &[u8]) -> Result<usize, Corruption> {
  let len = mem.len();
  if len < INIT_OFFSET {
    return Err(Corruption::Uninitialized { len });
  }

  let mut at = INIT_OFFSET;
  let mut free_blocks = 0;
  // Data size of the previous block while it is free.
  let mut prev_free: Option<usize> = None;
  while at < len {
    let ptr = at + HEADER_SIZE;
    if ptr > len {
      return Err(Corruption::HeapWalk { at, len });
    }
    let size = block::read_size(mem, ptr);
    let end = ptr + size + FOOTER_SIZE;
    if end > len {
      return Err(Corruption::HeapWalk { at, len });
    }

    let footer = block::read_footer(mem, ptr, size);
    if footer != block::IN_USE && footer != size {
      return Err(Corruption::TagMismatch {
        ptr,
        header: size,
        footer,
      });
    }

    let free = block::is_free(footer);
    if free {
      if size + TAG_OVERHEAD < MIN_BLOCK_SIZE {
        return Err(Corruption::Undersized { ptr });
      }
      // Neighbours too big to merge into one encodable block may stay apart.
      if prev_free.is_some_and(|prev| prev + TAG_OVERHEAD + size <= MAX_DATA_SIZE) {
        return Err(Corruption::Uncoalesced { ptr });
      }
      free_blocks += 1;
    }
    prev_free = free.then_some(size);
    at = end;
  }

  Ok(free_blocks)
}

/// Walks every bin; returns the number of linked blocks.
fn walk_bins(
  mem: &[u8],
  bins: &BinTable,
  walked: usize,
) -> Result<usize, Corruption> {
  let first = INIT_OFFSET + HEADER_SIZE;
  let mut linked = 0;

  for bin in 0..NUM_BINS {
    let mut expected_prev = None;
    let mut cursor = bins.head(bin);
    while let Some(ptr) = cursor {
      let in_bounds = ptr >= first && ptr.checked_add(NODE_SIZE).is_some_and(|end| end <= mem.len());
      if !in_bounds || bins::prev(mem, ptr) != expected_prev {
        return Err(Corruption::BrokenLink { bin, ptr });
      }

      let size = block::read_size(mem, ptr);
      if ptr + size + FOOTER_SIZE > mem.len() || !block::is_free(block::read_footer(mem, ptr, size)) {
        return Err(Corruption::NotFree { bin, ptr });
      }
      let expected = bins::bin_index(size + TAG_OVERHEAD);
      if expected != bin {
        return Err(Corruption::WrongBin { bin, ptr, expected });
      }

      // More nodes than free blocks means a cycle the prev links missed.
      linked += 1;
      if linked > walked {
        return Err(Corruption::LostFreeBlock { walked, linked });
      }
      expected_prev = Some(ptr);
      cursor = bins::next(mem, ptr);
    }
  }

  Ok(linked)
}
