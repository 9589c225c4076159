//! Segregated free lists.
//!
//! Free blocks are threaded into one of [`NUM_BINS`] doubly linked lists
//! according to their total size (tags included). The links live in the
//! first 16 bytes of the free block's data region as heap offsets, so the
//! lists cost no memory beyond the blocks themselves.
//!
//! ```text
//!   bin   total size
//!   0     [24, 32)
//!   1     [32, 64)
//!   2     [64, 128)
//!   ...
//!   27    [2^31, 2^32]
//!
//!   free block:
//!   ┌────────┬──────────┬──────────┬───────────────┬────────┐
//!   │ header │ prev u64 │ next u64 │ ...           │ footer │
//!   └────────┴──────────┴──────────┴───────────────┴────────┘
//! ```

use crate::block::{self, MAX_DATA_SIZE, TAG_OVERHEAD};

/// Bytes of link storage a free block needs in its data region.
pub const NODE_SIZE: usize = 16;

/// Smallest total block size: both tags plus the free list node.
pub const MIN_BLOCK_SIZE: usize = 24;
const _: () = assert!(MIN_BLOCK_SIZE >= TAG_OVERHEAD + NODE_SIZE);

pub const MIN_BLOCK_EXP: u32 = 4;
pub const MAX_BLOCK_EXP: u32 = 32;
pub const NUM_BINS: usize = (MAX_BLOCK_EXP - MIN_BLOCK_EXP) as usize;
const _: () = assert!(1 << MAX_BLOCK_EXP == MAX_DATA_SIZE);

/// Maps the total size of a block to its bin.
///
/// A total at or past `2^32`, which wraps to `0` in a 32-bit field, belongs
/// to the last bin.
pub fn bin_index(total: usize) -> usize {
  if total >= 1 << MAX_BLOCK_EXP {
    return NUM_BINS - 1;
  }
  if total < 2 << MIN_BLOCK_EXP {
    return 0;
  }
  (total.ilog2() - MIN_BLOCK_EXP) as usize
}

fn read_link(
  mem: &[u8],
  at: usize,
) -> Option<usize> {
  let mut raw = [0; 8];
  raw.copy_from_slice(&mem[at..at + 8]);
  match u64::from_ne_bytes(raw) {
    0 => None,
    offset => Some(offset as usize),
  }
}

fn write_link(
  mem: &mut [u8],
  at: usize,
  link: Option<usize>,
) {
  let raw = link.map_or(0, |offset| offset as u64);
  mem[at..at + 8].copy_from_slice(&raw.to_ne_bytes());
}

#[inline]
pub fn prev(
  mem: &[u8],
  ptr: usize,
) -> Option<usize> {
  read_link(mem, ptr)
}

#[inline]
pub fn next(
  mem: &[u8],
  ptr: usize,
) -> Option<usize> {
  read_link(mem, ptr + 8)
}

#[inline]
fn set_prev(
  mem: &mut [u8],
  ptr: usize,
  link: Option<usize>,
) {
  write_link(mem, ptr, link);
}

#[inline]
fn set_next(
  mem: &mut [u8],
  ptr: usize,
  link: Option<usize>,
) {
  write_link(mem, ptr + 8, link);
}

/// Heads of the segregated free lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinTable {
  heads: [Option<usize>; NUM_BINS],
}

impl Default for BinTable {
  fn default() -> Self {
    Self::new()
  }
}

impl BinTable {
  pub const fn new() -> Self {
    Self {
      heads: [None; NUM_BINS],
    }
  }

  pub fn head(
    &self,
    bin: usize,
  ) -> Option<usize> {
    self.heads[bin]
  }

  pub fn is_empty(&self) -> bool {
    self.heads.iter().all(Option::is_none)
  }

  /// Tags the block at `ptr` free and pushes it onto the front of its bin.
  ///
  /// The header of the block must already hold its final size.
  pub fn insert(
    &mut self,
    mem: &mut [u8],
    ptr: usize,
  ) {
    let size = block::read_size(mem, ptr);
    let total = size + TAG_OVERHEAD;
    debug_assert!(total >= MIN_BLOCK_SIZE, "block at {ptr:#x} too small to be free");

    block::write_footer(mem, ptr, size, size);

    let bin = bin_index(total);
    let head = self.heads[bin];
    if let Some(head) = head {
      set_prev(mem, head, Some(ptr));
    }
    set_prev(mem, ptr, None);
    set_next(mem, ptr, head);
    self.heads[bin] = Some(ptr);

    log::trace!("BinTable::insert({ptr:#x}): {total:#x} bytes into bin {bin}");
  }

  /// Unlinks the free block at `ptr` from its bin.
  ///
  /// The block must currently be tagged free and linked; anything else is a
  /// caller bug.
  pub fn remove(
    &mut self,
    mem: &mut [u8],
    ptr: usize,
  ) {
    debug_assert!(
      block::is_free_block(mem, ptr),
      "removing in-use block {ptr:#x}"
    );

    let prev = prev(mem, ptr);
    let next = next(mem, ptr);

    if let Some(next) = next {
      debug_assert_eq!(self::prev(mem, next), Some(ptr));
      set_prev(mem, next, prev);
    }

    match prev {
      Some(prev) => set_next(mem, prev, next),
      None => {
        let bin = bin_index(block::block_size(mem, ptr));
        debug_assert_eq!(self.heads[bin], Some(ptr), "block {ptr:#x} is not linked");
        self.heads[bin] = next;
      }
    }

    log::trace!("BinTable::remove({ptr:#x})");
  }

  /// Finds a free block of at least `block_size` total bytes.
  ///
  /// Within the bin `block_size` itself falls into, the first block that is
  /// big enough wins. Past that bin every block is big enough, so the head of
  /// the first non-empty bin is taken. Smaller bins are never looked at. The
  /// block is left linked.
  pub fn find_fit(
    &self,
    mem: &[u8],
    block_size: usize,
  ) -> Option<usize> {
    let first = bin_index(block_size);

    let fit = self
      .iter(mem, first)
      .find(|&ptr| block::block_size(mem, ptr) >= block_size)
      .or_else(|| self.heads[first + 1..].iter().find_map(|head| *head));

    log::trace!("BinTable::find_fit({block_size:#x}) -> {fit:x?}");
    fit
  }

  /// Walks the blocks of one bin, head first.
  pub fn iter<'a>(
    &self,
    mem: &'a [u8],
    bin: usize,
  ) -> BinIter<'a> {
    BinIter {
      mem,
      cursor: self.heads[bin],
    }
  }
}

pub struct BinIter<'a> {
  mem: &'a [u8],
  cursor: Option<usize>,
}

impl Iterator for BinIter<'_> {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    let ptr = self.cursor?;
    self.cursor = next(self.mem, ptr);
    Some(ptr)
  }
}
