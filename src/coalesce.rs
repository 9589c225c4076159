use crate::{
  bins::{BinTable, MIN_BLOCK_SIZE},
  block::{self, HEADER_SIZE, MAX_DATA_SIZE, TAG_OVERHEAD},
};

/// Merges the block at `ptr` (total size `block_size`) with every free
/// neighbour it touches.
///
/// `first` is the data offset of the lowest block on the heap; nothing is
/// looked at below it or past the end of `mem`. Absorbed neighbours are
/// unlinked from their bins. A neighbour is left alone when the merged data
/// region would exceed [`MAX_DATA_SIZE`]. The merged block comes back tagged
/// free but not linked anywhere; linking it is up to the caller.
///
/// Returns the data offset and total size of the merged block.
pub fn coalesce(
  bins: &mut BinTable,
  mem: &mut [u8],
  first: usize,
  mut ptr: usize,
  mut block_size: usize,
) -> (usize, usize) {
  loop {
    let mut merged = false;

    // predecessor
    if ptr >= first + MIN_BLOCK_SIZE {
      let prev_size = block::read_prev_footer(mem, ptr);
      let new_size = prev_size + block_size;
      if block::is_free(prev_size) && new_size <= MAX_DATA_SIZE {
        let prev_ptr = ptr - TAG_OVERHEAD - prev_size;
        bins.remove(mem, prev_ptr);

        log::trace!("coalesce: {prev_ptr:#x} absorbs {ptr:#x}");
        ptr = prev_ptr;
        block::mark_free(mem, ptr, new_size);
        block_size = new_size + TAG_OVERHEAD;
        merged = true;
      }
    }

    // successor
    let next_ptr = ptr + block_size;
    if next_ptr - HEADER_SIZE + MIN_BLOCK_SIZE <= mem.len() && block::is_free_block(mem, next_ptr) {
      let new_size = block_size + block::read_size(mem, next_ptr);
      if new_size <= MAX_DATA_SIZE {
        bins.remove(mem, next_ptr);

        log::trace!("coalesce: {ptr:#x} absorbs {next_ptr:#x}");
        block::mark_free(mem, ptr, new_size);
        block_size = new_size + TAG_OVERHEAD;
        merged = true;
      }
    }

    if !merged {
      return (ptr, block_size);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::INIT_OFFSET;

  const FIRST: usize = INIT_OFFSET + HEADER_SIZE;

  /// Three in-use blocks of 32 data bytes each.
  fn three_blocks() -> (Vec<u8>, [usize; 3]) {
    let mut mem = vec![0u8; INIT_OFFSET + 3 * 40];
    let ptrs = [FIRST, FIRST + 40, FIRST + 80];
    for ptr in ptrs {
      block::mark_in_use(&mut mem, ptr, 32);
    }
    (mem, ptrs)
  }

  #[test]
  fn test_no_free_neighbours() {
    let (mut mem, ptrs) = three_blocks();
    let mut bins = BinTable::new();

    assert_eq!(coalesce(&mut bins, &mut mem, FIRST, ptrs[1], 40), (ptrs[1], 40));
    assert_eq!(coalesce(&mut bins, &mut mem, FIRST, ptrs[0], 40), (ptrs[0], 40));
    assert_eq!(coalesce(&mut bins, &mut mem, FIRST, ptrs[2], 40), (ptrs[2], 40));
  }

  #[test]
  fn test_merges_both_sides() {
    let (mut mem, ptrs) = three_blocks();
    let mut bins = BinTable::new();
    bins.insert(&mut mem, ptrs[0]);
    bins.insert(&mut mem, ptrs[2]);

    let (ptr, size) = coalesce(&mut bins, &mut mem, FIRST, ptrs[1], 40);
    assert_eq!((ptr, size), (ptrs[0], 120));
    assert_eq!(block::read_size(&mem, ptr), 112);
    assert_eq!(block::read_footer(&mem, ptr, 112), 112);
    assert!(bins.is_empty());
  }

  #[test]
  fn test_merges_last_block_on_heap() {
    let (mut mem, ptrs) = three_blocks();
    let mut bins = BinTable::new();
    bins.insert(&mut mem, ptrs[2]);

    assert_eq!(coalesce(&mut bins, &mut mem, FIRST, ptrs[1], 40), (ptrs[1], 80));
    assert!(bins.is_empty());
  }
}
