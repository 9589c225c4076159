use crate::{
  bins::{BinTable, MIN_BLOCK_SIZE},
  block::{self, TAG_OVERHEAD},
};

/// Trims the free block at `ptr` down to `block_size` total bytes and tags it
/// in use.
///
/// The block must already be unlinked from its bin. When the leftover is big
/// enough to stand on its own it becomes a new free block right after the
/// returned one; otherwise the whole block is handed out and the slack stays
/// inside it.
///
/// ```text
///   before: ┌─────────────────────── full block ──────────────────────┐
///   after:  ┌──── block_size ────┐┌──────── leftover (free) ──────────┐
/// ```
pub fn split(
  bins: &mut BinTable,
  mem: &mut [u8],
  ptr: usize,
  block_size: usize,
) -> usize {
  let full_size = block::read_size(mem, ptr);
  let full_block_size = full_size + TAG_OVERHEAD;
  debug_assert!(
    full_block_size >= block_size,
    "block at {ptr:#x} is {full_block_size:#x} bytes, {block_size:#x} requested"
  );

  let mut returned_size = full_size;
  let leftover = full_block_size - block_size;
  if leftover >= MIN_BLOCK_SIZE {
    let extra = ptr + block_size;
    block::write_size(mem, extra, full_size - block_size);
    bins.insert(mem, extra);
    returned_size = block_size - TAG_OVERHEAD;
    log::trace!("split({ptr:#x}, {block_size:#x}): {leftover:#x} bytes left at {extra:#x}");
  }

  block::mark_in_use(mem, ptr, returned_size);
  ptr
}
