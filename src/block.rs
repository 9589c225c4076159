//! Boundary tags.
//!
//! ```text
//!   ┌──────────┬──────────────────────────────┬──────────┐
//!   │ header   │ data (header value bytes)    │ footer   │
//!   │ u32 size │                              │ u32 tag  │
//!   └──────────┴──────────────────────────────┴──────────┘
//!              ▲
//!              └── block handle (offset of the data region)
//! ```
//!
//! The header always holds the data size. The footer holds the data size
//! while the block is free and [`IN_USE`] while it is allocated. Both fields
//! are 32 bits wide and store sizes in `[1, 2^32]`: the raw value `0` stands
//! for `2^32`, since a zero-sized data region can never exist.
//!
//! Every accessor takes the data offset `ptr`, never the header offset.

use crate::align;

pub const HEADER_SIZE: usize = 4;
pub const FOOTER_SIZE: usize = 4;
pub const TAG_OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

/// Footer value of an allocated block. Sizes are multiples of the alignment,
/// so this never collides with a real size.
pub const IN_USE: usize = 1;

/// Largest data size a header can describe (stored as `0`).
pub const MAX_DATA_SIZE: usize = 1 << 32;

/// Padding grown once at init so that data regions land on the alignment.
pub const INIT_OFFSET: usize = align!(HEADER_SIZE) - HEADER_SIZE;

/// Narrows a size into its 32-bit field; `2^32` wraps to `0`.
#[inline]
pub fn encode(size: usize) -> u32 {
  debug_assert!(
    (1..=MAX_DATA_SIZE).contains(&size),
    "size {size} not encodable"
  );
  size as u32
}

/// Inverse of [`encode`].
#[inline]
pub fn decode(raw: u32) -> usize {
  if raw == 0 {
    MAX_DATA_SIZE
  } else {
    raw as usize
  }
}

#[inline]
fn read_u32(
  mem: &[u8],
  at: usize,
) -> u32 {
  let mut raw = [0; 4];
  raw.copy_from_slice(&mem[at..at + 4]);
  u32::from_ne_bytes(raw)
}

#[inline]
fn write_u32(
  mem: &mut [u8],
  at: usize,
  value: u32,
) {
  mem[at..at + 4].copy_from_slice(&value.to_ne_bytes());
}

/// Data size stored in the header of the block at `ptr`.
#[inline]
pub fn read_size(
  mem: &[u8],
  ptr: usize,
) -> usize {
  decode(read_u32(mem, ptr - HEADER_SIZE))
}

#[inline]
pub fn write_size(
  mem: &mut [u8],
  ptr: usize,
  size: usize,
) {
  write_u32(mem, ptr - HEADER_SIZE, encode(size));
}

/// Footer of the block at `ptr` whose data region is `size` bytes long.
#[inline]
pub fn read_footer(
  mem: &[u8],
  ptr: usize,
  size: usize,
) -> usize {
  decode(read_u32(mem, ptr + size))
}

/// Must run after [`write_size`] whenever the extent of a block changes.
#[inline]
pub fn write_footer(
  mem: &mut [u8],
  ptr: usize,
  size: usize,
  value: usize,
) {
  write_u32(mem, ptr + size, encode(value));
}

/// Footer of the block sitting immediately before the block at `ptr`.
#[inline]
pub fn read_prev_footer(
  mem: &[u8],
  ptr: usize,
) -> usize {
  decode(read_u32(mem, ptr - HEADER_SIZE - FOOTER_SIZE))
}

#[inline]
pub fn is_free(footer: usize) -> bool {
  footer != IN_USE
}

#[inline]
pub fn is_free_block(
  mem: &[u8],
  ptr: usize,
) -> bool {
  is_free(read_footer(mem, ptr, read_size(mem, ptr)))
}

/// Tags the block at `ptr` as allocated with a data region of `size` bytes.
#[inline]
pub fn mark_in_use(
  mem: &mut [u8],
  ptr: usize,
  size: usize,
) {
  write_size(mem, ptr, size);
  write_footer(mem, ptr, size, IN_USE);
}

/// Tags the block at `ptr` as free with a data region of `size` bytes.
#[inline]
pub fn mark_free(
  mem: &mut [u8],
  ptr: usize,
  size: usize,
) {
  write_size(mem, ptr, size);
  write_footer(mem, ptr, size, size);
}

/// Total footprint of the block at `ptr`, tags included.
#[inline]
pub fn block_size(
  mem: &[u8],
  ptr: usize,
) -> usize {
  read_size(mem, ptr) + TAG_OVERHEAD
}
