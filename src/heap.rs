//! The heap-growth primitive the allocator sits on.
//!
//! A heap is a contiguous run of bytes addressed by offset, `[0, len)`, that
//! only ever grows at its high end, the same way `sbrk(2)` moves the program
//! break. The allocator never shrinks it.

use std::{io, ptr::NonNull, slice};

use crate::{config::Config, error::HeapError};

/// Linear, monotonic heap region.
pub trait Heap {
  /// Extends the heap by `extra` bytes and returns the offset of the first
  /// new byte (the old length).
  fn grow(
    &mut self,
    extra: usize,
  ) -> Result<usize, HeapError>;

  /// Current size in bytes.
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Lowest valid offset, inclusive.
  fn heap_low(&self) -> usize {
    0
  }

  /// Highest valid offset, inclusive. `None` while the heap is empty.
  fn heap_high(&self) -> Option<usize> {
    self.len().checked_sub(1)
  }

  fn as_slice(&self) -> &[u8];

  fn as_mut_slice(&mut self) -> &mut [u8];
}

/// Heap backed by a `Vec<u8>` with a hard capacity limit.
#[derive(Debug)]
pub struct ArenaHeap {
  bytes: Vec<u8>,
  capacity: usize,
}

impl ArenaHeap {
  pub fn new(capacity: usize) -> Self {
    Self {
      bytes: Vec::new(),
      capacity,
    }
  }

  pub fn with_config(config: &Config) -> Self {
    Self::new(config.heap_capacity)
  }
}

impl Heap for ArenaHeap {
  fn grow(
    &mut self,
    extra: usize,
  ) -> Result<usize, HeapError> {
    let old = self.bytes.len();
    let available = self.capacity - old;
    if extra > available {
      return Err(HeapError::Exhausted {
        requested: extra,
        available,
      });
    }

    self.bytes.resize(old + extra, 0);
    log::debug!("ArenaHeap::grow({extra:#x}): {old:#x} -> {:#x}", self.bytes.len());
    Ok(old)
  }

  fn len(&self) -> usize {
    self.bytes.len()
  }

  fn as_slice(&self) -> &[u8] {
    &self.bytes
  }

  fn as_mut_slice(&mut self) -> &mut [u8] {
    &mut self.bytes
  }
}

/// Heap backed by one anonymous `mmap` reservation.
///
/// The whole capacity is reserved up front with `MAP_NORESERVE`, so pages are
/// only committed once touched. A private break inside the reservation plays
/// the role of the program break.
///
/// ```text
///   base                    base + len            base + reserved
///   ├───────────────────────┼─────────────────────┤
///   │   managed heap        │   reserved, unused  │
///   └───────────────────────┴─────────────────────┘
///                           ▲
///                           └── break (moved by grow)
/// ```
#[derive(Debug)]
pub struct MmapHeap {
  base: NonNull<u8>,
  reserved: usize,
  len: usize,
}

// SAFETY: the mapping is owned exclusively by this value.
unsafe impl Send for MmapHeap {}

/// Size of a virtual memory page.
pub fn page_size() -> usize {
  // SAFETY: sysconf has no memory-safety preconditions.
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
  usize::try_from(size).unwrap_or(4096)
}

impl MmapHeap {
  pub fn new(capacity: usize) -> Result<Self, HeapError> {
    let page = page_size();
    let reserved = capacity
      .max(1)
      .checked_next_multiple_of(page)
      .ok_or(HeapError::Exhausted {
        requested: capacity,
        available: 0,
      })?;

    // SAFETY: passing a null hint lets the kernel choose a page-aligned
    // address for a fresh anonymous mapping. See mmap(2).
    let addr = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        reserved,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
        -1,
        0,
      )
    };
    if addr == libc::MAP_FAILED {
      return Err(io::Error::last_os_error().into());
    }
    let base = NonNull::new(addr.cast::<u8>())
      .ok_or_else(|| HeapError::Map(io::Error::other("mmap returned null")))?;

    log::debug!("MmapHeap::new: reserved {reserved:#x} bytes at {base:p}");
    Ok(Self {
      base,
      reserved,
      len: 0,
    })
  }

  pub fn with_config(config: &Config) -> Result<Self, HeapError> {
    Self::new(config.heap_capacity)
  }

  /// Address one past the last managed byte.
  pub fn program_break(&self) -> *const u8 {
    // SAFETY: `len <= reserved`, so this stays inside (or one past) the
    // mapping.
    unsafe { self.base.as_ptr().add(self.len) }
  }
}

impl Heap for MmapHeap {
  fn grow(
    &mut self,
    extra: usize,
  ) -> Result<usize, HeapError> {
    let old = self.len;
    let available = self.reserved - old;
    if extra > available {
      return Err(HeapError::Exhausted {
        requested: extra,
        available,
      });
    }

    self.len += extra;
    log::debug!("MmapHeap::grow({extra:#x}): break moved to {:p}", self.program_break());
    Ok(old)
  }

  fn len(&self) -> usize {
    self.len
  }

  fn as_slice(&self) -> &[u8] {
    // SAFETY: the first `len` bytes of the mapping are readable, writable and
    // zero-initialized by the kernel; the borrow of `self` keeps them alive.
    unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len) }
  }

  fn as_mut_slice(&mut self) -> &mut [u8] {
    // SAFETY: as above, and `&mut self` guarantees exclusivity.
    unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
  }
}

impl Drop for MmapHeap {
  fn drop(&mut self) {
    // SAFETY: `base..base + reserved` is exactly the mapping created in `new`.
    let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.reserved) };
    if rc != 0 {
      log::warn!("munmap failed: {}", io::Error::last_os_error());
    }
  }
}
