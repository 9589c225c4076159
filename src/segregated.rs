use std::num::NonZeroUsize;

use crate::{
  align::checked_align,
  bins::{BinTable, MIN_BLOCK_SIZE, NUM_BINS},
  block::{self, FOOTER_SIZE, HEADER_SIZE, INIT_OFFSET, MAX_DATA_SIZE, TAG_OVERHEAD},
  coalesce::coalesce,
  config::Config,
  error::{AllocError, HeapError},
  heap::{ArenaHeap, Heap},
  split::split,
  validate::{Corruption, validate},
};

/// Data offset of the lowest block on any heap.
const FIRST_BLOCK: usize = INIT_OFFSET + HEADER_SIZE;

/// An allocation: the heap offset of a block's data region.
///
/// Handles are only meaningful for the allocator that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(NonZeroUsize);

impl Handle {
  fn new(ptr: usize) -> Option<Self> {
    NonZeroUsize::new(ptr).map(Self)
  }

  /// Offset of the first data byte from the bottom of the heap.
  pub fn offset(self) -> usize {
    self.0.get()
  }
}

/// Occupancy of one free list bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinStat {
  pub bin: usize,
  pub blocks: usize,
  pub bytes: usize,
}

/// Segregated-fit allocator over a growable heap.
///
/// # Caller contract
///
/// Handles passed to [`free`](Self::free), [`resize`](Self::resize),
/// [`data`](Self::data) and friends must come from this allocator and must
/// not have been freed already. These preconditions are only checked by
/// `debug_assert!`s; in release builds a violation silently corrupts the heap
/// (never memory outside it) and is reported by the next
/// [`validate`](Self::validate).
#[derive(Debug)]
pub struct SegregatedAllocator<H = ArenaHeap> {
  heap: H,
  bins: BinTable,
  config: Config,
}

impl SegregatedAllocator<ArenaHeap> {
  /// Allocator over a fresh [`ArenaHeap`] sized from `config`.
  pub fn with_config(config: Config) -> Result<Self, AllocError> {
    Self::init(ArenaHeap::with_config(&config), config)
  }
}

impl<H: Heap> SegregatedAllocator<H> {
  /// Takes ownership of an empty heap and pads it so that every data region
  /// lands on the alignment boundary.
  pub fn init(
    heap: H,
    config: Config,
  ) -> Result<Self, AllocError> {
    debug_assert!(heap.is_empty(), "heap already in use");

    let mut allocator = Self {
      heap,
      bins: BinTable::new(),
      config,
    };
    allocator.grow(INIT_OFFSET)?;

    log::debug!("SegregatedAllocator::init: {config:?}");
    Ok(allocator)
  }

  /// Allocates a block with at least `size` usable bytes.
  ///
  /// Tries the free lists first, then stretches a free block sitting at the
  /// top of the heap, and only then grows the heap by a whole new block.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Handle, AllocError> {
    let block_size = Self::block_size_for(size)?;
    let ptr = self.allocate_block(block_size)?;
    debug_assert!(ptr >= FIRST_BLOCK, "block {ptr:#x} below the first block");

    log::trace!("allocate({size:#x}) -> {ptr:#x}");
    self.check("allocate");
    Handle::new(ptr).ok_or(AllocError::TooLarge { size })
  }

  /// Returns a block to the free lists, merged with any free neighbours.
  pub fn free(
    &mut self,
    handle: Handle,
  ) {
    let ptr = handle.offset();
    let mem = self.heap.as_mut_slice();
    debug_assert!(
      (FIRST_BLOCK..mem.len()).contains(&ptr),
      "foreign handle {ptr:#x}"
    );
    debug_assert!(!block::is_free_block(mem, ptr), "double free of {ptr:#x}");

    let block_size = block::block_size(mem, ptr);
    let (ptr, merged_size) = coalesce(&mut self.bins, mem, FIRST_BLOCK, ptr, block_size);
    self.bins.insert(mem, ptr);

    log::trace!("free({:#x}): {merged_size:#x} bytes free at {ptr:#x}", handle.offset());
    self.check("free");
  }

  /// Makes the block behind `handle` hold at least `new_size` bytes.
  ///
  /// Shrinking never moves or splits the block. A block at the top of the
  /// heap grows in place. Anything else moves to a new block, keeping the
  /// old contents. On error the original block is left untouched.
  pub fn resize(
    &mut self,
    handle: Handle,
    new_size: usize,
  ) -> Result<Handle, AllocError> {
    let ptr = handle.offset();
    let size = checked_align(new_size).ok_or(AllocError::TooLarge { size: new_size })?;
    let old_size = block::read_size(self.heap.as_slice(), ptr);

    if size <= old_size {
      log::trace!("resize({ptr:#x}, {new_size:#x}): fits in {old_size:#x}");
      return Ok(handle);
    }
    if size > MAX_DATA_SIZE {
      return Err(AllocError::TooLarge { size: new_size });
    }

    if ptr + old_size + FOOTER_SIZE == self.heap.len() {
      let extra = size - old_size;
      self.grow(extra)?;
      block::mark_in_use(self.heap.as_mut_slice(), ptr, size);

      log::trace!("resize({ptr:#x}, {new_size:#x}): grew in place by {extra:#x}");
      self.check("resize");
      return Ok(handle);
    }

    let new = self.allocate(size)?;
    let copied = old_size.min(size);
    self
      .heap
      .as_mut_slice()
      .copy_within(ptr..ptr + copied, new.offset());
    self.free(handle);

    log::trace!("resize({ptr:#x}, {new_size:#x}): moved to {:#x}", new.offset());
    Ok(new)
  }

  /// Walks the whole heap and every bin looking for inconsistencies.
  pub fn validate(&self) -> Result<(), Corruption> {
    validate(self.heap.as_slice(), &self.bins)
  }

  /// Usable bytes of the block behind `handle`, at least what was requested.
  pub fn usable_size(
    &self,
    handle: Handle,
  ) -> usize {
    block::read_size(self.heap.as_slice(), handle.offset())
  }

  pub fn data(
    &self,
    handle: Handle,
  ) -> &[u8] {
    let ptr = handle.offset();
    let mem = self.heap.as_slice();
    &mem[ptr..ptr + block::read_size(mem, ptr)]
  }

  pub fn data_mut(
    &mut self,
    handle: Handle,
  ) -> &mut [u8] {
    let ptr = handle.offset();
    let mem = self.heap.as_mut_slice();
    let size = block::read_size(mem, ptr);
    &mut mem[ptr..ptr + size]
  }

  pub fn heap(&self) -> &H {
    &self.heap
  }

  pub fn heap_len(&self) -> usize {
    self.heap.len()
  }

  /// Total bytes, tags included, of all blocks in the free lists.
  pub fn free_bytes(&self) -> usize {
    self.bin_stats().iter().map(|stat| stat.bytes).sum()
  }

  /// Occupancy of every non-empty bin, smallest first.
  pub fn bin_stats(&self) -> Vec<BinStat> {
    let mem = self.heap.as_slice();
    (0..NUM_BINS)
      .filter_map(|bin| {
        let (blocks, bytes) = self
          .bins
          .iter(mem, bin)
          .fold((0, 0), |(blocks, bytes), ptr| (blocks + 1, bytes + block::block_size(mem, ptr)));
        (blocks > 0).then_some(BinStat { bin, blocks, bytes })
      })
      .collect()
  }

  /// Total block size for a request of `size` data bytes.
  fn block_size_for(size: usize) -> Result<usize, AllocError> {
    let block_size = size
      .checked_add(TAG_OVERHEAD)
      .and_then(checked_align)
      .ok_or(AllocError::TooLarge { size })?
      .max(MIN_BLOCK_SIZE);
    if block_size - TAG_OVERHEAD > MAX_DATA_SIZE {
      return Err(AllocError::TooLarge { size });
    }
    Ok(block_size)
  }

  fn allocate_block(
    &mut self,
    block_size: usize,
  ) -> Result<usize, AllocError> {
    let mem = self.heap.as_mut_slice();
    if let Some(ptr) = self.bins.find_fit(mem, block_size) {
      self.bins.remove(mem, ptr);
      return Ok(split(&mut self.bins, mem, ptr, block_size));
    }

    if let Some(ptr) = self.last_free_block() {
      let data_size = block_size - TAG_OVERHEAD;
      let shortfall = data_size.saturating_sub(block::read_size(self.heap.as_slice(), ptr));
      if shortfall > 0 {
        self.grow(shortfall)?;
      }

      let mem = self.heap.as_mut_slice();
      self.bins.remove(mem, ptr);
      if shortfall > 0 {
        block::write_size(mem, ptr, data_size);
      }
      log::trace!("allocate_block({block_size:#x}): topped up last block {ptr:#x} by {shortfall:#x}");
      return Ok(split(&mut self.bins, mem, ptr, block_size));
    }

    let ptr = self.grow(block_size)? + HEADER_SIZE;
    block::mark_in_use(self.heap.as_mut_slice(), ptr, block_size - TAG_OVERHEAD);
    Ok(ptr)
  }

  /// The block at the top of the heap, if it is free.
  fn last_free_block(&self) -> Option<usize> {
    let mem = self.heap.as_slice();
    if mem.len() < INIT_OFFSET + MIN_BLOCK_SIZE {
      return None;
    }

    // Footer of whatever precedes a block that would start at the heap end.
    let end = mem.len() + HEADER_SIZE;
    let footer = block::read_prev_footer(mem, end);
    block::is_free(footer).then(|| end - TAG_OVERHEAD - footer)
  }

  fn grow(
    &mut self,
    extra: usize,
  ) -> Result<usize, AllocError> {
    self
      .heap
      .grow(extra)
      .map_err(|source: HeapError| AllocError::OutOfMemory {
        requested: extra,
        source,
      })
  }

  /// Paranoid mode: validate after every mutation and dump the bins.
  fn check(
    &self,
    op: &str,
  ) {
    if !self.config.paranoid {
      return;
    }
    if let Err(corruption) = self.validate() {
      panic!("heap inconsistent after {op}: {corruption}");
    }
    for stat in self.bin_stats() {
      log::trace!("  bin {}: {} blocks, {:#x} bytes", stat.bin, stat.blocks, stat.bytes);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::heap::MmapHeap;

  fn allocator(capacity: usize) -> SegregatedAllocator {
    let _ = env_logger::try_init();
    let config = Config::default().heap_capacity(capacity).paranoid(true);
    SegregatedAllocator::with_config(config).unwrap()
  }

  #[test]
  fn test_init() {
    let allocator = allocator(1024);
    assert_eq!(allocator.heap_len(), INIT_OFFSET);
    assert_eq!(allocator.free_bytes(), 0);
    assert!(allocator.validate().is_ok());
  }

  #[test]
  fn test_init_out_of_memory() {
    let config = Config::default().heap_capacity(INIT_OFFSET - 1);
    assert!(matches!(
      SegregatedAllocator::with_config(config),
      Err(AllocError::OutOfMemory { .. })
    ));
  }

  #[test]
  fn test_freed_block_is_reused_and_coalesced() {
    let mut allocator = allocator(1 << 16);

    let a = allocator.allocate(40).unwrap();
    let b = allocator.allocate(40).unwrap();
    allocator.free(a);
    let heap_len = allocator.heap_len();

    let c = allocator.allocate(40).unwrap();
    assert_eq!(c, a);
    assert_eq!(allocator.heap_len(), heap_len);

    allocator.free(b);
    allocator.free(c);
    assert!(allocator.validate().is_ok());

    // One free block spanning both original blocks, i.e. the whole heap.
    let span = allocator.heap_len() - INIT_OFFSET;
    assert_eq!(span, 2 * 48);
    assert_eq!(
      allocator.bin_stats(),
      vec![BinStat {
        bin: 2,
        blocks: 1,
        bytes: span
      }]
    );
    assert_eq!(allocator.bins.head(2), Some(a.offset()));
  }

  #[test]
  fn test_resize_last_block_in_place() {
    let mut allocator = allocator(1 << 16);

    let a = allocator.allocate(100).unwrap();
    assert_eq!(allocator.usable_size(a), 104);
    let heap_len = allocator.heap_len();

    assert_eq!(allocator.resize(a, 1000).unwrap(), a);
    assert_eq!(allocator.heap_len() - heap_len, 1000 - 104);
    assert_eq!(allocator.usable_size(a), 1000);

    // Not a multiple of the alignment: rounded up.
    assert_eq!(allocator.resize(a, 1001).unwrap(), a);
    assert_eq!(allocator.usable_size(a), 1008);
    assert_eq!(allocator.heap_len() - heap_len, 1008 - 104);
  }

  #[test]
  fn test_resize_shrink_keeps_block() {
    let mut allocator = allocator(1 << 16);

    let a = allocator.allocate(200).unwrap();
    let _barrier = allocator.allocate(8).unwrap();
    let heap_len = allocator.heap_len();

    assert_eq!(allocator.resize(a, 10).unwrap(), a);
    assert_eq!(allocator.resize(a, 200).unwrap(), a);
    assert_eq!(allocator.usable_size(a), 200);
    assert_eq!(allocator.heap_len(), heap_len);
  }

  #[test]
  fn test_resize_moves_and_keeps_contents() {
    let mut allocator = allocator(1 << 16);

    let a = allocator.allocate(24).unwrap();
    let _barrier = allocator.allocate(8).unwrap();
    for (i, byte) in allocator.data_mut(a).iter_mut().enumerate() {
      *byte = i as u8 + 1;
    }

    let b = allocator.resize(a, 300).unwrap();
    assert_ne!(b, a);
    assert!(allocator.usable_size(b) >= 300);
    assert_eq!(&allocator.data(b)[..24], &(1..=24).collect::<Vec<u8>>()[..]);

    // The old block went back to the free lists.
    assert_eq!(allocator.allocate(24).unwrap(), a);
  }

  #[test]
  fn test_last_free_block_is_topped_up() {
    let mut allocator = allocator(1 << 16);

    let _a = allocator.allocate(40).unwrap();
    let b = allocator.allocate(40).unwrap();
    allocator.free(b);
    let heap_len = allocator.heap_len();

    let c = allocator.allocate(200).unwrap();
    assert_eq!(c, b);
    assert_eq!(allocator.usable_size(c), 200);
    assert_eq!(allocator.heap_len() - heap_len, 200 - 40);
    assert_eq!(allocator.free_bytes(), 0);
  }

  #[test]
  fn test_split_remainder_is_reusable() {
    let mut allocator = allocator(1 << 16);

    let a = allocator.allocate(400).unwrap();
    let _barrier = allocator.allocate(8).unwrap();
    allocator.free(a);
    let heap_len = allocator.heap_len();

    let b = allocator.allocate(100).unwrap();
    let c = allocator.allocate(100).unwrap();
    assert_eq!(b, a);
    assert_eq!(c.offset(), a.offset() + 112);
    assert_eq!(allocator.heap_len(), heap_len);
    assert_eq!(allocator.free_bytes(), 408 - 2 * 112);
  }

  #[test]
  fn test_minimum_block() {
    let mut allocator = allocator(1 << 16);

    let a = allocator.allocate(0).unwrap();
    let b = allocator.allocate(1).unwrap();
    assert_eq!(allocator.usable_size(a), MIN_BLOCK_SIZE - TAG_OVERHEAD);
    assert_eq!(b.offset() - a.offset(), MIN_BLOCK_SIZE);
    assert_eq!(a.offset() % crate::align::ALIGNMENT, 0);
    assert_eq!(b.offset() % crate::align::ALIGNMENT, 0);
  }

  #[test]
  fn test_round_trip_keeps_free_footprint() {
    let mut allocator = allocator(1 << 20);
    let _barrier = allocator.allocate(8).unwrap();

    for size in [1, 8, 17, 40, 100, 1000, 4096, 10_000] {
      // Warm up so the heap already has room for this size.
      let p = allocator.allocate(size).unwrap();
      allocator.free(p);
      let free = allocator.free_bytes();
      let heap_len = allocator.heap_len();

      let p = allocator.allocate(size).unwrap();
      assert!(allocator.usable_size(p) >= size);
      allocator.free(p);
      assert!(allocator.validate().is_ok());
      assert_eq!(allocator.free_bytes(), free);
      assert_eq!(allocator.heap_len(), heap_len);
    }
  }

  #[test]
  fn test_free_order_does_not_matter() {
    let run = |first_a: bool| {
      let mut allocator = allocator(1 << 16);
      let a = allocator.allocate(40).unwrap();
      let b = allocator.allocate(72).unwrap();
      let _barrier = allocator.allocate(8).unwrap();
      if first_a {
        allocator.free(a);
        allocator.free(b);
      } else {
        allocator.free(b);
        allocator.free(a);
      }
      (allocator.bin_stats(), allocator.bins.clone())
    };

    assert_eq!(run(true), run(false));
    assert_eq!(
      run(true).0,
      vec![BinStat {
        bin: 3,
        blocks: 1,
        bytes: 48 + 80
      }]
    );
  }

  #[test]
  fn test_out_of_memory() {
    let mut allocator = allocator(256);
    let mut handles = Vec::new();

    let err = loop {
      match allocator.allocate(40) {
        Ok(handle) => handles.push(handle),
        Err(err) => break err,
      }
    };
    assert!(matches!(
      err,
      AllocError::OutOfMemory {
        requested: 48,
        source: HeapError::Exhausted { .. }
      }
    ));
    assert_eq!(handles.len(), (256 - INIT_OFFSET) / 48);

    // The failure left nothing behind, and freeing makes room again.
    let heap_len = allocator.heap_len();
    assert!(allocator.validate().is_ok());
    allocator.free(handles.pop().unwrap());
    assert!(allocator.allocate(40).is_ok());
    assert_eq!(allocator.heap_len(), heap_len);
  }

  #[test]
  fn test_failed_resize_keeps_block() {
    let mut allocator = allocator(512);

    let a = allocator.allocate(16).unwrap();
    allocator.data_mut(a).fill(0x5A);

    // in place at the top of the heap
    assert!(allocator.resize(a, 4096).is_err());
    assert_eq!(allocator.usable_size(a), 16);

    // by moving
    let _barrier = allocator.allocate(8).unwrap();
    assert!(allocator.resize(a, 4096).is_err());
    assert!(allocator.data(a).iter().all(|&b| b == 0x5A));
    assert!(allocator.validate().is_ok());
  }

  #[test]
  fn test_too_large() {
    let mut allocator = allocator(1 << 16);

    assert!(matches!(
      allocator.allocate(usize::MAX),
      Err(AllocError::TooLarge { .. })
    ));
    assert!(matches!(
      allocator.allocate(MAX_DATA_SIZE + 1),
      Err(AllocError::TooLarge { .. })
    ));
    // The largest block is encodable; it just does not fit this heap.
    assert!(matches!(
      allocator.allocate(MAX_DATA_SIZE),
      Err(AllocError::OutOfMemory { .. })
    ));

    let a = allocator.allocate(8).unwrap();
    assert!(matches!(
      allocator.resize(a, usize::MAX),
      Err(AllocError::TooLarge { .. })
    ));
    assert!(matches!(
      allocator.resize(a, MAX_DATA_SIZE + 8),
      Err(AllocError::TooLarge { .. })
    ));
  }

  #[test]
  #[cfg(debug_assertions)]
  #[should_panic(expected = "double free")]
  fn test_double_free_is_caught_in_debug() {
    let mut allocator = allocator(1 << 16);
    let a = allocator.allocate(40).unwrap();
    let _barrier = allocator.allocate(8).unwrap();
    allocator.free(a);
    allocator.free(a);
  }

  #[test]
  fn test_merge_never_exceeds_largest_block() {
    let _ = env_logger::try_init();
    let config = Config::default().heap_capacity(3 << 32).paranoid(true);
    let heap = MmapHeap::with_config(&config).unwrap();
    let mut allocator = SegregatedAllocator::init(heap, config).unwrap();

    let a = allocator.allocate(MAX_DATA_SIZE).unwrap();
    let b = allocator.allocate(MAX_DATA_SIZE).unwrap();
    let _barrier = allocator.allocate(8).unwrap();
    allocator.free(a);
    allocator.free(b);

    // Merged, the pair would not fit a 32-bit tag, so both stay as they are.
    assert!(allocator.validate().is_ok());
    assert_eq!(
      allocator.bin_stats(),
      vec![BinStat {
        bin: NUM_BINS - 1,
        blocks: 2,
        bytes: 2 * (MAX_DATA_SIZE + TAG_OVERHEAD)
      }]
    );

    let c = allocator.allocate(MAX_DATA_SIZE).unwrap();
    assert_eq!(c, b);
    assert_eq!(allocator.usable_size(c), MAX_DATA_SIZE);
    assert_eq!(allocator.free_bytes(), MAX_DATA_SIZE + TAG_OVERHEAD);
  }

  #[test]
  fn test_handle_offsets() {
    assert_eq!(Handle::new(0), None);
    assert_eq!(Handle::new(FIRST_BLOCK).map(Handle::offset), Some(FIRST_BLOCK));

    let mut allocator = allocator(1 << 16);
    let a = allocator.allocate(8).unwrap();
    assert_eq!(a.offset(), FIRST_BLOCK);
  }

  #[test]
  fn test_mmap_heap() {
    let _ = env_logger::try_init();
    let config = Config::default().heap_capacity(1 << 20).paranoid(true);
    let heap = MmapHeap::with_config(&config).unwrap();
    let mut allocator = SegregatedAllocator::init(heap, config).unwrap();

    let a = allocator.allocate(100).unwrap();
    let b = allocator.allocate(5000).unwrap();
    allocator.data_mut(b)[4999] = 7;
    for handle in [a, b] {
      assert_eq!(allocator.data(handle).as_ptr() as usize % crate::align::ALIGNMENT, 0);
    }

    let b = allocator.resize(b, 20_000).unwrap();
    assert_eq!(allocator.data(b)[4999], 7);
    allocator.free(a);
    allocator.free(b);
    assert!(allocator.validate().is_ok());
    assert_eq!(allocator.free_bytes(), allocator.heap_len() - INIT_OFFSET);
  }
}
