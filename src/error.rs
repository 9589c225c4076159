use std::io;

use thiserror::Error;

/// Failure of the heap-growth primitive.
#[derive(Debug, Error)]
pub enum HeapError {
  #[error("heap exhausted: requested {requested} bytes, {available} available")]
  Exhausted { requested: usize, available: usize },
  #[error("mmap failed with {0}")]
  Map(#[from] io::Error),
}

/// Failure surfaced by [`allocate`](crate::SegregatedAllocator::allocate) and
/// [`resize`](crate::SegregatedAllocator::resize).
///
/// Neither variant is fatal: the allocator is left exactly as it was before
/// the failing call.
#[derive(Debug, Error)]
pub enum AllocError {
  #[error("out of memory growing the heap by {requested} bytes")]
  OutOfMemory {
    requested: usize,
    #[source]
    source: HeapError,
  },
  #[error("request of {size} bytes exceeds the largest encodable block")]
  TooLarge { size: usize },
}
