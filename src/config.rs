/// Default upper bound on how far a heap may grow: 64 MiB.
pub const DEFAULT_HEAP_CAPACITY: usize = 64 << 20;

/// Knobs shared by the heap backends and the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Hard limit on the heap size. Growth past it fails with
  /// [`HeapError::Exhausted`](crate::HeapError::Exhausted).
  pub heap_capacity: usize,
  /// Run [`validate`](crate::SegregatedAllocator::validate) after every
  /// mutating call and panic on the first inconsistency.
  pub paranoid: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      heap_capacity: DEFAULT_HEAP_CAPACITY,
      paranoid: false,
    }
  }
}

impl Config {
  pub fn heap_capacity(
    mut self,
    heap_capacity: usize,
  ) -> Self {
    self.heap_capacity = heap_capacity;
    self
  }

  pub fn paranoid(
    mut self,
    paranoid: bool,
  ) -> Self {
    self.paranoid = paranoid;
    self
  }
}
