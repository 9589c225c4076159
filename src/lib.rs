//! # segalloc - A Segregated-Fit Memory Allocator Library
//!
//! This crate provides a general-purpose **boundary-tag allocator** with
//! **segregated free lists**, managing a heap that only ever grows at its
//! top, the way `sbrk` grows the program break.
//!
//! ## Overview
//!
//! Every allocation is a block flanked by two 32-bit tags. Free blocks are
//! kept in power-of-two size bins, and freed blocks are merged with free
//! neighbours straight away:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                            HEAP                                      │
//!   │                                                                      │
//!   │  ┌───┬──────────┬──────────────────┬──────────┬───────────────────┐  │
//!   │  │pad│  A (use) │     B (free)     │  C (use) │     D (free)      │  │
//!   │  └───┴──────────┴──────────────────┴──────────┴───────────────────┘  │
//!   │                        │                               │      ▲      │
//!   │                        ▼                               ▼      │      │
//!   │   bins: [24,32) [32,64) [64,128) ... [2^31,2^32]            Heap     │
//!   │                          ▲ B          ▲ D                    Top     │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align       - ALIGNMENT and the align! macro
//!   ├── block       - Header/footer tags and the 2^32 wraparound encoding
//!   ├── bins        - Segregated free lists (BinTable)
//!   ├── split       - Carving a right-sized block out of a free one (internal)
//!   ├── coalesce    - Merging a block with free neighbours (internal)
//!   ├── segregated  - SegregatedAllocator: allocate / free / resize
//!   ├── validate    - Heap consistency checker (Corruption)
//!   ├── heap        - Heap trait, ArenaHeap and MmapHeap
//!   ├── config      - Config
//!   └── error       - AllocError and HeapError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{Config, SegregatedAllocator};
//!
//! let mut allocator = SegregatedAllocator::with_config(Config::default()).unwrap();
//!
//! // Allocate room for 64 bytes and use it
//! let handle = allocator.allocate(64).unwrap();
//! allocator.data_mut(handle)[..5].copy_from_slice(b"hello");
//!
//! // Grow it; the contents come along
//! let handle = allocator.resize(handle, 4096).unwrap();
//! assert_eq!(&allocator.data(handle)[..5], b"hello");
//!
//! // Free the memory
//! allocator.free(handle);
//! assert!(allocator.validate().is_ok());
//! ```
//!
//! ## How It Works
//!
//! Each block carries its data size in a header and either the same size
//! (free) or the in-use sentinel `1` (allocated) in a footer. The footer of
//! one block sits right before the header of the next, so both neighbours of
//! any block can be inspected without a side table:
//!
//! ```text
//!   Single Block:
//!   ┌──────────┬─────────────────────────────────────┬──────────┐
//!   │  header  │              data                   │  footer  │
//!   │  size: N │  free: prev/next links (16 bytes)   │  N or 1  │
//!   │ 4 bytes  │  in use: N bytes for the caller     │ 4 bytes  │
//!   └──────────┴─────────────────────────────────────┴──────────┘
//!              ▲
//!              └── Handle returned to the caller (8-byte aligned)
//! ```
//!
//! Allocation searches the bins from the request's own size class upward,
//! splitting off any usable remainder. When nothing fits, a free block at
//! the top of the heap is stretched by the shortfall, and only then is a new
//! block grown.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Never returns memory**: The heap is a permanent high-water mark
//! - **Blocks up to 2^32 bytes**: Tags are 32 bits wide
//! - **Unchecked handles**: Double frees and foreign handles are only caught
//!   by debug assertions and [`SegregatedAllocator::validate`]
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade: heap growth at `debug`, every
//! allocator decision at `trace`. Install any logger to see it.

#[cfg(not(target_pointer_width = "64"))]
compile_error!("segalloc needs 64-bit offsets to address 2^32-byte blocks");

pub mod align;
pub mod bins;
pub mod block;
mod coalesce;
pub mod config;
pub mod error;
pub mod heap;
mod segregated;
mod split;
mod validate;

pub use config::Config;
pub use error::{AllocError, HeapError};
pub use heap::{ArenaHeap, Heap, MmapHeap};
pub use segregated::{BinStat, Handle, SegregatedAllocator};
pub use validate::Corruption;
