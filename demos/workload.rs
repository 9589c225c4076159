use std::io::{IsTerminal, Read};

use segalloc::{Config, Handle, MmapHeap, SegregatedAllocator};

/// Waits until the user presses ENTER.
/// Handy for inspecting the mapping with `pmap` or `gdb` between steps.
/// Skipped when stdin is not a terminal.
fn block_until_enter_pressed() {
  if !std::io::stdin().is_terminal() {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the break of the mmap-backed heap and the free lists.
fn print_heap(
  label: &str,
  allocator: &SegregatedAllocator<MmapHeap>,
) {
  println!(
    "[{}] PID = {}, break = {:?}, heap = {:#x} bytes, free = {:#x} bytes",
    label,
    std::process::id(),
    allocator.heap().program_break(),
    allocator.heap_len(),
    allocator.free_bytes(),
  );
  for stat in allocator.bin_stats() {
    println!("    bin {:2}: {} blocks, {:#x} bytes", stat.bin, stat.blocks, stat.bytes);
  }
}

fn print_alloc(
  allocator: &SegregatedAllocator<MmapHeap>,
  requested: usize,
  handle: Handle,
) {
  println!(
    "requested {} bytes -> offset {:#x}, usable {} bytes, address {:?}",
    requested,
    handle.offset(),
    allocator.usable_size(handle),
    allocator.data(handle).as_ptr(),
  );
}

fn main() {
  env_logger::init();

  let config = Config::default().heap_capacity(16 << 20).paranoid(true);
  let heap = MmapHeap::with_config(&config).unwrap();
  let mut allocator = SegregatedAllocator::init(heap, config).unwrap();

  print_heap("start", &allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Two small blocks, back to back.
  // --------------------------------------------------------------------
  let first = allocator.allocate(40).unwrap();
  let second = allocator.allocate(40).unwrap();
  println!("\n[1] Allocate 40 bytes twice");
  print_alloc(&allocator, 40, first);
  print_alloc(&allocator, 40, second);
  allocator.data_mut(first)[..4].copy_from_slice(&0xDEADBEEF_u32.to_ne_bytes());

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Free the first one and ask again: the freed block comes back
  //    without the heap growing.
  // --------------------------------------------------------------------
  allocator.free(first);
  println!("\n[2] Freed first block");
  print_heap("after free", &allocator);

  let third = allocator.allocate(40).unwrap();
  print_alloc(&allocator, 40, third);
  println!(
    "[2] third == first? {}",
    if third == first {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Free both neighbours: they merge into one block.
  // --------------------------------------------------------------------
  allocator.free(third);
  allocator.free(second);
  println!("\n[3] Freed both blocks");
  print_heap("after coalesce", &allocator);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) A bigger request than the free block: the free block at the top of
  //    the heap is stretched by the shortfall only.
  // --------------------------------------------------------------------
  print_heap("before top-up", &allocator);
  let big = allocator.allocate(1000).unwrap();
  println!("\n[4] Allocate 1000 bytes");
  print_alloc(&allocator, 1000, big);
  print_heap("after top-up", &allocator);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Grow the last block in place, then move a block that is boxed in.
  // --------------------------------------------------------------------
  let big = allocator.resize(big, 64 * 1024).unwrap();
  println!("\n[5] Resize the top block to 64 KiB");
  print_alloc(&allocator, 64 * 1024, big);

  let small = allocator.allocate(16).unwrap();
  allocator.data_mut(small).fill(0xAB);
  let _barrier = allocator.allocate(8).unwrap();
  let moved = allocator.resize(small, 256).unwrap();
  println!("[5] Resize a boxed-in 16 byte block to 256 bytes");
  print_alloc(&allocator, 256, moved);
  println!(
    "[5] contents kept? {}",
    allocator.data(moved)[..16].iter().all(|&b| b == 0xAB)
  );
  print_heap("after resize", &allocator);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) End of demo.
  //
  //    The heap never shrinks; dropping the allocator unmaps it.
  // --------------------------------------------------------------------
  allocator.validate().unwrap();
  println!("\n[6] Heap is consistent. Dropping the allocator unmaps the reservation.");
}
