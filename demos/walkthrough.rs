use std::io::Read;

use brkalloc::{Break, Heap, HeapConfig, ProgramBreak, ReservedRegion};

/// Waits until the user presses ENTER when `--step` was given.
/// Useful when you want to inspect memory state with tools like `pmap` or
/// `gdb` between steps.
fn pause(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

/// Prints every block of the chain and the boundary the service reports.
fn print_heap<B: Break>(
  label: &str,
  heap: &Heap<B>,
) {
  println!("[{}] boundary = {:?}", label, heap.service().current());
  for block in heap.blocks() {
    println!(
      "    {:?}  {:>6} bytes  {}",
      block.payload,
      block.size,
      if block.free { "free" } else { "used" }
    );
  }
}

unsafe fn run<B: Break>(
  mut heap: Heap<B>,
  step: bool,
) {
  unsafe {
    print_heap("start", &heap);
    pause(step);

    // 1) Three allocations laid out back to back.
    let a = heap.allocate(100);
    let b = heap.allocate(100);
    let c = heap.allocate(100);
    println!("\n[1] allocate(100) x3 -> {:?} {:?} {:?}", a, b, c);
    print_heap("1", &heap);
    pause(step);

    // 2) Freeing two neighbors merges them into one free block.
    heap.release(a);
    heap.release(b);
    println!("\n[2] release a, release b");
    print_heap("2", &heap);
    pause(step);

    // 3) First fit reuses the merged space and splits off the rest.
    let d = heap.allocate(180);
    println!("\n[3] allocate(180) -> {:?} (reused: {})", d, d == a);
    print_heap("3", &heap);
    pause(step);

    // 4) Zeroed allocation at the end of the chain.
    let e = heap.allocate_zeroed(16, 4);
    println!("\n[4] allocate_zeroed(16, 4) -> {:?}", e);
    print_heap("4", &heap);
    pause(step);

    // 5) Growing d swallows the free remainder after it.
    d.write_bytes(0x5A, 180);
    let d = heap.reallocate(d, 200);
    println!("\n[5] reallocate(d, 200) -> {:?}, first byte {:#X}", d, *d);
    print_heap("5", &heap);
    pause(step);

    // 6) Releasing everything hands the region back.
    heap.release(c);
    heap.release(d);
    heap.release(e);
    println!("\n[6] released everything, empty = {}", heap.is_empty());
    print_heap("6", &heap);
  }
}

fn main() {
  let args: Vec<String> = std::env::args().collect();
  let step = args.iter().any(|arg| arg == "--step");

  unsafe {
    if args.iter().any(|arg| arg == "--brk") {
      println!("PID = {}, heap on the program break", std::process::id());
      run(Heap::new(ProgramBreak), step);
    } else {
      let config = HeapConfig::from_env();
      let region = ReservedRegion::from_config(&config).expect("could not reserve address space");
      println!("PID = {}, heap on a {} byte reservation", std::process::id(), region.capacity());
      run(Heap::new(region), step);
    }
  }
}
