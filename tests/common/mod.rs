#![allow(dead_code)]

use brkalloc::{ALIGNMENT, Break, HEADER_SIZE, Heap, MIN_PAYLOAD, ReservedRegion};

pub fn heap() -> Heap<ReservedRegion> {
  Heap::new(ReservedRegion::new(1 << 24).unwrap())
}

/// Checks the chain tiles `[start, boundary)` exactly, keeps minimum sizes,
/// and never has two free neighbors.
pub fn check_invariants(heap: &Heap<ReservedRegion>) {
  let blocks: Vec<_> = heap.blocks().collect();

  if blocks.is_empty() {
    assert!(heap.is_empty());
    assert!(heap.boundary().is_null());
    return;
  }

  let mut expected = blocks[0].header;
  for pair in blocks.windows(2) {
    assert!(!(pair[0].free && pair[1].free), "adjacent free blocks at {:p}", pair[1].header);
  }

  for block in &blocks {
    assert_eq!(block.header, expected, "gap or overlap before {:p}", block.header);
    assert_eq!(block.payload as usize, block.header as usize + HEADER_SIZE);
    assert!(block.size >= MIN_PAYLOAD);
    assert_eq!(block.size % ALIGNMENT, 0);
    expected = block.end();
  }

  assert_eq!(expected, heap.boundary() as *const u8);
  assert_eq!(heap.boundary(), heap.service().current());
}
