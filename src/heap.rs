use core::{marker::PhantomData, ptr, ptr::NonNull};

use crate::trace::{debug, trace, warn};

use crate::{
  AllocError, HeapConfig,
  align::{ALIGNMENT, align},
  block::{self, Block, HEADER_SIZE},
  brk::{Break, ReservedRegion},
};

/// Snapshot of one block in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Address of the block header.
  pub header: *const u8,
  /// Address handed to callers.
  pub payload: *mut u8,
  /// Payload size in bytes, header excluded.
  pub size: usize,
  pub free: bool,
}

impl BlockInfo {
  unsafe fn of(block: *mut Block) -> Self {
    unsafe {
      Self {
        header: block as *const u8,
        payload: Block::payload(block),
        size: (*block).size,
        free: (*block).is_free,
      }
    }
  }

  /// One past the last payload byte.
  pub fn end(&self) -> *const u8 {
    self.payload.wrapping_add(self.size)
  }
}

/// Address-ordered walk over a heap's blocks.
pub struct Blocks<'a> {
  current: *mut Block,
  _heap: PhantomData<&'a ()>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    if self.current.is_null() {
      return None;
    }

    unsafe {
      let info = BlockInfo::of(self.current);
      self.current = (*self.current).next;
      Some(info)
    }
  }
}

/// A first-fit heap living in one contiguous region obtained from a
/// [`Break`].
///
/// The chain starts at `head` and its blocks tile `[head, end)` without gaps.
/// No two neighbors are ever both free, and a free block at the very end is
/// handed back to the boundary service as soon as it appears on release.
pub struct Heap<B: Break> {
  head: *mut Block,
  end: *mut u8,
  // Boundary before the first block and its alignment padding.
  origin: *mut u8,
  brk: B,
}

unsafe impl<B: Break + Send> Send for Heap<B> {}

impl Heap<ReservedRegion> {
  /// A heap on a private reservation sized by `config`.
  pub fn reserved(config: &HeapConfig) -> Result<Self, AllocError> {
    Ok(Self::new(ReservedRegion::from_config(config)?))
  }
}

impl<B: Break> Heap<B> {
  pub const fn new(brk: B) -> Self {
    Self {
      head: ptr::null_mut(),
      end: ptr::null_mut(),
      origin: ptr::null_mut(),
      brk,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_null()
  }

  /// Upper limit of the managed region, or null while the heap is empty.
  pub fn boundary(&self) -> *mut u8 {
    if self.head.is_null() {
      return ptr::null_mut();
    }
    self.end
  }

  /// The boundary service backing this heap.
  pub fn service(&self) -> &B {
    &self.brk
  }

  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      current: self.head,
      _heap: PhantomData,
    }
  }

  /// The block whose payload starts at `ptr`, free or not.
  pub fn block_of(
    &self,
    ptr: *const u8,
  ) -> Option<BlockInfo> {
    self.blocks().find(|block| block.payload as *const u8 == ptr)
  }

  /// Payload capacity behind a live allocation, or 0 for anything else.
  pub fn usable_size(
    &self,
    ptr: *const u8,
  ) -> usize {
    if !self.is_valid(ptr) {
      return 0;
    }
    unsafe { (*Block::header_of(ptr)).size }
  }

  /// Whether `ptr` is the payload address of a currently allocated block.
  ///
  /// Cheap range and alignment checks run first; a pointer surviving them
  /// must also match the payload of an allocated block in the chain, which
  /// rejects pointers into headers and into the middle of payloads.
  pub fn is_valid(
    &self,
    ptr: *const u8,
  ) -> bool {
    if self.head.is_null() {
      return false;
    }

    let addr = ptr as usize;
    if addr <= self.head as usize || addr >= self.end as usize || addr % ALIGNMENT != 0 {
      return false;
    }

    self.blocks().any(|block| block.payload as *const u8 == ptr && !block.free)
  }

  /// First free block of at least `size` bytes, plus the last block that
  /// was passed over on the way there (the tail on a miss, null if empty).
  pub(crate) fn find_free(
    &self,
    size: usize,
  ) -> (Option<*mut Block>, *mut Block) {
    let mut last: *mut Block = ptr::null_mut();
    let mut current = self.head;

    unsafe {
      while !current.is_null() {
        if (*current).is_free && (*current).size >= size {
          return (Some(current), last);
        }
        last = current;
        current = (*current).next;
      }
    }

    (None, last)
  }

  pub(crate) fn find_tail(&self) -> *mut Block {
    let mut last: *mut Block = ptr::null_mut();
    let mut current = self.head;

    while !current.is_null() {
      last = current;
      current = unsafe { (*current).next };
    }

    last
  }

  /// Grows the region by one allocated block of `size` payload bytes linked
  /// after `after`. Nothing changes on failure.
  ///
  /// The caller adopts the block as head when `after` is null.
  pub(crate) unsafe fn extend(
    &mut self,
    after: *mut Block,
    size: usize,
  ) -> Result<*mut Block, AllocError> {
    let increment = HEADER_SIZE
      .checked_add(size)
      .filter(|increment| *increment <= isize::MAX as usize)
      .ok_or(AllocError::OutOfMemory)?;

    let current = self.brk.current();
    let mut pad = 0;

    if self.head.is_null() {
      pad = (current as usize).wrapping_neg() & (ALIGNMENT - 1);
    } else if current != self.end {
      warn!(
        "heap boundary moved from {:p} to {:p} behind the allocator, refusing to grow",
        self.end, current
      );
      return Err(AllocError::OutOfMemory);
    }

    unsafe {
      if pad != 0 && self.brk.extend(pad).is_none() {
        warn!("heap boundary refused {} bytes of alignment padding", pad);
        return Err(AllocError::OutOfMemory);
      }

      let Some(addr) = self.brk.extend(increment) else {
        if pad != 0 && !self.brk.set(current) {
          warn!("heap boundary refused to roll back {} bytes of padding", pad);
        }
        warn!("heap boundary refused to grow by {} bytes", increment);
        return Err(AllocError::OutOfMemory);
      };

      if addr != current.wrapping_add(pad) {
        warn!("heap boundary moved to {:p} while growing, abandoning {} bytes", addr, increment);
        return Err(AllocError::OutOfMemory);
      }

      if self.head.is_null() {
        self.origin = current;
      }

      let block = Block::write(addr, Block::new(size, false, ptr::null_mut(), after));
      if !after.is_null() {
        (*after).next = block;
      }
      self.end = addr.add(increment);

      debug!("grew heap by {} bytes, new block {:p}", increment, block);

      Ok(block)
    }
  }

  /// Marks `block` free, merges it with its free neighbors and gives the
  /// result back to the boundary service when it ends the chain.
  unsafe fn release_block(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      (*block).is_free = true;
      let block = block::coalesce(block);

      if (*block).next.is_null() {
        self.trim_tail(block);
      }
    }
  }

  unsafe fn trim_tail(
    &mut self,
    tail: *mut Block,
  ) {
    if self.brk.current() != self.end {
      warn!("heap boundary moved behind the allocator, keeping free tail {:p}", tail);
      return;
    }

    unsafe {
      let prev = (*tail).prev;
      // The last block also takes the alignment padding in front of it.
      let target = if prev.is_null() { self.origin } else { tail as *mut u8 };

      if !self.brk.set(target) {
        warn!("heap boundary refused to shrink to {:p}", target);
        return;
      }

      if prev.is_null() {
        self.head = ptr::null_mut();
      } else {
        (*prev).next = ptr::null_mut();
      }
      self.end = target;

      debug!("returned tail {:p} to the boundary service", tail);
    }
  }

  /// Allocates at least `size` bytes, aligned to [`ALIGNMENT`].
  pub unsafe fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let size = align(size);
    if size == 0 {
      return Err(AllocError::InvalidSize);
    }

    let block = unsafe {
      if self.head.is_null() {
        let block = self.extend(ptr::null_mut(), size)?;
        self.head = block;
        block
      } else {
        match self.find_free(size) {
          (Some(block), _) => {
            if Block::can_split(block, size) {
              block::split(block, size);
            }
            (*block).is_free = false;
            block
          }
          (None, last) => self.extend(last, size)?,
        }
      }
    };

    trace!("allocate({}) -> {:p}", size, Block::payload(block));

    Ok(payload(block))
  }

  /// Allocates `count * elem_size` bytes and zeroes the whole aligned size.
  ///
  /// A product that overflows `usize` is an [`AllocError::InvalidSize`].
  pub unsafe fn try_allocate_zeroed(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let Some(size) = count.checked_mul(elem_size) else {
      warn!("rejecting zeroed allocation of {} x {} bytes: overflow", count, elem_size);
      return Err(AllocError::InvalidSize);
    };

    let payload = unsafe { self.try_allocate(size)? };
    unsafe { ptr::write_bytes(payload.as_ptr(), 0, align(size)) };

    Ok(payload)
  }

  /// Resizes the allocation at `ptr` to at least `size` bytes.
  ///
  /// Shrinking never moves. Growing first tries to absorb free neighbors,
  /// in which case the data may slide down into a free predecessor, and only
  /// then falls back to a fresh allocation. On error `ptr` is left exactly as
  /// it was.
  pub unsafe fn try_reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if ptr.is_null() {
      return unsafe { self.try_allocate(size) };
    }

    if !self.is_valid(ptr) {
      warn!("refusing to reallocate {:p}: not a live allocation", ptr);
      return Err(AllocError::InvalidPointer);
    }

    let size = align(size);
    if size == 0 {
      return Err(AllocError::InvalidSize);
    }

    let block = Block::header_of(ptr);

    unsafe {
      if (*block).size >= size {
        if Block::can_split(block, size) {
          let rest = block::split(block, size);
          block::coalesce(rest);
        }
        trace!("reallocate({:p}, {}) in place", ptr, size);
        return Ok(payload(block));
      }

      if Block::mergeable_size(block) >= size {
        return self.grow_in_place(block, size);
      }

      let old_size = (*block).size;
      let fresh = self.try_allocate(size)?;
      ptr::copy_nonoverlapping(ptr, fresh.as_ptr(), old_size);
      self.release_block(block);

      trace!("reallocate({:p}, {}) moved to {:p}", ptr, size, fresh);

      Ok(fresh)
    }
  }

  /// Grows `block` by swallowing its free neighbors. The payload is parked
  /// in a scratch block at the end of the heap while headers are rewritten.
  unsafe fn grow_in_place(
    &mut self,
    block: *mut Block,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    unsafe {
      let old_size = (*block).size;
      let scratch = self.extend(self.find_tail(), old_size)?;
      ptr::copy_nonoverlapping(Block::payload(block), Block::payload(scratch), old_size);

      let merged = block::coalesce(block);
      (*merged).is_free = false;

      if Block::can_split(merged, size) {
        block::split(merged, size);
      }

      ptr::copy_nonoverlapping(Block::payload(scratch), Block::payload(merged), old_size);
      self.release_block(scratch);

      trace!(
        "reallocate({:p}, {}) coalesced to {:p}",
        Block::payload(block),
        size,
        Block::payload(merged)
      );

      Ok(payload(merged))
    }
  }

  /// Null-returning form of [`Heap::try_allocate`].
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    unsafe { self.try_allocate(size) }.map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  /// Null-returning form of [`Heap::try_allocate_zeroed`].
  pub unsafe fn allocate_zeroed(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> *mut u8 {
    unsafe { self.try_allocate_zeroed(count, elem_size) }.map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  /// Null-returning form of [`Heap::try_reallocate`].
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe { self.try_reallocate(ptr, size) }.map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  /// Frees the allocation at `ptr`. Anything that is not a live allocation
  /// of this heap, null included, is ignored.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if !self.is_valid(ptr) {
      if !ptr.is_null() {
        warn!("ignoring release of {:p}: not a live allocation", ptr);
      }
      return;
    }

    trace!("release({:p})", ptr);

    unsafe { self.release_block(Block::header_of(ptr)) }
  }

  /// Hands the whole region back to the boundary service and forgets every
  /// block.
  ///
  /// # Safety
  ///
  /// Every pointer obtained from this heap becomes dangling.
  pub unsafe fn reset(&mut self) {
    if self.head.is_null() {
      return;
    }

    if self.brk.current() != self.end {
      warn!("heap boundary moved behind the allocator, leaving the region in place");
    } else if !unsafe { self.brk.set(self.origin) } {
      warn!("heap boundary refused to shrink to {:p}", self.origin);
    }

    self.head = ptr::null_mut();
    self.end = ptr::null_mut();
  }
}

fn payload(block: *mut Block) -> NonNull<u8> {
  unsafe { NonNull::new_unchecked(Block::payload(block)) }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn heap() -> Heap<ReservedRegion> {
    Heap::new(ReservedRegion::new(1 << 20).unwrap())
  }

  /// A boundary over a buffer whose start sits `skew` bytes past an 8-byte
  /// line, granting at most `grants` extensions.
  struct SkewedBreak {
    _memory: Vec<u64>,
    start: *mut u8,
    brk: usize,
    limit: usize,
    grants: usize,
  }

  impl SkewedBreak {
    fn new(
      skew: usize,
      limit: usize,
      grants: usize,
    ) -> Self {
      let mut memory = vec![0u64; limit / 8 + 2];
      let start = unsafe { (memory.as_mut_ptr() as *mut u8).add(skew) };

      Self {
        _memory: memory,
        start,
        brk: 0,
        limit,
        grants,
      }
    }
  }

  unsafe impl Break for SkewedBreak {
    fn current(&self) -> *mut u8 {
      self.start.wrapping_add(self.brk)
    }

    unsafe fn extend(
      &mut self,
      increment: usize,
    ) -> Option<*mut u8> {
      if self.grants == 0 || self.brk + increment > self.limit {
        return None;
      }

      self.grants -= 1;
      let old = self.current();
      self.brk += increment;
      Some(old)
    }

    unsafe fn set(
      &mut self,
      addr: *mut u8,
    ) -> bool {
      match (addr as usize).checked_sub(self.start as usize) {
        Some(end) if end <= self.limit => {
          self.brk = end;
          true
        }
        _ => false,
      }
    }
  }

  #[test]
  fn test_find_free_base() {
    let mut heap = heap();

    unsafe {
      let base = heap.extend(ptr::null_mut(), 16).unwrap();
      heap.head = base;
      (*base).is_free = true;

      assert_eq!(heap.find_free(8), (Some(base), ptr::null_mut()));
    }
  }

  #[test]
  fn test_find_free_second_block() {
    let mut heap = heap();

    unsafe {
      let base = heap.extend(ptr::null_mut(), 8).unwrap();
      heap.head = base;
      (*base).is_free = true;
      let second = heap.extend(base, 32).unwrap();
      (*second).is_free = true;

      assert_eq!(heap.find_free(24), (Some(second), base));
    }
  }

  #[test]
  fn test_find_free_miss_reports_tail() {
    let mut heap = heap();

    assert_eq!(heap.find_free(10), (None, ptr::null_mut()));

    unsafe {
      let base = heap.extend(ptr::null_mut(), 8).unwrap();
      heap.head = base;
      let tail = heap.extend(base, 8).unwrap();

      assert_eq!(heap.find_free(8), (None, tail));
      assert_eq!(heap.find_tail(), tail);
    }
  }

  #[test]
  fn test_extend_heap_base() {
    let mut heap = heap();

    unsafe {
      let base = heap.extend(ptr::null_mut(), 24).unwrap();
      heap.head = base;

      assert_eq!((*base).size, 24);
      assert!(!(*base).is_free);
      assert_eq!(heap.boundary(), Block::payload(base).add(24));
      assert_eq!(base as *mut u8, heap.service().base());
    }
  }

  #[test]
  fn test_extend_heap_past_capacity() {
    let mut heap = heap();

    unsafe {
      let base = heap.extend(ptr::null_mut(), 16).unwrap();
      heap.head = base;
      let end = heap.boundary();

      assert_eq!(heap.extend(base, 1 << 21), Err(AllocError::OutOfMemory));
      assert_eq!(heap.extend(base, usize::MAX - 8), Err(AllocError::OutOfMemory));
      assert_eq!(heap.boundary(), end);
      assert!((*base).next.is_null());
    }
  }

  #[test]
  fn test_find_last_block() {
    let mut heap = heap();

    unsafe {
      heap.allocate(8);
      heap.allocate(87);
      let m3 = heap.allocate(11);

      assert_eq!(heap.find_tail(), Block::header_of(m3));
    }
  }

  #[test]
  fn test_valid_addr_yes() {
    let mut heap = heap();

    unsafe {
      let p = heap.allocate(16);

      assert!(heap.is_valid(p));
      assert_eq!(Block::header_of(p) as *mut u8, heap.service().base());
    }
  }

  #[test]
  fn test_valid_addr_no() {
    let mut heap = heap();

    unsafe {
      assert!(!heap.is_valid(ptr::null()));

      let p = heap.allocate(16);
      let base = heap.service().base();

      assert!(!heap.is_valid(base.wrapping_add(3190)));
      assert!(!heap.is_valid(base.wrapping_sub(300)));
      assert!(!heap.is_valid(base));
      assert!(!heap.is_valid(p.add(8)));
    }
  }

  #[test]
  fn test_valid_addr_misalign() {
    let mut heap = heap();

    unsafe {
      let p = heap.allocate(16);

      assert!(!heap.is_valid(p.add(1)));
    }
  }

  #[test]
  fn test_valid_addr_rejects_header_and_free_blocks() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(64);
      let b = heap.allocate(64);
      heap.allocate(8);

      assert!(!heap.is_valid(b.sub(HEADER_SIZE)));
      assert!(!heap.is_valid(a.add(32)));

      heap.release(a);
      assert!(!heap.is_valid(a));
    }
  }

  #[test]
  fn test_release_is_idempotent() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(16);
      let b = heap.allocate(16);
      heap.allocate(16);

      heap.release(a);
      heap.release(b);
      heap.release(a);

      assert_eq!(heap.blocks().count(), 2);
      assert_eq!(heap.block_of(a).unwrap().size, 32 + HEADER_SIZE);
    }
  }

  #[test]
  fn test_release_end() {
    let mut heap = heap();

    unsafe {
      heap.allocate(16);
      let last = heap.allocate(16);

      heap.release(last);

      assert_eq!(heap.service().current(), last.sub(HEADER_SIZE));
      assert_eq!(heap.boundary(), last.sub(HEADER_SIZE));
      assert_eq!(heap.blocks().count(), 1);
    }
  }

  #[test]
  fn test_usable_size() {
    let mut heap = heap();

    unsafe {
      let p = heap.allocate(13);

      assert_eq!(heap.usable_size(p), 16);
      assert_eq!(heap.usable_size(p.add(8)), 0);
    }
  }

  #[test]
  fn test_reset_returns_region() {
    let mut heap = heap();

    unsafe {
      heap.allocate(100);
      heap.allocate(200);
      heap.reset();

      assert!(heap.is_empty());
      assert_eq!(heap.service().current(), heap.service().base());
      assert!(!heap.allocate(8).is_null());
    }
  }

  #[test]
  fn test_moved_boundary_blocks_growth_and_trim() {
    let mut heap = heap();

    unsafe {
      heap.allocate(16);
      let tail = heap.allocate(16);
      heap.brk.extend(64).unwrap();

      assert!(heap.allocate(4096).is_null());

      heap.release(tail);
      let info = heap.block_of(tail).unwrap();
      assert!(info.free);
      assert_eq!(heap.blocks().count(), 2);
    }
  }

  #[test]
  fn test_misaligned_start_is_padded() {
    let mut heap = Heap::new(SkewedBreak::new(3, 1024, usize::MAX));
    let start = heap.service().current();

    unsafe {
      let a = heap.allocate(16);
      let b = heap.allocate(16);

      assert_eq!(a as usize % ALIGNMENT, 0);
      assert_eq!(Block::header_of(a) as *mut u8, start.add(5));
      assert_eq!(b, a.add(16 + HEADER_SIZE));
    }
  }

  #[test]
  fn test_release_last_block_returns_padding() {
    let mut heap = Heap::new(SkewedBreak::new(3, 1024, usize::MAX));
    let start = heap.service().current();

    unsafe {
      let a = heap.allocate(16);
      let b = heap.allocate(40);

      heap.release(b);
      assert_eq!(heap.service().current(), Block::header_of(b) as *mut u8);

      heap.release(a);
      assert!(heap.is_empty());
      assert_eq!(heap.service().current(), start);

      let again = heap.allocate(8);
      assert_eq!(again, a);
    }
  }

  #[test]
  fn test_reset_returns_padding() {
    let mut heap = Heap::new(SkewedBreak::new(5, 1024, usize::MAX));
    let start = heap.service().current();

    unsafe {
      heap.allocate(24);
      heap.allocate(24);
      heap.reset();

      assert!(heap.is_empty());
      assert_eq!(heap.service().current(), start);
    }
  }

  #[test]
  fn test_padding_rolled_back_when_growth_refused() {
    let mut heap = Heap::new(SkewedBreak::new(3, 1024, 1));
    let start = heap.service().current();

    unsafe {
      assert_eq!(heap.try_allocate(16), Err(AllocError::OutOfMemory));
      assert!(heap.is_empty());
      assert_eq!(heap.service().current(), start);
    }
  }

  #[test]
  fn test_padding_rolled_back_past_limit() {
    let mut heap = Heap::new(SkewedBreak::new(3, 64, usize::MAX));
    let start = heap.service().current();

    unsafe {
      assert_eq!(heap.try_allocate(64), Err(AllocError::OutOfMemory));
      assert_eq!(heap.service().current(), start);

      assert!(!heap.allocate(16).is_null());
    }
  }

  #[test]
  fn test_refused_padding() {
    let mut heap = Heap::new(SkewedBreak::new(3, 1024, 0));
    let start = heap.service().current();

    unsafe {
      assert_eq!(heap.try_allocate(16), Err(AllocError::OutOfMemory));
      assert_eq!(heap.service().current(), start);
    }
  }
}
