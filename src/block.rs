//! Block headers and the two operations that relink the chain in place.
//!
//! Aliasing rules: every `*mut Block` here points at a header that lives in
//! the managed region and is reachable from the owning heap's head. Nothing
//! outside this module rewires `next`/`prev` except the heap's grow and
//! tail-trim paths.

use core::{mem, ptr};

use crate::trace::debug;

use crate::{align::ALIGNMENT, align_to};

#[repr(C)]
pub struct Block {
  pub size: usize,
  pub next: *mut Block,
  pub prev: *mut Block,
  pub is_free: bool,
}

/// Bytes between a block's header address and its payload.
pub const HEADER_SIZE: usize = align_to!(mem::size_of::<Block>(), ALIGNMENT);

/// Smallest payload a block may ever carry.
pub const MIN_PAYLOAD: usize = ALIGNMENT;

/// Leftover room a block needs before it can be split in two.
pub const SPLIT_THRESHOLD: usize = HEADER_SIZE + MIN_PAYLOAD;

impl Block {
  pub fn new(
    size: usize,
    is_free: bool,
    next: *mut Block,
    prev: *mut Block,
  ) -> Self {
    Self { size, next, prev, is_free }
  }

  /// Formats a header at `addr` and returns it.
  ///
  /// # Safety
  ///
  /// `addr` must be aligned to [`ALIGNMENT`] and writable for `HEADER_SIZE`
  /// bytes.
  pub unsafe fn write(
    addr: *mut u8,
    block: Block,
  ) -> *mut Block {
    let header = addr as *mut Block;
    unsafe { ptr::write(header, block) };
    header
  }

  pub fn payload(block: *mut Block) -> *mut u8 {
    (block as *mut u8).wrapping_add(HEADER_SIZE)
  }

  /// Pure arithmetic inverse of [`Block::payload`]. Only meaningful for a
  /// pointer already known to be a payload address.
  pub fn header_of(payload: *const u8) -> *mut Block {
    payload.wrapping_sub(HEADER_SIZE) as *mut Block
  }

  /// Whether `block` has room for a `size` payload plus a minimal free block.
  pub unsafe fn can_split(
    block: *mut Block,
    size: usize,
  ) -> bool {
    unsafe { (*block).size >= size + SPLIT_THRESHOLD }
  }

  /// Payload size `block` would reach by absorbing its free neighbors.
  ///
  /// Neighbors of a block are never both free with their own neighbors, so a
  /// single step on each side is the whole fixed point.
  pub unsafe fn mergeable_size(block: *mut Block) -> usize {
    unsafe {
      let mut size = (*block).size;

      let next = (*block).next;
      if !next.is_null() && (*next).is_free {
        size += HEADER_SIZE + (*next).size;
      }

      let prev = (*block).prev;
      if !prev.is_null() && (*prev).is_free {
        size += HEADER_SIZE + (*prev).size;
      }

      size
    }
  }
}

/// Carves `block` into a `size` prefix and a free suffix, returning the
/// suffix.
///
/// # Safety
///
/// `block` must be a live chain member and `Block::can_split(block, size)`
/// must hold.
pub unsafe fn split(
  block: *mut Block,
  size: usize,
) -> *mut Block {
  unsafe {
    debug_assert!(Block::can_split(block, size));

    let rest_size = (*block).size - size - HEADER_SIZE;
    let next = (*block).next;
    let rest = Block::write(
      Block::payload(block).add(size),
      Block::new(rest_size, true, next, block),
    );

    if !next.is_null() {
      (*next).prev = rest;
    }

    (*block).size = size;
    (*block).next = rest;

    debug!("split {:p} into {} + {} bytes at {:p}", block, size, rest_size, rest);

    rest
  }
}

/// Merges `block` with its free neighbors until neither side is free.
///
/// Returns the surviving block, which is `block`'s predecessor whenever a
/// backward merge happened. The free flag of the survivor is left as found.
///
/// # Safety
///
/// `block` must be a live chain member.
pub unsafe fn coalesce(mut block: *mut Block) -> *mut Block {
  unsafe {
    loop {
      let mut merged = false;

      let next = (*block).next;
      if !next.is_null() && (*next).is_free {
        (*block).size += HEADER_SIZE + (*next).size;
        (*block).next = (*next).next;
        if !(*block).next.is_null() {
          (*(*block).next).prev = block;
        }
        merged = true;
      }

      let prev = (*block).prev;
      if !prev.is_null() && (*prev).is_free {
        (*prev).size += HEADER_SIZE + (*block).size;
        (*prev).next = (*block).next;
        if !(*block).next.is_null() {
          (*(*block).next).prev = prev;
        }
        block = prev;
        merged = true;
      }

      if !merged {
        return block;
      }

      debug!("coalesced into {:p} ({} bytes)", block, (*block).size);
    }
  }
}
