//! Heap-boundary services: where a [`Heap`](crate::Heap) gets its memory.

use core::ptr;

use libc::{c_void, intptr_t};

use crate::{
  AllocError, HeapConfig, align_to,
  trace::{debug, warn},
};

/// A contiguous region with a movable upper boundary, in the manner of
/// `sbrk(2)`/`brk(2)`.
///
/// # Safety
///
/// Implementors guarantee that after `extend(n)` returns `Some(old)`, the range
/// `[old, old + n)` is readable, writable and immediately follows whatever
/// the previous successful `extend` handed out, unless a third party moved
/// the boundary in between (observable through [`Break::current`]).
pub unsafe trait Break {
  /// Current boundary. No side effects.
  fn current(&self) -> *mut u8;

  /// Advances the boundary by `increment` bytes and returns the old boundary,
  /// or `None` when the region cannot grow.
  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Option<*mut u8>;

  /// Moves the boundary to `addr`. Returns `false` if it was refused.
  unsafe fn set(
    &mut self,
    addr: *mut u8,
  ) -> bool;
}

/// The process break, driven through `sbrk(2)` and `brk(2)`.
///
/// Only one heap per process should sit on it, and nothing else in the
/// process should move the break while that heap is live.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgramBreak;

unsafe impl Break for ProgramBreak {
  fn current(&self) -> *mut u8 {
    unsafe { libc::sbrk(0) as *mut u8 }
  }

  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Option<*mut u8> {
    let increment = intptr_t::try_from(increment).ok()?;
    let old = unsafe { libc::sbrk(increment) };

    if old == usize::MAX as *mut c_void {
      return None;
    }

    Some(old as *mut u8)
  }

  unsafe fn set(
    &mut self,
    addr: *mut u8,
  ) -> bool {
    unsafe { libc::brk(addr as *mut c_void) == 0 }
  }
}

/// A private break over a reserved stretch of address space.
///
/// The whole capacity is mapped `PROT_NONE` up front; pages become
/// read-write as the boundary climbs past them and are handed back to the
/// kernel when it falls again. The mapping is released on drop, so every
/// pointer obtained through a heap on this region dies with it.
pub struct ReservedRegion {
  base: *mut u8,
  capacity: usize,
  page_size: usize,
  brk: usize,
  committed: usize,
}

unsafe impl Send for ReservedRegion {}

impl ReservedRegion {
  pub fn new(capacity: usize) -> Result<Self, AllocError> {
    let page_size = page_size();
    let capacity = capacity
      .max(1)
      .checked_add(page_size - 1)
      .ok_or(AllocError::OutOfMemory)?
      & !(page_size - 1);

    let base = unsafe {
      libc::mmap(
        ptr::null_mut(),
        capacity,
        libc::PROT_NONE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
        -1,
        0,
      )
    };

    if base == libc::MAP_FAILED {
      return Err(AllocError::OutOfMemory);
    }

    debug!("reserved {} bytes at {:p}", capacity, base);

    Ok(Self {
      base: base as *mut u8,
      capacity,
      page_size,
      brk: 0,
      committed: 0,
    })
  }

  pub fn from_config(config: &HeapConfig) -> Result<Self, AllocError> {
    Self::new(config.reserve_bytes)
  }

  pub fn base(&self) -> *mut u8 {
    self.base
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes currently backed by read-write pages.
  pub fn committed(&self) -> usize {
    self.committed
  }

  fn commit(
    &mut self,
    end: usize,
  ) -> bool {
    if end <= self.committed {
      return true;
    }

    let target = align_to!(end, self.page_size).min(self.capacity);
    let ret = unsafe {
      libc::mprotect(
        self.base.add(self.committed) as *mut c_void,
        target - self.committed,
        libc::PROT_READ | libc::PROT_WRITE,
      )
    };

    if ret != 0 {
      return false;
    }

    self.committed = target;
    true
  }

  fn decommit(
    &mut self,
    end: usize,
  ) {
    let keep = align_to!(end, self.page_size);
    if keep >= self.committed {
      return;
    }

    let start = unsafe { self.base.add(keep) } as *mut c_void;
    let len = self.committed - keep;

    if unsafe { libc::madvise(start, len, libc::MADV_DONTNEED) } != 0 {
      warn!("madvise refused to drop {} bytes at {:p}", len, start);
    }

    // Pages that stay read-write remain committed.
    if unsafe { libc::mprotect(start, len, libc::PROT_NONE) } != 0 {
      warn!("mprotect refused to revoke {} bytes at {:p}", len, start);
      return;
    }

    self.committed = keep;
  }
}

unsafe impl Break for ReservedRegion {
  fn current(&self) -> *mut u8 {
    self.base.wrapping_add(self.brk)
  }

  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Option<*mut u8> {
    let end = self.brk.checked_add(increment)?;
    if end > self.capacity || !self.commit(end) {
      return None;
    }

    let old = self.current();
    self.brk = end;
    Some(old)
  }

  unsafe fn set(
    &mut self,
    addr: *mut u8,
  ) -> bool {
    let Some(end) = (addr as usize).checked_sub(self.base as usize) else {
      return false;
    };

    if end > self.brk {
      return unsafe { self.extend(end - self.brk) }.is_some();
    }

    self.brk = end;
    self.decommit(end);
    true
  }
}

impl Drop for ReservedRegion {
  fn drop(&mut self) {
    unsafe {
      libc::munmap(self.base as *mut c_void, self.capacity);
    }
  }
}

fn page_size() -> usize {
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
  if size > 0 { size as usize } else { 4096 }
}
