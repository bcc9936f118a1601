use core::{
  alloc::{GlobalAlloc, Layout},
  ops::{Deref, DerefMut},
  ptr,
};

use spin::{Mutex, MutexGuard};

use crate::{
  Break, Heap,
  align::ALIGNMENT,
  trace::{Silence, silenced},
};

/// A [`Heap`] behind a spinning mutex: every operation, search, split, merge
/// and boundary movement included, runs as one critical section.
///
/// Usable as a `#[global_allocator]` for layouts aligned to at most
/// [`ALIGNMENT`]; stricter alignments get null.
///
/// # Logging
///
/// The heap's own records are dropped on a thread while it holds the lock,
/// since a logger that allocates would spin on that same lock forever. A
/// failed [`GlobalAlloc`] call is reported once the lock is released, with
/// records from the logger's own allocations muted.
pub struct LockedHeap<B: Break>(Mutex<Heap<B>>);

/// Exclusive access to a [`LockedHeap`]. Log records of this thread stay
/// muted until it is dropped.
pub struct HeapGuard<'a, B: Break> {
  // Unlocks before the silence lifts.
  heap: MutexGuard<'a, Heap<B>>,
  _silence: Silence,
}

impl<B: Break> Deref for HeapGuard<'_, B> {
  type Target = Heap<B>;

  fn deref(&self) -> &Heap<B> {
    &self.heap
  }
}

impl<B: Break> DerefMut for HeapGuard<'_, B> {
  fn deref_mut(&mut self) -> &mut Heap<B> {
    &mut self.heap
  }
}

impl<B: Break> LockedHeap<B> {
  pub const fn new(brk: B) -> Self {
    Self(Mutex::new(Heap::new(brk)))
  }

  pub fn lock(&self) -> HeapGuard<'_, B> {
    let silence = Silence::enter();

    HeapGuard {
      heap: self.0.lock(),
      _silence: silence,
    }
  }
}

/// Reports a null result from a [`GlobalAlloc`] call, outside the lock.
fn report(
  ptr: *mut u8,
  op: &str,
  layout: Layout,
) -> *mut u8 {
  if ptr.is_null() && !silenced() {
    let _silence = Silence::enter();
    log::warn!("{} of {} bytes aligned to {} failed", op, layout.size(), layout.align());
  }
  ptr
}

unsafe impl<B: Break + Send> GlobalAlloc for LockedHeap<B> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return report(ptr::null_mut(), "alloc", layout);
    }
    let ptr = unsafe { self.lock().allocate(layout.size()) };
    report(ptr, "alloc", layout)
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return report(ptr::null_mut(), "alloc_zeroed", layout);
    }
    let ptr = unsafe { self.lock().allocate_zeroed(1, layout.size()) };
    report(ptr, "alloc_zeroed", layout)
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    unsafe { self.lock().release(ptr) }
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return report(ptr::null_mut(), "realloc", layout);
    }
    let ptr = unsafe { self.lock().reallocate(ptr, new_size) };
    report(ptr, "realloc", layout)
  }
}
