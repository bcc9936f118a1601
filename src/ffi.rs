//! Drop-in replacements for the C allocation family, backed by the process
//! break.
//!
//! Built only with the `c-abi` feature. The symbols are exported as
//! `brkalloc_malloc`, `brkalloc_free` and so on, so linking the crate does not
//! replace the allocator of the program it is linked into. The `interpose`
//! feature exports them under the C names instead, for a shared object to
//! load with `LD_PRELOAD`:
//!
//! ```text
//! cargo rustc --release --features interpose --crate-type cdylib
//! LD_PRELOAD=target/release/libbrkalloc.so ls
//! ```
//!
//! Failures set `errno` to `ENOMEM`. Each call holds the heap lock for its
//! whole duration, with the heap's log records muted meanwhile.

use core::{ffi::c_void, ptr::NonNull};

use crate::{AllocError, LockedHeap, ProgramBreak};

static HEAP: LockedHeap<ProgramBreak> = LockedHeap::new(ProgramBreak);

fn report(result: Result<NonNull<u8>, AllocError>) -> *mut c_void {
  match result {
    Ok(ptr) => ptr.as_ptr() as *mut c_void,
    Err(_) => {
      #[cfg(target_os = "linux")]
      unsafe {
        *libc::__errno_location() = libc::ENOMEM;
      }
      core::ptr::null_mut()
    }
  }
}

/// `malloc(3)`: null and `ENOMEM` for a zero size or when the break cannot
/// grow.
#[cfg_attr(feature = "interpose", unsafe(export_name = "malloc"))]
#[cfg_attr(not(feature = "interpose"), unsafe(export_name = "brkalloc_malloc"))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
  report(unsafe { HEAP.lock().try_allocate(size) })
}

/// `calloc(3)`: an overflowing `count * size` is refused like any failure.
#[cfg_attr(feature = "interpose", unsafe(export_name = "calloc"))]
#[cfg_attr(not(feature = "interpose"), unsafe(export_name = "brkalloc_calloc"))]
pub unsafe extern "C" fn calloc(
  count: usize,
  size: usize,
) -> *mut c_void {
  report(unsafe { HEAP.lock().try_allocate_zeroed(count, size) })
}

#[cfg_attr(feature = "interpose", unsafe(export_name = "free"))]
#[cfg_attr(not(feature = "interpose"), unsafe(export_name = "brkalloc_free"))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
  unsafe { HEAP.lock().release(ptr as *mut u8) }
}

/// `realloc(3)`: a null `ptr` allocates. On failure `ptr` stays valid.
#[cfg_attr(feature = "interpose", unsafe(export_name = "realloc"))]
#[cfg_attr(not(feature = "interpose"), unsafe(export_name = "brkalloc_realloc"))]
pub unsafe extern "C" fn realloc(
  ptr: *mut c_void,
  size: usize,
) -> *mut c_void {
  report(unsafe { HEAP.lock().try_reallocate(ptr as *mut u8, size) })
}

#[cfg_attr(feature = "interpose", unsafe(export_name = "malloc_usable_size"))]
#[cfg_attr(
  not(feature = "interpose"),
  unsafe(export_name = "brkalloc_malloc_usable_size")
)]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
  HEAP.lock().usable_size(ptr as *const u8)
}
