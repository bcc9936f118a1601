//! # brkalloc - A First-Fit Heap on the Program Break
//!
//! This crate provides a complete replacement for the allocation family
//! (`malloc`, `calloc`, `free`, `realloc`) that manages one growable,
//! contiguous region obtained with `sbrk(2)`-style boundary moves.
//!
//! ## Overview
//!
//! The region is tiled by blocks. Each block is a fixed-size header followed
//! by its payload, and the headers form one address-ordered doubly linked
//! list:
//!
//! ```text
//!   Managed Region:
//!
//!   head                                                             boundary
//!   ▼                                                                    ▼
//!   ┌────────┬──────────┬────────┬──────────────┬────────┬───────────────┐
//!   │ header │ 24 used  │ header │   104 free   │ header │    8 used     │
//!   └────────┴──────────┴────────┴──────────────┴────────┴───────────────┘
//!       │  ▲                │  ▲                    │
//!       └──┼── next ───────►┘  └──── prev ──────────┘
//!          │
//!          └── pointer returned to the caller
//! ```
//!
//! Blocks abut exactly: no gaps, no overlaps, and never two free blocks side
//! by side.
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align      - Size rounding (align, align_to!)
//!   ├── block      - Block header, split and coalesce (internal)
//!   ├── brk        - Boundary services (ProgramBreak, ReservedRegion)
//!   ├── heap       - Heap: first-fit search, growth, the four operations
//!   ├── locked     - LockedHeap: spin-locked heap and GlobalAlloc
//!   ├── config     - HeapConfig from the environment
//!   ├── error      - AllocError
//!   ├── trace      - log macros muted under the heap lock (internal)
//!   └── ffi        - C ABI exports (feature "c-abi")
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkalloc::{Heap, HeapConfig};
//!
//! let mut heap = Heap::reserved(&HeapConfig { reserve_bytes: 1 << 20 }).unwrap();
//!
//! unsafe {
//!     let ptr = heap.allocate(16) as *mut u64;
//!     *ptr = 42;
//!
//!     let ptr = heap.reallocate(ptr as *mut u8, 128) as *mut u64;
//!     assert_eq!(*ptr, 42);
//!
//!     heap.release(ptr as *mut u8);
//! }
//!
//! assert!(heap.is_empty());
//! ```
//!
//! ## How It Works
//!
//! **Allocation** rounds the request up to 8 bytes and walks the chain for
//! the first free block that fits. A block with enough room left over is
//! split:
//!
//! ```text
//!   ┌────────┬───────────────────────────────┐
//!   │ header │          free: 2000           │
//!   └────────┴───────────────────────────────┘
//!                        │ allocate(100)
//!                        ▼
//!   ┌────────┬──────────┬────────┬───────────┐
//!   │ header │ used:104 │ header │ free:1864 │
//!   └────────┴──────────┴────────┴───────────┘
//! ```
//!
//! When nothing fits, the boundary is pushed up by one header plus the
//! payload and the new block is linked after the tail.
//!
//! **Release** marks the block free and merges it with free neighbors. If
//! the merged block ends the chain, the boundary is pulled back down to its
//! header, returning the memory.
//!
//! **Reallocation** shrinks in place, splitting off the excess. To grow, it
//! first tries to absorb free neighbors, which may slide the data down into a
//! free predecessor, and only then moves to a fresh block.
//!
//! ## Limitations
//!
//! - **Single heap per break**: a [`Heap`] on [`ProgramBreak`] assumes nothing
//!   else moves the break; when something does, growth fails instead of
//!   corrupting memory
//! - **8-byte alignment**: stricter layouts are refused by [`LockedHeap`]
//! - **Linear search**: first-fit scans the chain from the head
//! - **Unix-only**: requires `libc` (`sbrk`, `brk`, `mmap`)
//! - **Quiet under the lock**: [`LockedHeap`] drops the heap's log records
//!   while the lock is held, so a logger that allocates cannot deadlock it;
//!   only failed calls are reported, after unlocking
//!
//! ## Building a Preloadable Library
//!
//! The crate builds as an `rlib`. The `c-abi` feature adds
//! `brkalloc_malloc` and friends; `interpose` exports them as `malloc`,
//! `calloc`, `free`, `realloc` and `malloc_usable_size`:
//!
//! ```text
//! cargo rustc --release --features interpose --crate-type cdylib
//! ```
//!
//! ## Safety
//!
//! The operations take and return raw pointers into memory the heap manages,
//! so they are `unsafe`. Pointers that do not belong to a heap are detected
//! and ignored by `release` and refused by `reallocate`.

pub mod align;
mod block;
mod brk;
mod config;
mod error;
#[cfg(feature = "c-abi")]
pub mod ffi;
mod heap;
mod locked;
mod trace;

pub use align::{ALIGNMENT, align};
pub use block::{HEADER_SIZE, MIN_PAYLOAD};
pub use brk::{Break, ProgramBreak, ReservedRegion};
pub use config::{DEFAULT_RESERVE_BYTES, HeapConfig};
pub use error::AllocError;
pub use heap::{BlockInfo, Blocks, Heap};
pub use locked::{HeapGuard, LockedHeap};
