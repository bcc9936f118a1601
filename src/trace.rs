//! Log records from inside a heap critical section.
//!
//! A logger may itself allocate, and when the heap is the global allocator
//! that allocation lands back on the lock the current thread already holds.
//! While a [`Silence`] guard is alive on a thread, the macros below drop
//! their records instead of reaching the logger.

use core::cell::Cell;

thread_local! {
  static SILENCED: Cell<bool> = const { Cell::new(false) };
}

/// Whether records on this thread are being dropped. Also true while thread
/// locals are being torn down.
pub(crate) fn silenced() -> bool {
  SILENCED.try_with(Cell::get).unwrap_or(true)
}

/// Mutes the macros of this module on the current thread until dropped.
pub(crate) struct Silence {
  previous: bool,
}

impl Silence {
  pub(crate) fn enter() -> Self {
    let previous = SILENCED.try_with(|flag| flag.replace(true)).unwrap_or(true);
    Self { previous }
  }
}

impl Drop for Silence {
  fn drop(&mut self) {
    let _ = SILENCED.try_with(|flag| flag.set(self.previous));
  }
}

macro_rules! trace {
  ($($arg:tt)+) => {
    if !$crate::trace::silenced() {
      ::log::trace!($($arg)+)
    }
  };
}

macro_rules! debug {
  ($($arg:tt)+) => {
    if !$crate::trace::silenced() {
      ::log::debug!($($arg)+)
    }
  };
}

macro_rules! warn_ {
  ($($arg:tt)+) => {
    if !$crate::trace::silenced() {
      ::log::warn!($($arg)+)
    }
  };
}

pub(crate) use {debug, trace, warn_ as warn};
