use crate::trace::warn;

/// Allocation granularity in bytes.
///
/// Every payload size and every payload address handed out by the heap is a
/// multiple of it.
pub const ALIGNMENT: usize = 8;

/// Rounds `$value` up to the next multiple of `$align`, which must be a power
/// of two.
///
/// # Examples
///
/// ```rust
/// use brkalloc::align_to;
///
/// assert_eq!(align_to!(13, 8), 16);
/// assert_eq!(align_to!(4097, 4096), 8192);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Rounds a requested byte count up to the allocation granularity.
///
/// Returns `0` for requests that are not positive: zero itself, and anything
/// above `isize::MAX`, which reads as a negative count once taken as signed.
/// Every other request yields at least [`ALIGNMENT`].
///
/// ```rust
/// use brkalloc::align;
///
/// assert_eq!(align(1), 8);
/// assert_eq!(align(19), 24);
/// assert_eq!(align(0), 0);
/// ```
pub fn align(size: usize) -> usize {
  if size == 0 || size > isize::MAX as usize {
    warn!("rejecting allocation request of {} bytes", size as isize);
    return 0;
  }

  align_to!(size, ALIGNMENT)
}
