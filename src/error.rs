use std::fmt;

/// Why a heap operation produced no pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// Zero or negative byte count, or an element count product that overflows.
  InvalidSize,
  /// The heap-boundary service refused to grow the region.
  OutOfMemory,
  /// The pointer is not a live payload address of this heap.
  InvalidPointer,
}

impl fmt::Display for AllocError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      AllocError::InvalidSize => write!(f, "invalid allocation size"),
      AllocError::OutOfMemory => write!(f, "heap boundary could not be extended"),
      AllocError::InvalidPointer => write!(f, "pointer is not a live allocation"),
    }
  }
}

impl std::error::Error for AllocError {}
