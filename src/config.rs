use log::warn;

/// Default virtual reservation for a [`ReservedRegion`](crate::ReservedRegion).
pub const DEFAULT_RESERVE_BYTES: usize = 1 << 30;

const RESERVE_VAR: &str = "BRKALLOC_RESERVE_BYTES";

/// Tunables for heaps that do not sit on the process break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Upper bound on the region a reserved heap may grow into.
  pub reserve_bytes: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      reserve_bytes: DEFAULT_RESERVE_BYTES,
    }
  }
}

impl HeapConfig {
  /// Reads `BRKALLOC_RESERVE_BYTES`; unset or unparsable values keep the
  /// default.
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let mut config = Self::default();

    if let Some(raw) = lookup(RESERVE_VAR) {
      match raw.trim().parse::<usize>() {
        Ok(bytes) if bytes > 0 => config.reserve_bytes = bytes,
        _ => warn!("ignoring {}={:?}: expected a positive byte count", RESERVE_VAR, raw),
      }
    }

    config
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_when_unset() {
    let config = HeapConfig::from_lookup(|_| None);

    assert_eq!(config, HeapConfig::default());
  }

  #[test]
  fn test_reads_reserve_bytes() {
    let config = HeapConfig::from_lookup(|key| (key == RESERVE_VAR).then(|| " 65536 ".to_string()));

    assert_eq!(config.reserve_bytes, 65536);
  }

  #[test]
  fn test_rejects_garbage() {
    for raw in ["", "0", "-4096", "64k"] {
      let config = HeapConfig::from_lookup(|_| Some(raw.to_string()));

      assert_eq!(config.reserve_bytes, DEFAULT_RESERVE_BYTES);
    }
  }
}
