//! Session configuration.

/// Tunables of a hooking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Bytes of trampoline memory reserved for each hook.
  pub trampoline_capacity: usize,
  /// Extra bytes dumped past the written regions in a hook's debug string.
  pub dump_padding: usize,
  /// Preferred maximum distance between new trampoline pages and the
  /// hooked code.
  pub proximity: usize,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      trampoline_capacity: 0x100,
      dump_padding: 0x10,
      proximity: 0x8000_0000,
    }
  }
}

impl Config {
  pub fn with_trampoline_capacity(mut self, capacity: usize) -> Self {
    self.trampoline_capacity = capacity;
    self
  }

  pub fn with_dump_padding(mut self, padding: usize) -> Self {
    self.dump_padding = padding;
    self
  }

  pub fn with_proximity(mut self, distance: usize) -> Self {
    self.proximity = distance;
    self
  }
}
