//! Bookkeeping of installed hooks.
use crate::error::{Error, Result};
use std::collections::btree_map::{self, BTreeMap};

/// What is needed to identify and restore an installed hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRecord {
  /// The hooked address, including any mode bit.
  pub target: usize,
  /// Where the jump was written; `target` without a mode bit.
  pub code: usize,
  /// The callback invoked by the trampoline.
  pub callback: usize,
  /// Base of the trampoline memory.
  pub trampoline: usize,
  /// Where the save/call/restore sequence begins.
  pub trampoline_code: usize,
  /// The bytes the jump overwrote.
  pub original: Vec<u8>,
}

/// Installed hooks, keyed by the address of the patched code.
///
/// At most one hook exists per address. ARM and Thumb targets that differ
/// only in the mode bit patch the same bytes and therefore collide.
#[derive(Debug, Default)]
pub struct HookRegistry {
  hooks: BTreeMap<usize, HookRecord>,
}

impl HookRegistry {
  /// Creates an empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns true if a hook patched the code at `code`.
  pub fn contains(&self, code: usize) -> bool {
    self.hooks.contains_key(&code)
  }

  /// Records a hook, failing if its code is already patched.
  pub fn insert(&mut self, record: HookRecord) -> Result<()> {
    match self.hooks.entry(record.code) {
      btree_map::Entry::Occupied(_) => Err(Error::AlreadyHooked(record.target)),
      btree_map::Entry::Vacant(entry) => {
        entry.insert(record);
        Ok(())
      },
    }
  }

  /// Returns the hook that patched the code at `code`.
  pub fn get(&self, code: usize) -> Option<&HookRecord> {
    self.hooks.get(&code)
  }

  /// Forgets the hook that patched the code at `code`.
  pub fn remove(&mut self, code: usize) -> Option<HookRecord> {
    self.hooks.remove(&code)
  }

  /// Iterates hooks in ascending code address order.
  pub fn iter(&self) -> impl Iterator<Item = &HookRecord> {
    self.hooks.values()
  }

  pub fn len(&self) -> usize {
    self.hooks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.hooks.is_empty()
  }
}
