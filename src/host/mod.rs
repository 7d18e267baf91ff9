//! Memory capabilities the hook engine is built on.
//!
//! The engine never dereferences addresses itself; every read, allocation
//! and code patch goes through a [`Host`]. [`ProcessHost`] operates on the
//! running process, while [`ScratchHost`] keeps an address space in memory,
//! which allows generating hooks for any architecture offline.
pub use self::process::ProcessHost;
pub use self::scratch::ScratchHost;

use crate::arch::Arch;
use crate::error::Result;

mod cache;
mod process;
mod scratch;
mod search;

/// A request to place memory within reach of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proximity {
  /// The address the memory should be close to.
  pub origin: usize,
  /// The maximum distance from `origin`, in either direction.
  pub max_distance: usize,
}

impl Proximity {
  /// Returns the addresses considered close to the origin.
  pub fn range(&self) -> std::ops::Range<usize> {
    self.origin.saturating_sub(self.max_distance)..self.origin.saturating_add(self.max_distance)
  }
}

/// An address space that hooks are installed into.
pub trait Host {
  /// Returns the architecture of the code in this address space.
  fn arch(&self) -> Arch;

  /// Returns the allocation granularity.
  fn page_size(&self) -> usize;

  /// Allocates executable memory of at least `size` bytes, rounded up to
  /// whole pages, preferably close to an address.
  fn allocate_pages(&mut self, size: usize, near: Option<Proximity>) -> Result<usize>;

  /// Fills `buffer` with the bytes stored at `address`.
  fn read(&self, address: usize, buffer: &mut [u8]) -> Result<()>;

  /// Exposes `size` bytes of code at `address` as writable for the duration
  /// of `patch`. The instruction cache is coherent once this returns.
  fn patch_code(
    &mut self,
    address: usize,
    size: usize,
    patch: &mut dyn FnMut(&mut [u8]),
  ) -> Result<()>;

  /// Gives up ownership of every allocated page so that it outlives the
  /// host. Called when hooks could not be restored and still jump into
  /// their trampolines.
  fn leak_pages(&mut self) {}

  /// Reads `size` bytes at `address`.
  fn read_vec(&self, address: usize, size: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; size];
    self.read(address, &mut buffer)?;
    Ok(buffer)
  }

  /// Overwrites code at `address` with `bytes`.
  fn write_code(&mut self, address: usize, bytes: &[u8]) -> Result<()> {
    self.patch_code(address, bytes.len(), &mut |code| code.copy_from_slice(bytes))
  }
}

/// Rounds `size` up to a multiple of `page_size`.
pub(crate) fn round_to_pages(size: usize, page_size: usize) -> usize {
  (size.max(1) + page_size - 1) / page_size * page_size
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn proximity_range_saturates() {
    let near = Proximity {
      origin: 0x1000,
      max_distance: 0x8000,
    };
    assert_eq!(near.range(), 0..0x9000);
  }

  #[test]
  fn sizes_round_to_whole_pages() {
    assert_eq!(round_to_pages(0, 0x1000), 0x1000);
    assert_eq!(round_to_pages(0x1000, 0x1000), 0x1000);
    assert_eq!(round_to_pages(0x1001, 0x1000), 0x2000);
  }
}
