use super::{round_to_pages, Host, Proximity};
use crate::arch::Arch;
use crate::error::{Error, Result};
use log::trace;

const PAGE_SIZE: usize = 0x1000;

/// An address space kept entirely in memory.
///
/// Code for any architecture can be mapped and hooked without executing
/// it, e.g. to inspect the trampolines a hook would produce.
pub struct ScratchHost {
  arch: Arch,
  regions: Vec<(usize, Vec<u8>)>,
  next_page: usize,
  patches: usize,
}

impl ScratchHost {
  /// Creates an empty address space. Pages are handed out upwards from
  /// `page_base`.
  pub fn new(arch: Arch, page_base: usize) -> Self {
    ScratchHost {
      arch,
      regions: Vec::new(),
      next_page: round_to_pages(page_base, PAGE_SIZE),
      patches: 0,
    }
  }

  /// Places `bytes` at `address`.
  pub fn map(&mut self, address: usize, bytes: &[u8]) {
    self.regions.push((address, bytes.to_vec()));
  }

  /// Removes the region starting at `address`, returning its contents.
  pub fn unmap(&mut self, address: usize) -> Option<Vec<u8>> {
    let index = self.regions.iter().position(|(base, _)| *base == address)?;
    Some(self.regions.remove(index).1)
  }

  /// Returns a view of `size` bytes at `address`.
  pub fn bytes(&self, address: usize, size: usize) -> Result<&[u8]> {
    let (base, index) = self.find(address, size)?;
    let start = address - base;
    Ok(&self.regions[index].1[start..start + size])
  }

  /// Returns how many patch scopes were opened.
  pub fn patch_count(&self) -> usize {
    self.patches
  }

  /// Finds the base and index of the region containing the whole range.
  fn find(&self, address: usize, size: usize) -> Result<(usize, usize)> {
    self
      .regions
      .iter()
      .position(|(base, bytes)| {
        address >= *base && address.saturating_add(size) <= base.saturating_add(bytes.len())
      })
      .map(|index| (self.regions[index].0, index))
      .ok_or(Error::InvalidAddress(address))
  }
}

impl Host for ScratchHost {
  fn arch(&self) -> Arch {
    self.arch
  }

  fn page_size(&self) -> usize {
    PAGE_SIZE
  }

  fn allocate_pages(&mut self, size: usize, _near: Option<Proximity>) -> Result<usize> {
    let size = round_to_pages(size, PAGE_SIZE);
    let address = self.next_page;

    self.next_page = address.checked_add(size).ok_or(Error::OutOfMemory)?;
    self.regions.push((address, vec![0u8; size]));

    trace!("scratch pages {:#x}..{:#x}", address, self.next_page);
    Ok(address)
  }

  fn read(&self, address: usize, buffer: &mut [u8]) -> Result<()> {
    buffer.copy_from_slice(self.bytes(address, buffer.len())?);
    Ok(())
  }

  fn patch_code(
    &mut self,
    address: usize,
    size: usize,
    patch: &mut dyn FnMut(&mut [u8]),
  ) -> Result<()> {
    let (base, index) = self.find(address, size)?;
    let start = address - base;

    self.patches += 1;
    patch(&mut self.regions[index].1[start..start + size]);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use matches::assert_matches;

  #[test]
  fn accesses_must_stay_within_a_region() {
    let mut host = ScratchHost::new(Arch::Arm, 0x10_0000);
    host.map(0x8000, &[1, 2, 3, 4]);

    assert_eq!(host.read_vec(0x8001, 3).unwrap(), vec![2, 3, 4]);
    assert_matches!(host.read_vec(0x8002, 3), Err(Error::InvalidAddress(0x8002)));
    assert_matches!(host.write_code(0x7FFF, &[0]), Err(Error::InvalidAddress(0x7FFF)));
    assert_eq!(host.patch_count(), 0);
  }

  #[test]
  fn pages_are_zeroed_and_contiguous() {
    let mut host = ScratchHost::new(Arch::X64, 0x10_0001);

    let first = host.allocate_pages(1, None).unwrap();
    let second = host.allocate_pages(0x1001, None).unwrap();
    assert_eq!(first, 0x10_1000);
    assert_eq!(second, 0x10_2000);
    assert_eq!(host.bytes(second, 0x2000).unwrap(), &[0u8; 0x2000][..]);
  }

  #[test]
  fn patches_are_counted() {
    let mut host = ScratchHost::new(Arch::Arm64, 0);
    host.map(0x4000, &[0; 8]);

    host.write_code(0x4004, &[0xFF; 4]).unwrap();
    assert_eq!(host.bytes(0x4000, 8).unwrap(), &[0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
    assert_eq!(host.patch_count(), 1);
    assert_eq!(host.unmap(0x4000).map(|bytes| bytes.len()), Some(8));
  }
}
