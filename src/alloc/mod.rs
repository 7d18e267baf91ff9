//! Trampoline memory.
use crate::error::Result;
use crate::host::{round_to_pages, Host, Proximity};
use log::debug;

/// A block of executable pages owned by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
  pub address: usize,
  pub size: usize,
}

/// A bump allocator handing out trampoline memory from executable pages.
///
/// Allocations are never released and never span two pages. A request that
/// does not fit in what remains of the current page starts a new one.
#[derive(Debug, Default)]
pub struct TrampolinePool {
  pages: Vec<Page>,
  offset: usize,
}

impl TrampolinePool {
  /// Creates an empty pool.
  pub fn new() -> Self {
    Self::default()
  }

  /// Allocates `size` bytes, preferably close to an address.
  ///
  /// Proximity only matters when a new page is needed.
  pub fn allocate<H: Host + ?Sized>(
    &mut self,
    host: &mut H,
    size: usize,
    near: Option<Proximity>,
  ) -> Result<usize> {
    if let Some(page) = self.current() {
      if self.offset + size <= page.size {
        let address = page.address + self.offset;
        self.offset += size;
        return Ok(address);
      }
    }

    let address = host.allocate_pages(size, near)?;
    let page = Page {
      address,
      size: round_to_pages(size, host.page_size()),
    };

    debug!("trampoline page #{} at {:#x}", self.pages.len(), address);
    self.pages.push(page);
    self.offset = size;
    Ok(address)
  }

  /// Returns the page allocations are currently made from.
  pub fn current(&self) -> Option<Page> {
    self.pages.last().copied()
  }

  /// Returns every page allocated so far, oldest first.
  pub fn pages(&self) -> &[Page] {
    &self.pages
  }

  /// Returns the offset of the next allocation within the current page.
  pub fn offset(&self) -> usize {
    self.offset
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::Arch;
  use crate::host::ScratchHost;

  #[test]
  fn allocations_never_overlap() {
    let mut host = ScratchHost::new(Arch::Arm64, 0x10_0000);
    let mut pool = TrampolinePool::new();

    let mut ranges = Vec::new();
    for size in &[0x100, 0x30, 0x400, 0x100, 0x800, 0x10, 0xF00] {
      let address = pool.allocate(&mut host, *size, None).unwrap();
      ranges.push(address..address + size);
    }

    for (index, range) in ranges.iter().enumerate() {
      for other in &ranges[index + 1..] {
        assert!(range.end <= other.start || other.end <= range.start);
      }
    }
  }

  #[test]
  fn overflowing_requests_start_a_new_page() {
    let mut host = ScratchHost::new(Arch::X64, 0x10_0000);
    let mut pool = TrampolinePool::new();

    let first = pool.allocate(&mut host, 0xF00, None).unwrap();
    let second = pool.allocate(&mut host, 0x100, None).unwrap();
    assert_eq!(second, first + 0xF00);
    assert_eq!(pool.pages().len(), 1);

    // The page is exactly full, so the next byte needs a new page
    let third = pool.allocate(&mut host, 1, None).unwrap();
    assert_eq!(third, first + 0x1000);
    assert_eq!(pool.pages().len(), 2);
    assert_eq!(pool.offset(), 1);
  }

  #[test]
  fn large_requests_get_their_own_block() {
    let mut host = ScratchHost::new(Arch::Arm, 0x10_0000);
    let mut pool = TrampolinePool::new();

    let address = pool.allocate(&mut host, 0x1800, None).unwrap();
    assert_eq!(
      pool.current(),
      Some(Page {
        address,
        size: 0x2000
      })
    );
    assert_eq!(pool.allocate(&mut host, 0x800, None).unwrap(), address + 0x1800);
  }
}
