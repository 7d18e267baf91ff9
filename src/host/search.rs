use crate::error::{Error, Result};
use std::ops::Range;

/// Returns an iterator for free pages after the specified address.
pub fn after(origin: usize, range: Range<usize>) -> impl Iterator<Item = Result<usize>> {
  FreeRegionIter::new(origin, range, SearchDirection::After)
}

/// Returns an iterator for free pages before the specified address.
pub fn before(origin: usize, range: Range<usize>) -> impl Iterator<Item = Result<usize>> {
  FreeRegionIter::new(origin, range, SearchDirection::Before)
}

/// Direction for the region search.
enum SearchDirection {
  Before,
  After,
}

/// An iterator searching for free regions.
struct FreeRegionIter {
  range: Range<usize>,
  search: SearchDirection,
  current: usize,
  page_size: usize,
}

impl FreeRegionIter {
  /// Creates a new iterator for free regions.
  fn new(origin: usize, range: Range<usize>, search: SearchDirection) -> Self {
    let page_size = region::page::size();
    FreeRegionIter {
      current: region::page::floor(origin as *const u8) as usize,
      range,
      search,
      page_size,
    }
  }
}

impl Iterator for FreeRegionIter {
  type Item = Result<usize>;

  /// Returns the closest free page for the current address.
  fn next(&mut self) -> Option<Self::Item> {
    while self.current > 0 && self.range.contains(&self.current) {
      match region::query(self.current as *const u8) {
        Ok(region) => {
          let occupied = region.as_range();
          self.current = match self.search {
            SearchDirection::Before => occupied.start.saturating_sub(self.page_size),
            SearchDirection::After => occupied.end,
          }
        },
        Err(error) => {
          // Check whether the region is free, otherwise return the error
          let result = Some(match error {
            region::Error::UnmappedRegion => Ok(self.current),
            inner => Err(Error::RegionFailure(inner)),
          });

          // Adjust the offset for repeated calls.
          self.current = match self.search {
            SearchDirection::Before => self.current.saturating_sub(self.page_size),
            SearchDirection::After => self.current.saturating_add(self.page_size),
          };

          return result;
        },
      }
    }

    None
  }
}
