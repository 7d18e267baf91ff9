use super::{cache, round_to_pages, search, Host, Proximity};
use crate::arch::Arch;
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use log::{debug, trace};
use std::{mem, slice};

lazy_static! {
  static ref PAGE_SIZE: usize = region::page::size();
}

/// The address space of the running process.
///
/// Pages allocated through the host stay mapped for as long as it lives,
/// or for the rest of the process once leaked.
pub struct ProcessHost {
  arch: Arch,
  maps: Vec<mmap::MemoryMap>,
}

impl ProcessHost {
  /// Creates a host for the current process.
  ///
  /// # Safety
  ///
  /// Every address handed to the host is treated as live code or data of
  /// this process. Patching code that is running on another thread is only
  /// as safe as the patch itself.
  pub unsafe fn new() -> Result<Self> {
    Ok(ProcessHost {
      arch: Arch::host()?,
      maps: Vec::new(),
    })
  }

  /// Returns the number of mappings created so far.
  pub fn mappings(&self) -> usize {
    self.maps.len()
  }

  /// Tries to map read-, write- & executable memory, optionally at a fixed
  /// address.
  fn map(size: usize, address: Option<usize>) -> Result<mmap::MemoryMap> {
    let mut options = vec![
      mmap::MapOption::MapReadable,
      mmap::MapOption::MapWritable,
      mmap::MapOption::MapExecutable,
    ];

    if let Some(address) = address {
      options.push(mmap::MapOption::MapAddr(address as *const _));
    }

    Ok(mmap::MemoryMap::new(size, &options)?)
  }

  /// Maps memory in a free region within `near`.
  fn map_near(size: usize, near: &Proximity) -> Result<Option<mmap::MemoryMap>> {
    let range = near.range();

    // Try to allocate after the specified address first (mostly because
    // macOS cannot allocate memory before the process's address).
    let candidates = search::after(near.origin, range.clone())
      .chain(search::before(near.origin, range.clone()));

    for candidate in candidates {
      let address = candidate?;

      // The whole mapping has to be within reach
      if !range.contains(&address.saturating_add(size - 1)) {
        continue;
      }

      match Self::map(size, Some(address)) {
        // The address is only a hint on some platforms
        Ok(map) if range.contains(&(map.data() as usize)) => return Ok(Some(map)),
        _ => continue,
      }
    }

    Ok(None)
  }

  /// Ensures `size` bytes at `address` are mapped with `access`.
  fn check_access(address: usize, size: usize, access: region::Protection) -> Result<()> {
    let end = address.checked_add(size).ok_or(Error::InvalidAddress(address))?;
    let mut current = address;

    while current < end {
      let region = region::query(current as *const u8).map_err(|error| match error {
        region::Error::UnmappedRegion => Error::InvalidAddress(current),
        inner => Error::RegionFailure(inner),
      })?;

      if !region.protection().contains(access) {
        Err(Error::InvalidAddress(current))?;
      }

      current = region.as_range().end;
    }

    Ok(())
  }
}

impl Host for ProcessHost {
  fn arch(&self) -> Arch {
    self.arch
  }

  fn page_size(&self) -> usize {
    *PAGE_SIZE
  }

  fn allocate_pages(&mut self, size: usize, near: Option<Proximity>) -> Result<usize> {
    let size = round_to_pages(size, *PAGE_SIZE);

    let map = match near.as_ref().map(|near| Self::map_near(size, near)).transpose()?.flatten() {
      Some(map) => map,
      None => {
        if let Some(near) = near {
          debug!("no free pages within {:#x} of {:#x}", near.max_distance, near.origin);
        }
        Self::map(size, None)?
      },
    };

    let address = map.data() as usize;
    trace!("mapped {:#x} bytes at {:#x}", size, address);
    self.maps.push(map);
    Ok(address)
  }

  fn leak_pages(&mut self) {
    for map in self.maps.drain(..) {
      debug!("leaking {:#x} bytes at {:#x}", map.len(), map.data() as usize);
      mem::forget(map);
    }
  }

  fn read(&self, address: usize, buffer: &mut [u8]) -> Result<()> {
    Self::check_access(address, buffer.len(), region::Protection::READ)?;
    buffer.copy_from_slice(unsafe { slice::from_raw_parts(address as *const u8, buffer.len()) });
    Ok(())
  }

  fn patch_code(
    &mut self,
    address: usize,
    size: usize,
    patch: &mut dyn FnMut(&mut [u8]),
  ) -> Result<()> {
    if address == 0 {
      Err(Error::InvalidAddress(address))?;
    }

    unsafe {
      // Runtime code is by default only read-execute
      let _guard = region::protect_with_handle(
        address as *const u8,
        size,
        region::Protection::READ_WRITE_EXECUTE,
      )?;

      patch(slice::from_raw_parts_mut(address as *mut u8, size));
      cache::flush_instruction_cache(address as *mut u8, size);
    }

    Ok(())
  }
}
