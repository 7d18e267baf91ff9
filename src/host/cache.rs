#[cfg(any(target_os = "macos", target_os = "ios"))]
extern "C" {
  fn sys_icache_invalidate(start: *mut libc::c_void, size: usize);
  fn sys_dcache_flush(start: *mut libc::c_void, size: usize);
}

#[cfg(all(
  any(target_os = "linux", target_os = "android"),
  any(target_arch = "arm", target_arch = "aarch64")
))]
extern "C" {
  fn __clear_cache(start: *mut libc::c_void, end: *mut libc::c_void);
}

/// Makes freshly written instructions visible to instruction fetch.
///
/// x86 keeps its instruction cache coherent, so this only does work on ARM.
///
/// # Safety
///
/// `address` must point to at least `size` bytes of mapped memory.
pub unsafe fn flush_instruction_cache(address: *mut u8, size: usize) {
  #[cfg(any(target_os = "macos", target_os = "ios"))]
  {
    sys_dcache_flush(address as *mut _, size);
    sys_icache_invalidate(address as *mut _, size);
  }

  #[cfg(all(
    any(target_os = "linux", target_os = "android"),
    any(target_arch = "arm", target_arch = "aarch64")
  ))]
  {
    __clear_cache(address as *mut _, address.add(size) as *mut _);
  }

  let _ = (address, size);
}
