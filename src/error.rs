//! Error types and utilities.
use thiserror::Error;

/// The result of a hooking operation.
pub type Result<T> = ::std::result::Result<T, Error>;

/// A representation of all possible errors.
#[derive(Error, Debug)]
pub enum Error {
  /// The target address already carries an installed hook.
  #[error("address {0:#x} is already hooked")]
  AlreadyHooked(usize),
  /// No hook is registered for the address.
  #[error("address {0:#x} is not hooked")]
  NotHooked(usize),
  /// A required input was null or absent.
  #[error("required input `{0}` is missing")]
  MissingInput(&'static str),
  /// The architecture has no code generator.
  #[error("unsupported architecture `{0}`")]
  UnsupportedArchitecture(String),
  /// The address cannot be read from or patched.
  #[error("cannot access address {0:#x}")]
  InvalidAddress(usize),
  /// The trampoline does not start on a 4-byte boundary.
  #[error("trampoline {0:#x} is not 4-byte aligned")]
  MisalignedTrampoline(usize),
  /// The generated trampoline does not fit in its reserved space.
  #[error("trampoline needs {needed} bytes but only {capacity} are reserved")]
  TrampolineOverflow { needed: usize, capacity: usize },
  /// A custom patcher preserved fewer bytes than the jump overwrites.
  #[error("patcher preserved {actual} original bytes, the jump overwrites {expected}")]
  IncompletePatch { expected: usize, actual: usize },
  /// A register snapshot is shorter than the saved register frame.
  #[error("register context holds {actual} bytes, the saved frame is {needed}")]
  ContextTooSmall { needed: usize, actual: usize },
  /// Executable memory could not be allocated.
  #[error("cannot allocate memory")]
  OutOfMemory,
  /// One or more hooks could not be restored.
  #[error("{} hook(s) could not be restored:{}", .0.len(), list_failures(.0))]
  RestoreFailed(Vec<(usize, Error)>),
  /// A memory operation failed.
  #[error("memory operation failed: {0}")]
  RegionFailure(#[from] region::Error),
  /// A memory mapping failed.
  #[error("memory mapping failed: {0}")]
  AllocateFailure(#[from] mmap::MapError),
}

fn list_failures(failures: &[(usize, Error)]) -> String {
  failures
    .iter()
    .map(|(address, error)| format!(" [{:#x}: {}]", address, error))
    .collect()
}
