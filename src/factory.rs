//! Selection of a code generator for a target.
use crate::arch::{Arch, Arm, Arm64, CodeGen, Thumb, X64, X86};
use crate::error::Result;
use crate::hooker::{InlineHooker, Patcher};
use log::debug;

/// Returns the generator for code at `target`.
///
/// On 32-bit ARM a set lowest bit marks Thumb code.
pub fn generator(arch: Arch, target: usize) -> Box<dyn CodeGen> {
  match arch {
    Arch::Arm if target & 1 == 1 => Box::new(Thumb),
    Arch::Arm => Box::new(Arm),
    Arch::Arm64 => Box::new(Arm64),
    Arch::Ia32 => Box::new(X86),
    Arch::X64 => Box::new(X64),
  }
}

/// Creates a hooker for an architecture given by name (`arm`, `arm64`,
/// `ia32` or `x64`).
pub fn create(
  arch: &str,
  target: usize,
  callback: usize,
  parameter: usize,
  trampoline: Option<usize>,
  patcher: Option<Box<dyn Patcher>>,
) -> Result<InlineHooker> {
  let arch = arch.parse::<Arch>()?;
  Ok(build(arch, target, callback, parameter, trampoline, patcher))
}

/// Creates a hooker for a known architecture.
pub fn build(
  arch: Arch,
  target: usize,
  callback: usize,
  parameter: usize,
  trampoline: Option<usize>,
  patcher: Option<Box<dyn Patcher>>,
) -> InlineHooker {
  let generator = generator(arch, target);
  debug!(
    "{:?} generator for {:#x} on {}",
    generator.instruction_set(),
    target,
    arch
  );

  let mut hooker = InlineHooker::new(generator, target, callback, parameter);
  if let Some(address) = trampoline {
    hooker = hooker.with_trampoline(address);
  }
  if let Some(patcher) = patcher {
    hooker = hooker.with_patcher(patcher);
  }
  hooker
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::InstructionSet;
  use crate::error::Error;
  use matches::assert_matches;

  fn selected(arch: &str, target: usize) -> InstructionSet {
    create(arch, target, 0xC0DE, 0, None, None)
      .unwrap()
      .generator()
      .instruction_set()
  }

  #[test]
  fn thumb_bit_selects_thumb() {
    assert_eq!(selected("arm", 0x1001), InstructionSet::Thumb);
    assert_eq!(selected("arm", 0x1000), InstructionSet::Arm);
  }

  #[test]
  fn other_architectures_ignore_the_low_bit() {
    assert_eq!(selected("arm64", 0x1001), InstructionSet::Arm64);
    assert_eq!(selected("ia32", 0x1001), InstructionSet::X86);
    assert_eq!(selected("x64", 0x1001), InstructionSet::X64);
  }

  #[test]
  fn unknown_architectures_are_rejected() {
    assert_matches!(
      create("mips", 0x1000, 0xC0DE, 0, None, None),
      Err(Error::UnsupportedArchitecture(_))
    );
  }
}
