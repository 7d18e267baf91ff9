//! Architecture specific code generation.
//!
//! Every supported instruction set exposes a [`CodeGen`] implementation. A
//! generator is pure: it only describes machine code for a given address and
//! never touches memory itself. The engine decides where the code lives.
//!
//! Each generator also has a matching register record (e.g.
//! [`ArmRegisters`]) whose slot table mirrors the push order of its prologue.
pub use self::arm::{Arm, ArmRegisters, Thumb};
pub use self::arm64::{Arm64, Arm64Registers};
pub use self::x86::{X64Registers, X86Registers, X64, X86};

use crate::error::{Error, Result};
use crate::pic;
use cfg_if::cfg_if;
use std::{fmt, slice, str::FromStr};

mod arm;
mod arm64;
mod x86;

/// A CPU architecture a hook can be generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
  /// 32-bit ARM, in either ARM or Thumb state.
  Arm,
  /// AArch64.
  Arm64,
  /// 32-bit x86.
  Ia32,
  /// x86-64.
  X64,
}

cfg_if! {
  if #[cfg(target_arch = "arm")] {
    const HOST: Option<Arch> = Some(Arch::Arm);
  } else if #[cfg(target_arch = "aarch64")] {
    const HOST: Option<Arch> = Some(Arch::Arm64);
  } else if #[cfg(target_arch = "x86")] {
    const HOST: Option<Arch> = Some(Arch::Ia32);
  } else if #[cfg(target_arch = "x86_64")] {
    const HOST: Option<Arch> = Some(Arch::X64);
  } else {
    const HOST: Option<Arch> = None;
  }
}

impl Arch {
  /// Returns the architecture of the running process.
  pub fn host() -> Result<Arch> {
    HOST.ok_or_else(|| Error::UnsupportedArchitecture(std::env::consts::ARCH.to_string()))
  }

  /// Returns the size of a pointer in bytes.
  pub fn pointer_size(self) -> usize {
    match self {
      Arch::Arm | Arch::Ia32 => 4,
      Arch::Arm64 | Arch::X64 => 8,
    }
  }

  /// Returns the canonical name of the architecture.
  pub fn name(self) -> &'static str {
    match self {
      Arch::Arm => "arm",
      Arch::Arm64 => "arm64",
      Arch::Ia32 => "ia32",
      Arch::X64 => "x64",
    }
  }
}

impl FromStr for Arch {
  type Err = Error;

  fn from_str(name: &str) -> Result<Self> {
    match name {
      "arm" => Ok(Arch::Arm),
      "arm64" => Ok(Arch::Arm64),
      "ia32" => Ok(Arch::Ia32),
      "x64" => Ok(Arch::X64),
      other => Err(Error::UnsupportedArchitecture(other.to_string())),
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// The instruction set a generator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionSet {
  Arm,
  Thumb,
  Arm64,
  X86,
  X64,
}

impl InstructionSet {
  /// Returns the architecture the instruction set belongs to.
  pub fn arch(self) -> Arch {
    match self {
      InstructionSet::Arm | InstructionSet::Thumb => Arch::Arm,
      InstructionSet::Arm64 => Arch::Arm64,
      InstructionSet::X86 => Arch::Ia32,
      InstructionSet::X64 => Arch::X64,
    }
  }

  /// Returns the size of an embedded pointer literal.
  pub fn pointer_size(self) -> usize {
    self.arch().pointer_size()
  }

  /// Strips the mode bit from an address, yielding where its bytes live.
  pub fn code_address(self, address: usize) -> usize {
    match self {
      InstructionSet::Thumb => address & !1,
      _ => address,
    }
  }
}

/// The layout of a generated prologue.
pub struct Prologue {
  /// Data fields followed by the save/call/restore sequence.
  pub emitter: pic::CodeEmitter,
  /// Offset of the first instruction, past any leading data fields.
  pub entry: usize,
}

/// A machine code generator for one instruction set.
pub trait CodeGen {
  /// Returns the instruction set of the emitted code.
  fn instruction_set(&self) -> InstructionSet;

  /// Describes the callback pointer, the parameter pointer and the
  /// save-registers, call, restore-registers sequence.
  fn prologue(&self, callback: usize, parameter: usize) -> Prologue;

  /// Describes the shortest unconditional transfer from `from` to `to`.
  fn jump(&self, from: usize, to: usize) -> pic::CodeEmitter;

  /// Returns true if a single relative branch at `from` can reach `to`.
  fn can_jump_directly(&self, from: usize, to: usize) -> bool;

  /// Returns the number of bytes `generate_jump` emits for this pair.
  fn jump_size(&self, from: usize, to: usize) -> usize {
    self.jump(from, to).len()
  }

  /// Emits a jump placed at `from` that transfers control to `to`.
  fn generate_jump(&self, from: usize, to: usize) -> Vec<u8> {
    let code_address = self.instruction_set().code_address(from);
    self.jump(from, to).emit(code_address)
  }

  /// Emits the prologue placed at `address`.
  ///
  /// Returns the bytes and the address the executable part begins at.
  fn generate_prologue(&self, address: usize, callback: usize, parameter: usize) -> (Vec<u8>, usize) {
    let prologue = self.prologue(callback, parameter);
    (prologue.emitter.emit(address), address + prologue.entry)
  }
}

/// A relocated instruction whose meaning depends on its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocationHazard {
  /// A branch with a relative displacement, at this offset of the copy.
  RelativeBranch(usize),
  /// A memory operand relative to the instruction pointer.
  RipRelative(usize),
  /// The copy ends inside the instruction starting at this offset.
  Truncated(usize),
}

cfg_if! {
  if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
    /// Inspects the first `copied` bytes of `code` for position-dependent
    /// encodings. Any bytes after them are used as lookahead.
    ///
    /// Only x86 and x64 code is inspected.
    pub fn relocation_hazards(
      set: InstructionSet,
      code: &[u8],
      copied: usize,
      address: usize,
    ) -> Vec<RelocationHazard> {
      match set {
        InstructionSet::X86 => x86::disasm::scan(code, copied, 32, address),
        InstructionSet::X64 => x86::disasm::scan(code, copied, 64, address),
        _ => Vec::new(),
      }
    }
  } else {
    /// Inspects copied instruction bytes for position-dependent encodings.
    ///
    /// The disassembler is only available on x86 hosts.
    pub fn relocation_hazards(
      _set: InstructionSet,
      _code: &[u8],
      _copied: usize,
      _address: usize,
    ) -> Vec<RelocationHazard> {
      Vec::new()
    }
  }
}

/// A view of the registers a prologue pushed.
#[derive(Debug)]
struct SavedContext<'a> {
  bytes: &'a [u8],
  width: usize,
}

impl<'a> SavedContext<'a> {
  /// Validates that `bytes` covers `slots` registers of `width` bytes.
  fn new(bytes: &'a [u8], width: usize, slots: usize) -> Result<Self> {
    let needed = width * slots;
    if bytes.len() < needed {
      Err(Error::ContextTooSmall {
        needed,
        actual: bytes.len(),
      })?;
    }

    Ok(SavedContext { bytes, width })
  }

  /// Views the saved frame at a live context pointer.
  unsafe fn from_raw(context: *const u8, width: usize, slots: usize) -> SavedContext<'static> {
    SavedContext {
      bytes: slice::from_raw_parts(context, width * slots),
      width,
    }
  }

  /// Returns the little-endian value stored in `slot`.
  fn slot(&self, slot: usize) -> u64 {
    let start = slot * self.width;
    let mut value = [0u8; 8];
    value[..self.width].copy_from_slice(&self.bytes[start..start + self.width]);
    u64::from_le_bytes(value)
  }
}
