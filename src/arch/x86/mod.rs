//! x86 and x64 code generation.
//!
//! Both prologues push the flags first and the general purpose registers
//! after, so the context pointer lands on the last register pushed:
//!
//! ```text
//! x86: pushfd; push eax, ecx, edx, ebx, ebp, esi, edi
//! x64: pushfq; push r15..r8; push rax, rcx, rdx, rbx, rbp, rsi, rdi
//! ```
pub use self::x64::X64;
pub use self::x86::X86;

use super::SavedContext;
use crate::error::Result;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod disasm;
mod thunk;
mod x64;
mod x86;

/// Slots shared by both register records, counted from the context pointer.
mod slot {
  pub const DI: usize = 0;
  pub const SI: usize = 1;
  pub const BP: usize = 2;
  pub const BX: usize = 3;
  pub const DX: usize = 4;
  pub const CX: usize = 5;
  pub const AX: usize = 6;

  /// Slot of `r{index}` for index 8 through 15 (x64 only).
  pub const fn r(index: usize) -> usize {
    index - 1
  }

  pub const X86_FLAGS: usize = 7;
  pub const X64_FLAGS: usize = 15;
}

/// Registers saved by the x86 prologue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct X86Registers {
  pub eax: u32,
  pub ecx: u32,
  pub edx: u32,
  pub ebx: u32,
  pub ebp: u32,
  pub esi: u32,
  pub edi: u32,
  pub eflags: u32,
}

impl X86Registers {
  /// Size of the saved register frame in bytes.
  pub const FRAME_SIZE: usize = (slot::X86_FLAGS + 1) * 4;

  /// Decodes a snapshot of the stack taken at the context pointer.
  pub fn read(context: &[u8]) -> Result<Self> {
    SavedContext::new(context, 4, slot::X86_FLAGS + 1).map(|saved| Self::decode(&saved))
  }

  /// Decodes the frame at the context pointer handed to a callback.
  ///
  /// # Safety
  ///
  /// `context` must point at a frame saved by an x86 prologue.
  pub unsafe fn from_context(context: *const u8) -> Self {
    Self::decode(&SavedContext::from_raw(context, 4, slot::X86_FLAGS + 1))
  }

  fn decode(saved: &SavedContext) -> Self {
    let dword = |index| saved.slot(index) as u32;
    X86Registers {
      eax: dword(slot::AX),
      ecx: dword(slot::CX),
      edx: dword(slot::DX),
      ebx: dword(slot::BX),
      ebp: dword(slot::BP),
      esi: dword(slot::SI),
      edi: dword(slot::DI),
      eflags: dword(slot::X86_FLAGS),
    }
  }
}

/// Registers saved by the x64 prologue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct X64Registers {
  pub rax: u64,
  pub rcx: u64,
  pub rdx: u64,
  pub rbx: u64,
  pub rbp: u64,
  pub rsi: u64,
  pub rdi: u64,
  pub r8: u64,
  pub r9: u64,
  pub r10: u64,
  pub r11: u64,
  pub r12: u64,
  pub r13: u64,
  pub r14: u64,
  pub r15: u64,
  pub rflags: u64,
}

impl X64Registers {
  /// Size of the saved register frame in bytes.
  pub const FRAME_SIZE: usize = (slot::X64_FLAGS + 1) * 8;

  /// Decodes a snapshot of the stack taken at the context pointer.
  pub fn read(context: &[u8]) -> Result<Self> {
    SavedContext::new(context, 8, slot::X64_FLAGS + 1).map(|saved| Self::decode(&saved))
  }

  /// Decodes the frame at the context pointer handed to a callback.
  ///
  /// # Safety
  ///
  /// `context` must point at a frame saved by an x64 prologue.
  pub unsafe fn from_context(context: *const u8) -> Self {
    Self::decode(&SavedContext::from_raw(context, 8, slot::X64_FLAGS + 1))
  }

  /// Returns the stack pointer the hooked code had before the prologue ran.
  ///
  /// `context` is the address of the saved frame.
  pub fn original_rsp(context: usize) -> usize {
    // The frame sits below the skipped red zone
    context + Self::FRAME_SIZE + 128
  }

  fn decode(saved: &SavedContext) -> Self {
    let qword = |index| saved.slot(index);
    X64Registers {
      rax: qword(slot::AX),
      rcx: qword(slot::CX),
      rdx: qword(slot::DX),
      rbx: qword(slot::BX),
      rbp: qword(slot::BP),
      rsi: qword(slot::SI),
      rdi: qword(slot::DI),
      r8: qword(slot::r(8)),
      r9: qword(slot::r(9)),
      r10: qword(slot::r(10)),
      r11: qword(slot::r(11)),
      r12: qword(slot::r(12)),
      r13: qword(slot::r(13)),
      r14: qword(slot::r(14)),
      r15: qword(slot::r(15)),
      rflags: qword(slot::X64_FLAGS),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use matches::assert_matches;

  #[test]
  fn x86_slots_match_push_order() {
    // pushfd, then eax..edi, so edi is the lowest word
    let pushed = [0x202u32, 1, 2, 3, 4, 5, 6, 7];
    let stack: Vec<u8> = pushed.iter().rev().flat_map(|word| word.to_le_bytes().to_vec()).collect();

    let regs = X86Registers::read(&stack).unwrap();
    assert_eq!(
      regs,
      X86Registers {
        eax: 1,
        ecx: 2,
        edx: 3,
        ebx: 4,
        ebp: 5,
        esi: 6,
        edi: 7,
        eflags: 0x202,
      }
    );
  }

  #[test]
  fn x64_slots_match_push_order() {
    // pushfq, r15..r8, then rax..rdi
    let mut pushed = vec![0x246u64];
    pushed.extend((8..16).rev().map(|register| 0x100 + register));
    pushed.extend(&[0xA0, 0xA1, 0xA2, 0xA3, 0xA5, 0xA6, 0xA7]);
    let stack: Vec<u8> = pushed.iter().rev().flat_map(|word| word.to_le_bytes().to_vec()).collect();

    let regs = X64Registers::read(&stack).unwrap();
    assert_eq!((regs.rax, regs.rcx, regs.rdx, regs.rbx), (0xA0, 0xA1, 0xA2, 0xA3));
    assert_eq!((regs.rbp, regs.rsi, regs.rdi), (0xA5, 0xA6, 0xA7));
    assert_eq!((regs.r8, regs.r12, regs.r15), (0x108, 0x10C, 0x10F));
    assert_eq!(regs.rflags, 0x246);
  }

  #[test]
  fn original_rsp_skips_the_frame_and_red_zone() {
    assert_eq!(X64Registers::FRAME_SIZE, 16 * 8);
    assert_eq!(X64Registers::original_rsp(0x7FFF_0000), 0x7FFF_0000 + 0x80 + 0x80);
  }

  #[test]
  fn x64_context_must_cover_the_frame() {
    let stack = [0u8; 64];
    assert_matches!(
      X64Registers::read(&stack),
      Err(Error::ContextTooSmall { needed: 128, actual: 64 })
    );
  }
}
