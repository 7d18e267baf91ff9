use super::thunk;
use crate::arch::{CodeGen, InstructionSet, Prologue};
use crate::pic::{self, CodeEmitter};

// lea rsp, [rsp-0x80]
const SKIP_RED_ZONE: [u8; 5] = [0x48, 0x8D, 0x64, 0x24, 0x80];
// lea rsp, [rsp+0x80]
const RESTORE_RED_ZONE: [u8; 8] = [0x48, 0x8D, 0xA4, 0x24, 0x80, 0x00, 0x00, 0x00];
// pushfq; push r15..r8; push rax, rcx, rdx, rbx, rbp, rsi, rdi
const SAVE: [u8; 24] = [
  0x9C, 0x41, 0x57, 0x41, 0x56, 0x41, 0x55, 0x41, 0x54, 0x41, 0x53, 0x41, 0x52, 0x41, 0x51, 0x41,
  0x50, 0x50, 0x51, 0x52, 0x53, 0x55, 0x56, 0x57,
];
// mov rsi, rsp
const MOV_RSI_RSP: [u8; 3] = [0x48, 0x89, 0xE6];
// mov rdi, imm64
const MOV_RDI_IMM64: [u8; 2] = [0x48, 0xBF];
// mov rbx, rsp; and rsp, -16
const ALIGN_STACK: [u8; 7] = [0x48, 0x89, 0xE3, 0x48, 0x83, 0xE4, 0xF0];
// mov rax, imm64
const MOV_RAX_IMM64: [u8; 2] = [0x48, 0xB8];
// call rax; mov rsp, rbx
const CALL_RAX: [u8; 5] = [0xFF, 0xD0, 0x48, 0x89, 0xDC];
// pop rdi, rsi, rbp, rbx, rdx, rcx, rax; pop r8..r15; popfq
const RESTORE: [u8; 24] = [
  0x5F, 0x5E, 0x5D, 0x5B, 0x5A, 0x59, 0x58, 0x41, 0x58, 0x41, 0x59, 0x41, 0x5A, 0x41, 0x5B, 0x41,
  0x5C, 0x41, 0x5D, 0x41, 0x5E, 0x41, 0x5F, 0x9D,
];

/// Code generator for x86-64.
///
/// The callback is invoked with the System V convention. The prologue steps
/// over the red zone before saving anything, and aligns the stack for the
/// call.
#[derive(Debug, Default, Clone, Copy)]
pub struct X64;

impl CodeGen for X64 {
  fn instruction_set(&self) -> InstructionSet {
    InstructionSet::X64
  }

  fn prologue(&self, callback: usize, parameter: usize) -> Prologue {
    let mut emitter = CodeEmitter::new();

    emitter.add_bytes(&SKIP_RED_ZONE);
    emitter.add_bytes(&SAVE);
    emitter.add_bytes(&MOV_RSI_RSP);
    emitter.add_bytes(&MOV_RDI_IMM64);
    emitter.add_thunk(pic::pointer(parameter, 8));
    emitter.add_bytes(&ALIGN_STACK);
    emitter.add_bytes(&MOV_RAX_IMM64);
    emitter.add_thunk(pic::pointer(callback, 8));
    emitter.add_bytes(&CALL_RAX);
    emitter.add_bytes(&RESTORE);
    emitter.add_bytes(&RESTORE_RED_ZONE);

    Prologue { emitter, entry: 0 }
  }

  fn jump(&self, from: usize, to: usize) -> CodeEmitter {
    let mut emitter = CodeEmitter::new();

    if self.can_jump_directly(from, to) {
      emitter.add_thunk(thunk::jmp_rel32(to));
    } else {
      emitter.add_thunk(thunk::jmp_abs(to));
    }

    emitter
  }

  fn can_jump_directly(&self, from: usize, to: usize) -> bool {
    let displacement = (to as i64).wrapping_sub(from as i64 + 5);
    (i64::from(i32::min_value())..i64::from(i32::max_value())).contains(&displacement)
  }
}

// Addresses below do not fit a 32-bit usize
#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
  use super::*;

  #[test]
  fn prologue_embeds_parameter_and_callback() {
    let (code, entry) = X64.generate_prologue(0x7000_0000, 0x1122_3344_5566, 0xABCD);

    assert_eq!(entry, 0x7000_0000);
    assert_eq!(code.len(), 96);
    assert_eq!(&code[..5], &SKIP_RED_ZONE);
    assert_eq!(&code[32..34], &MOV_RDI_IMM64);
    assert_eq!(&code[34..42], &0xABCDu64.to_le_bytes());
    assert_eq!(&code[49..51], &MOV_RAX_IMM64);
    assert_eq!(&code[51..59], &0x1122_3344_5566u64.to_le_bytes());
    assert_eq!(&code[59..61], &[0xFF, 0xD0]);
    assert_eq!(&code[64..88], &RESTORE);
    assert_eq!(&code[88..], &RESTORE_RED_ZONE);
  }

  /// Decodes a run of `push`/`pop` encodings into register numbers.
  fn registers(mut code: &[u8], base: u8) -> Vec<u8> {
    let mut result = Vec::new();
    while !code.is_empty() {
      if code[0] == 0x41 {
        result.push(8 + code[1] - base);
        code = &code[2..];
      } else {
        result.push(code[0] - base);
        code = &code[1..];
      }
    }
    result
  }

  #[test]
  fn restores_mirror_saves() {
    let pushed = registers(&SAVE[1..], 0x50);
    let mut popped = registers(&RESTORE[..23], 0x58);
    popped.reverse();

    assert_eq!(pushed.len(), 15);
    assert_eq!(pushed, popped);
    assert_eq!((SAVE[0], RESTORE[23]), (0x9C, 0x9D));
  }

  #[test]
  fn near_targets_use_a_relative_jump() {
    let from = 0x7FFF_0000_0000usize;
    assert_eq!(X64.jump_size(from, from + 0x7FFF_0000), 5);
    assert_eq!(X64.generate_jump(0x1000, 0x1005), vec![0xE9, 0, 0, 0, 0]);
  }

  #[test]
  fn far_targets_use_an_absolute_jump() {
    let from = 0x1000usize;
    let to = from + 5 + 0x8000_0000;

    assert!(!X64.can_jump_directly(from, to));
    assert_eq!(X64.jump_size(from, to), 16);

    let code = X64.generate_jump(from, to);
    assert_eq!(&code[..2], &[0xFF, 0x25]);
    assert_eq!(&code[6..14], &(to as u64).to_le_bytes());
  }

  #[test]
  fn range_edges() {
    let from = 0x1_0000_0000usize;
    assert!(X64.can_jump_directly(from, from + 5 + 0x7FFF_FFFE));
    assert!(!X64.can_jump_directly(from, from + 5 + 0x7FFF_FFFF));
    assert!(X64.can_jump_directly(from, from + 5 - 0x8000_0000));
  }
}
