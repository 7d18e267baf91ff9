use super::thunk;
use crate::arch::{CodeGen, InstructionSet, Prologue};
use crate::pic::{self, CodeEmitter};

// pushfd; push eax, ecx, edx, ebx, ebp, esi, edi
const SAVE: [u8; 8] = [0x9C, 0x50, 0x51, 0x52, 0x53, 0x55, 0x56, 0x57];
// mov ecx, esp; push ecx
const PUSH_CONTEXT: [u8; 3] = [0x89, 0xE1, 0x51];
// push imm32
const PUSH_IMM32: u8 = 0x68;
// add esp, 8
const DROP_ARGUMENTS: [u8; 3] = [0x83, 0xC4, 0x08];
// pop edi, esi, ebp, ebx, edx, ecx, eax; popfd
const RESTORE: [u8; 8] = [0x5F, 0x5E, 0x5D, 0x5B, 0x5A, 0x59, 0x58, 0x9D];

/// Code generator for 32-bit x86.
///
/// The callback is invoked with the cdecl convention.
#[derive(Debug, Default, Clone, Copy)]
pub struct X86;

impl CodeGen for X86 {
  fn instruction_set(&self) -> InstructionSet {
    InstructionSet::X86
  }

  fn prologue(&self, callback: usize, parameter: usize) -> Prologue {
    let mut emitter = CodeEmitter::new();

    emitter.add_bytes(&SAVE);
    emitter.add_bytes(&PUSH_CONTEXT);
    emitter.add_bytes(&[PUSH_IMM32]);
    emitter.add_thunk(pic::pointer(parameter, 4));
    emitter.add_thunk(thunk::call_rel32(callback));
    emitter.add_bytes(&DROP_ARGUMENTS);
    emitter.add_bytes(&RESTORE);

    Prologue { emitter, entry: 0 }
  }

  fn jump(&self, _from: usize, to: usize) -> CodeEmitter {
    let mut emitter = CodeEmitter::new();
    emitter.add_thunk(thunk::jmp_rel32(to));
    emitter
  }

  /// The 32-bit displacement wraps, so every address is reachable.
  fn can_jump_directly(&self, _from: usize, _to: usize) -> bool {
    true
  }
}
